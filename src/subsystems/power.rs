use super::{AcsMode, BusContext, Subsystem};
use crate::command::{Command, CommandType, DispatchError};
use crate::config::{ConfigError, BATTERY_LEVEL};
use crate::telemetry::Samples;
use serde::{Deserialize, Serialize};

pub const POWER_DRAW: &str = "power_draw";

const SECONDS_PER_HOUR: f64 = 3600.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub watthour: f64,
    /// Fraction of capacity that may be used before the battery is considered
    /// deeply discharged.
    pub max_depth_of_discharge: f64,
    /// Level below which emergency charging is requested.
    pub charge_alert_level: f64,
    /// Level at which emergency charging ends.
    pub recharge_threshold: f64,
    pub initial_level: f64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            watthour: 560.0,
            max_depth_of_discharge: 0.7,
            charge_alert_level: 0.5,
            recharge_threshold: 0.95,
            initial_level: 1.0,
        }
    }
}

impl BatteryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |what: &str| Err(ConfigError::InvalidSpacecraft(what.into()));

        if !self.watthour.is_finite() || self.watthour <= 0.0 {
            return fail("battery capacity must be positive");
        }
        if !(self.max_depth_of_discharge > 0.0 && self.max_depth_of_discharge < 1.0) {
            return fail("battery depth of discharge must be in (0, 1)");
        }
        if !(0.0..=1.0).contains(&self.initial_level) {
            return fail("initial battery level must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.recharge_threshold)
            || !(0.0..=1.0).contains(&self.charge_alert_level)
            || self.charge_alert_level >= self.recharge_threshold
        {
            return fail("battery charge alert level must be below the recharge threshold");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub bus_power_w: f64,
    pub payload_power_w: f64,
    /// Extra draw of the reaction wheels while slewing.
    pub slew_power_w: f64,
    /// Total draw with everything non-essential switched off.
    pub survival_power_w: f64,
    /// Array output when sun-pointed.
    pub panel_rated_w: f64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            bus_power_w: 150.0,
            payload_power_w: 100.0,
            slew_power_w: 20.0,
            survival_power_w: 60.0,
            panel_rated_w: 450.0,
        }
    }
}

impl PowerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let loads = [
            self.bus_power_w,
            self.payload_power_w,
            self.slew_power_w,
            self.survival_power_w,
            self.panel_rated_w,
        ];
        if loads.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::InvalidSpacecraft(
                "power figures must be finite and non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// Battery charge bookkeeping with hysteresis on the charge alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Battery {
    config: BatteryConfig,
    charge_wh: f64,
    alert: bool,
}

impl Battery {
    pub fn new(config: BatteryConfig) -> Self {
        let charge_wh = config.watthour * config.initial_level;
        let mut battery = Self {
            config,
            charge_wh,
            alert: false,
        };
        battery.update_alert();
        battery
    }

    pub fn level(&self) -> f64 {
        self.charge_wh / self.config.watthour
    }

    pub fn charge_wh(&self) -> f64 {
        self.charge_wh
    }

    pub fn drain(&mut self, watts: f64, dt_s: f64) {
        self.charge_wh = (self.charge_wh - watts * dt_s / SECONDS_PER_HOUR).max(0.0);
    }

    pub fn charge(&mut self, watts: f64, dt_s: f64) {
        self.charge_wh =
            (self.charge_wh + watts * dt_s / SECONDS_PER_HOUR).min(self.config.watthour);
    }

    /// Raise the alert below the alert level and hold it until recharged.
    fn update_alert(&mut self) {
        let level = self.level();
        if level < self.config.charge_alert_level {
            self.alert = true;
        } else if level >= self.config.recharge_threshold {
            self.alert = false;
        }
    }

    pub fn alert(&self) -> bool {
        self.alert
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerState {
    pub battery_level: f64,
    pub battery_charge_wh: f64,
    pub power_draw_w: f64,
    pub generated_w: f64,
    pub charge_alert: bool,
    pub minimal_power: bool,
}

#[derive(Debug)]
pub struct PowerSystem {
    battery: Battery,
    config: PowerConfig,
    power_draw_w: f64,
    generated_w: f64,
    minimal_power: bool,
}

impl PowerSystem {
    pub fn new(battery: BatteryConfig, config: PowerConfig) -> Self {
        let mut power = Self {
            battery: Battery::new(battery),
            config,
            power_draw_w: 0.0,
            generated_w: 0.0,
            minimal_power: false,
        };
        power.power_draw_w = power.load_for(AcsMode::Science);
        power
    }

    pub fn battery(&self) -> &Battery {
        &self.battery
    }

    pub fn power_draw_w(&self) -> f64 {
        self.power_draw_w
    }

    /// Shed every non-essential load.
    pub fn set_minimal_power(&mut self, enabled: bool) {
        self.minimal_power = enabled;
    }

    fn load_for(&self, mode: AcsMode) -> f64 {
        if self.minimal_power {
            return self.config.survival_power_w;
        }
        match mode {
            AcsMode::Science => self.config.bus_power_w + self.config.payload_power_w,
            AcsMode::Slewing => self.config.bus_power_w + self.config.slew_power_w,
            AcsMode::Charging => self.config.bus_power_w,
            AcsMode::SafeMode => self.config.survival_power_w,
        }
    }

    pub fn sample(&self, samples: &mut Samples) {
        samples.insert(BATTERY_LEVEL, self.battery.level());
        samples.insert(POWER_DRAW, self.power_draw_w);
    }
}

impl Subsystem for PowerSystem {
    type State = PowerState;

    fn update(&mut self, ctx: &BusContext, dt_s: f64) {
        self.power_draw_w = self.load_for(ctx.mode);
        self.generated_w = self.config.panel_rated_w * ctx.sun_incidence.clamp(0.0, 1.0);

        self.battery.drain(self.power_draw_w, dt_s);
        self.battery.charge(self.generated_w, dt_s);
        self.battery.update_alert();

        debug_assert!(
            (0.0..=1.0).contains(&self.battery.level()),
            "battery level {} outside [0, 1]",
            self.battery.level()
        );
    }

    fn execute_command(&mut self, command: &Command, _utime: f64) -> Result<(), DispatchError> {
        if let CommandType::EnterSafeMode = command.command_type {
            self.set_minimal_power(true);
        }
        Ok(())
    }

    fn get_state(&self) -> Self::State {
        PowerState {
            battery_level: self.battery.level(),
            battery_charge_wh: self.battery.charge_wh(),
            power_draw_w: self.power_draw_w,
            generated_w: self.generated_w,
            charge_alert: self.battery.alert(),
            minimal_power: self.minimal_power,
        }
    }
}
