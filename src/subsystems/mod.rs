pub mod attitude;
pub mod power;
pub mod thermal;

pub use attitude::{AttitudeConfig, AttitudeControl, AttitudeState};
pub use power::{Battery, BatteryConfig, PowerConfig, PowerState, PowerSystem};
pub use thermal::{ThermalConfig, ThermalState, ThermalSystem};

use crate::command::{Command, DispatchError};
use crate::config::ConfigError;
use crate::targets::Pointing;
use crate::telemetry::Samples;
use serde::{Deserialize, Serialize};

/// Attitude control mode, reported on events and used by the power model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcsMode {
    Science,
    Slewing,
    Charging,
    SafeMode,
}

impl AcsMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AcsMode::Science => "SCIENCE",
            AcsMode::Slewing => "SLEWING",
            AcsMode::Charging => "CHARGING",
            AcsMode::SafeMode => "SAFE_MODE",
        }
    }
}

impl core::fmt::Display for AcsMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared inputs for one model update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusContext {
    pub utime: f64,
    pub mode: AcsMode,
    /// Cosine of the boresight-sun angle, floored at zero.
    pub sun_incidence: f64,
    pub power_draw_w: f64,
}

pub trait Subsystem {
    type State: Clone + Serialize;

    fn update(&mut self, ctx: &BusContext, dt_s: f64);
    fn execute_command(&mut self, command: &Command, utime: f64) -> Result<(), DispatchError>;
    fn get_state(&self) -> Self::State;
}

/// The spacecraft as seen by the simulation loop.
///
/// Implementations publish telemetry, accept commands, and propagate their own
/// state across a step. The loop never reaches inside a model.
pub trait SpacecraftBus {
    /// Publish this tick's telemetry into `samples`.
    fn sample(&self, utime: f64, samples: &mut Samples);

    fn dispatch(&mut self, command: &Command, utime: f64) -> Result<(), DispatchError>;

    /// Apply safe-mode overrides; called every tick once safe mode is active.
    fn hold_safe_mode(&mut self, utime: f64);

    /// Propagate from `utime` to `utime + step_size`.
    fn advance(&mut self, utime: f64, step_size: f64);

    fn acs_mode(&self) -> AcsMode;

    /// Seconds to slew to and settle on `pointing`.
    fn slew_time(&self, _pointing: &Pointing) -> f64 {
        0.0
    }

    /// Whether the power model wants an emergency charge.
    fn battery_alert(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpacecraftConfig {
    pub battery: BatteryConfig,
    pub power: PowerConfig,
    pub thermal: ThermalConfig,
    pub attitude: AttitudeConfig,
}

impl SpacecraftConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.battery.validate()?;
        self.power.validate()?;
        self.thermal.validate()?;
        self.attitude.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpacecraftState {
    pub attitude: AttitudeState,
    pub power: PowerState,
    pub thermal: ThermalState,
}

/// Reference bus: attitude, power, and thermal models wired together.
#[derive(Debug)]
pub struct Spacecraft {
    attitude: AttitudeControl,
    power: PowerSystem,
    thermal: ThermalSystem,
}

impl Spacecraft {
    pub fn new(config: &SpacecraftConfig) -> Self {
        Self {
            attitude: AttitudeControl::new(config.attitude.clone()),
            power: PowerSystem::new(config.battery.clone(), config.power.clone()),
            thermal: ThermalSystem::new(config.thermal.clone()),
        }
    }

    pub fn attitude(&self) -> &AttitudeControl {
        &self.attitude
    }

    pub fn power(&self) -> &PowerSystem {
        &self.power
    }

    pub fn thermal(&self) -> &ThermalSystem {
        &self.thermal
    }

    pub fn state(&self) -> SpacecraftState {
        SpacecraftState {
            attitude: self.attitude.get_state(),
            power: self.power.get_state(),
            thermal: self.thermal.get_state(),
        }
    }
}

impl Default for Spacecraft {
    fn default() -> Self {
        Self::new(&SpacecraftConfig::default())
    }
}

impl SpacecraftBus for Spacecraft {
    fn sample(&self, _utime: f64, samples: &mut Samples) {
        self.power.sample(samples);
        self.thermal.sample(samples);
    }

    fn dispatch(&mut self, command: &Command, utime: f64) -> Result<(), DispatchError> {
        // Attitude decides whether the command is acceptable at all
        self.attitude.execute_command(command, utime)?;
        self.power.execute_command(command, utime)?;
        self.thermal.execute_command(command, utime)
    }

    fn hold_safe_mode(&mut self, utime: f64) {
        self.attitude.hold_safe_mode(utime);
        self.power.set_minimal_power(true);
    }

    fn advance(&mut self, utime: f64, step_size: f64) {
        let mut ctx = BusContext {
            utime,
            mode: self.attitude.mode(),
            sun_incidence: self.attitude.sun_incidence(utime),
            power_draw_w: 0.0,
        };

        self.power.update(&ctx, step_size);
        ctx.power_draw_w = self.power.power_draw_w();
        self.thermal.update(&ctx, step_size);

        ctx.utime = utime + step_size;
        self.attitude.update(&ctx, step_size);
    }

    fn acs_mode(&self) -> AcsMode {
        self.attitude.mode()
    }

    fn slew_time(&self, pointing: &Pointing) -> f64 {
        self.attitude.slew_time(pointing)
    }

    fn battery_alert(&self) -> bool {
        self.power.battery().alert()
    }
}
