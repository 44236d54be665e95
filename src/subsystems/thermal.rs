use super::{BusContext, Subsystem};
use crate::command::{Command, DispatchError};
use crate::config::ConfigError;
use crate::telemetry::Samples;
use serde::{Deserialize, Serialize};

pub const TEMPERATURE: &str = "temperature";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalConfig {
    pub initial_temp_c: f64,
    /// Equilibrium temperature with no internal dissipation.
    pub base_temp_c: f64,
    /// Equilibrium rise per watt dissipated.
    pub heating_c_per_w: f64,
    pub time_constant_s: f64,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            initial_temp_c: 20.0,
            base_temp_c: 5.0,
            heating_c_per_w: 0.12,
            time_constant_s: 1800.0,
        }
    }
}

impl ThermalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.time_constant_s.is_finite() || self.time_constant_s <= 0.0 {
            return Err(ConfigError::InvalidSpacecraft(
                "thermal time constant must be positive".into(),
            ));
        }
        if ![self.initial_temp_c, self.base_temp_c, self.heating_c_per_w]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(ConfigError::InvalidSpacecraft(
                "thermal parameters must be finite".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalState {
    pub temperature_c: f64,
    pub equilibrium_c: f64,
}

/// Single-node thermal model relaxing toward a power-dependent equilibrium.
#[derive(Debug)]
pub struct ThermalSystem {
    state: ThermalState,
    config: ThermalConfig,
}

impl ThermalSystem {
    pub fn new(config: ThermalConfig) -> Self {
        Self {
            state: ThermalState {
                temperature_c: config.initial_temp_c,
                equilibrium_c: config.initial_temp_c,
            },
            config,
        }
    }

    pub fn temperature_c(&self) -> f64 {
        self.state.temperature_c
    }

    fn equilibrium(&self, power_draw_w: f64) -> f64 {
        self.config.base_temp_c + self.config.heating_c_per_w * power_draw_w
    }

    pub fn sample(&self, samples: &mut Samples) {
        samples.insert(TEMPERATURE, self.state.temperature_c);
    }
}

impl Subsystem for ThermalSystem {
    type State = ThermalState;

    fn update(&mut self, ctx: &BusContext, dt_s: f64) {
        let target = self.equilibrium(ctx.power_draw_w);
        let alpha = 1.0 - (-dt_s / self.config.time_constant_s).exp();
        self.state.temperature_c += (target - self.state.temperature_c) * alpha;
        self.state.equilibrium_c = target;
    }

    fn execute_command(&mut self, _command: &Command, _utime: f64) -> Result<(), DispatchError> {
        Ok(())
    }

    fn get_state(&self) -> Self::State {
        self.state.clone()
    }
}
