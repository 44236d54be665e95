//! Declarative run configuration, loaded once before the run.
//!
//! ```json
//! {
//!   "begin": 1543276800.0,
//!   "end": 1543363200.0,
//!   "step_size": 60.0,
//!   "fault_management": {
//!     "thresholds": {
//!       "battery_level": { "name": "battery_level", "yellow": 0.5, "red": 0.4, "direction": "below" },
//!       "temperature": { "name": "temperature", "yellow": 50.0, "red": 60.0, "direction": "above" }
//!     },
//!     "safe_mode_on_red": true
//!   }
//! }
//! ```

use crate::fault::Direction;
use crate::safety::FaultMonitor;
use crate::subsystems::SpacecraftConfig;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_STEP_SIZE_S: f64 = 60.0;
pub const DEFAULT_EVENT_BATCH_SIZE: usize = 64;
pub const BATTERY_LEVEL: &str = "battery_level";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("threshold '{0}' is already registered")]
    DuplicateThreshold(String),
    #[error("threshold '{name}': red {red} is not more severe than yellow {yellow} for direction '{direction}'")]
    SeverityOrder {
        name: String,
        yellow: f64,
        red: f64,
        direction: Direction,
    },
    #[error("threshold '{name}' has a non-finite limit")]
    NonFiniteLimit { name: String },
    #[error("threshold name must not be empty")]
    EmptyName,
    #[error("too many monitored parameters (capacity {capacity})")]
    TooManyParameters { capacity: usize },
    #[error("unknown threshold direction '{0}'")]
    UnknownDirection(String),
    #[error("threshold keyed '{key}' is named '{name}'")]
    NameMismatch { key: String, name: String },
    #[error("step size must be positive and finite, got {0}")]
    InvalidStepSize(f64),
    #[error("invalid time range: begin {begin}, end {end}")]
    InvalidTimeRange { begin: f64, end: f64 },
    #[error("event batch size must be at least 1")]
    InvalidBatchSize,
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("invalid spacecraft model: {0}")]
    InvalidSpacecraft(String),
    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("configuration I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub name: String,
    pub yellow: f64,
    pub red: f64,
    #[serde(default = "default_direction")]
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultManagementConfig {
    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdConfig>,
    #[serde(default = "default_true")]
    pub safe_mode_on_red: bool,
}

impl Default for FaultManagementConfig {
    fn default() -> Self {
        Self {
            thresholds: BTreeMap::new(),
            safe_mode_on_red: true,
        }
    }
}

impl FaultManagementConfig {
    /// Build a fault monitor with every configured threshold registered.
    ///
    /// Thresholds are registered in name order, which fixes their ids.
    pub fn build(&self) -> Result<FaultMonitor, ConfigError> {
        let mut monitor = FaultMonitor::new(self.safe_mode_on_red);

        for (key, threshold) in &self.thresholds {
            if *key != threshold.name {
                return Err(ConfigError::NameMismatch {
                    key: key.clone(),
                    name: threshold.name.clone(),
                });
            }
            monitor.add_threshold(
                &threshold.name,
                threshold.yellow,
                threshold.red,
                threshold.direction,
            )?;
        }

        Ok(monitor)
    }

    /// Add a `battery_level` threshold derived from the battery's allowed depth
    /// of discharge, unless one is configured already.
    pub fn ensure_battery_threshold(&mut self, max_depth_of_discharge: f64) {
        if self.thresholds.contains_key(BATTERY_LEVEL) {
            return;
        }

        let yellow = 1.0 - max_depth_of_discharge;
        let red = (yellow - 0.1).max(0.0);
        self.thresholds.insert(
            BATTERY_LEVEL.into(),
            ThresholdConfig {
                name: BATTERY_LEVEL.into(),
                yellow,
                red,
                direction: Direction::Below,
            },
        );
    }
}

/// Sun avoidance and other constraint settings applied to every target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintConfig {
    #[serde(default)]
    pub sun_avoidance_deg: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub obsid: u32,
    pub ra: f64,
    pub dec: f64,
    #[serde(default)]
    pub roll: f64,
    #[serde(default)]
    pub priority: i32,
    pub duration: f64,
    /// Visibility windows as `[start, end)` pairs in unix seconds. Empty means
    /// always visible.
    #[serde(default)]
    pub windows: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub run_id: Option<String>,
    pub begin: f64,
    pub end: f64,
    #[serde(default = "default_step_size")]
    pub step_size: f64,
    #[serde(default)]
    pub fault_management: Option<FaultManagementConfig>,
    #[serde(default)]
    pub spacecraft: SpacecraftConfig,
    #[serde(default = "default_true")]
    pub emergency_charging: bool,
    #[serde(default = "default_event_batch_size")]
    pub event_batch_size: usize,
    #[serde(default)]
    pub constraints: ConstraintConfig,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl SimulationConfig {
    pub fn new(begin: f64, end: f64, step_size: f64) -> Self {
        Self {
            run_id: None,
            begin,
            end,
            step_size,
            fault_management: None,
            spacecraft: SpacecraftConfig::default(),
            emergency_charging: true,
            event_batch_size: DEFAULT_EVENT_BATCH_SIZE,
            constraints: ConstraintConfig::default(),
            targets: Vec::new(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Fail-fast validation of everything that can be checked before the run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.step_size.is_finite() || self.step_size <= 0.0 {
            return Err(ConfigError::InvalidStepSize(self.step_size));
        }

        if !self.begin.is_finite() || !self.end.is_finite() || self.end <= self.begin {
            return Err(ConfigError::InvalidTimeRange {
                begin: self.begin,
                end: self.end,
            });
        }

        if self.event_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }

        if let Some(angle) = self.constraints.sun_avoidance_deg {
            if !(0.0..=180.0).contains(&angle) {
                return Err(ConfigError::InvalidTarget(alloc::format!(
                    "sun avoidance angle {angle} outside [0, 180]"
                )));
            }
        }

        for target in &self.targets {
            for window in &target.windows {
                if window[0].partial_cmp(&window[1]) != Some(core::cmp::Ordering::Less) {
                    return Err(ConfigError::InvalidTarget(alloc::format!(
                        "obsid {}: empty visibility window [{}, {})",
                        target.obsid, window[0], window[1]
                    )));
                }
            }
        }

        self.spacecraft.validate()?;
        self.fault_monitor().map(|_| ())
    }

    /// Build the configured fault monitor, or `None` when fault management is
    /// not configured.
    pub fn fault_monitor(&self) -> Result<Option<FaultMonitor>, ConfigError> {
        match &self.fault_management {
            Some(fm) => {
                let mut fm = fm.clone();
                fm.ensure_battery_threshold(self.spacecraft.battery.max_depth_of_discharge);
                fm.build().map(Some)
            }
            None => Ok(None),
        }
    }

    /// Number of ticks the run will execute.
    pub fn tick_count(&self) -> u64 {
        ((self.end - self.begin) / self.step_size).ceil() as u64
    }
}

fn default_true() -> bool {
    true
}

fn default_direction() -> Direction {
    Direction::Below
}

fn default_step_size() -> f64 {
    DEFAULT_STEP_SIZE_S
}

fn default_event_batch_size() -> usize {
    DEFAULT_EVENT_BATCH_SIZE
}
