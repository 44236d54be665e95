//! Threshold table: static yellow/red limits for every monitored parameter.
//!
//! Each threshold is assigned a dense [`ParamId`] when it is registered. The
//! fault monitor keeps its per-parameter state in an array indexed by that id,
//! and the name lookup built here is never modified after setup.

use crate::config::ConfigError;
use alloc::collections::BTreeMap;
use alloc::string::String;
use heapless::Vec;
use serde::{Deserialize, Serialize};

/// Maximum number of monitored parameters.
pub const MAX_PARAMETERS: usize = 32;

// Every slot must be addressable by a ParamId
static_assertions::const_assert!(MAX_PARAMETERS <= u8::MAX as usize + 1);

/// Which way a parameter has to move to be considered faulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Fault when the value drops to or below the limit (battery level).
    Below,
    /// Fault when the value rises to or above the limit (temperature, power draw).
    Above,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Below => "below",
            Direction::Above => "above",
        }
    }
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Direction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "below" => Ok(Direction::Below),
            "above" => Ok(Direction::Above),
            other => Err(ConfigError::UnknownDirection(other.into())),
        }
    }
}

/// Per-tick fault severity of one parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    #[default]
    Nominal,
    Yellow,
    Red,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Nominal => "nominal",
            Classification::Yellow => "yellow",
            Classification::Red => "red",
        }
    }
}

impl core::fmt::Display for Classification {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Yellow/red limits for a single parameter.
///
/// Construction through [`Threshold::new`] guarantees that red is strictly more
/// severe than yellow in the configured direction and that both limits are
/// finite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Threshold {
    name: String,
    yellow: f64,
    red: f64,
    direction: Direction,
}

impl Threshold {
    pub fn new(
        name: impl Into<String>,
        yellow: f64,
        red: f64,
        direction: Direction,
    ) -> Result<Self, ConfigError> {
        let name = name.into();

        if name.is_empty() {
            return Err(ConfigError::EmptyName);
        }

        if !yellow.is_finite() || !red.is_finite() {
            return Err(ConfigError::NonFiniteLimit { name });
        }

        let ordered = match direction {
            Direction::Below => red < yellow,
            Direction::Above => red > yellow,
        };
        if !ordered {
            return Err(ConfigError::SeverityOrder {
                name,
                yellow,
                red,
                direction,
            });
        }

        Ok(Self {
            name,
            yellow,
            red,
            direction,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn yellow(&self) -> f64 {
        self.yellow
    }

    pub fn red(&self) -> f64 {
        self.red
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Classify a finite value against this threshold. Limits are inclusive.
    pub fn classify(&self, value: f64) -> Classification {
        debug_assert!(value.is_finite(), "classify called with non-finite value {value}");

        match self.direction {
            Direction::Below => {
                if value <= self.red {
                    Classification::Red
                } else if value <= self.yellow {
                    Classification::Yellow
                } else {
                    Classification::Nominal
                }
            }
            Direction::Above => {
                if value >= self.red {
                    Classification::Red
                } else if value >= self.yellow {
                    Classification::Yellow
                } else {
                    Classification::Nominal
                }
            }
        }
    }
}

/// Stable dense index of a registered parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParamId(pub u8);

impl ParamId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Registered thresholds in registration order plus a name lookup.
#[derive(Debug, Default)]
pub struct ThresholdTable {
    thresholds: Vec<Threshold, MAX_PARAMETERS>,
    index: BTreeMap<String, ParamId>,
}

impl ThresholdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a threshold and return the id assigned to it.
    pub fn insert(&mut self, threshold: Threshold) -> Result<ParamId, ConfigError> {
        if self.index.contains_key(threshold.name()) {
            return Err(ConfigError::DuplicateThreshold(threshold.name.clone()));
        }

        let id = ParamId(self.thresholds.len() as u8);
        let name = threshold.name.clone();
        self.thresholds
            .push(threshold)
            .map_err(|_| ConfigError::TooManyParameters {
                capacity: MAX_PARAMETERS,
            })?;
        self.index.insert(name, id);

        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<ParamId> {
        self.index.get(name).copied()
    }

    pub fn get(&self, id: ParamId) -> Option<&Threshold> {
        self.thresholds.get(id.index())
    }

    pub fn by_name(&self, name: &str) -> Option<&Threshold> {
        self.lookup(name).and_then(|id| self.get(id))
    }

    /// Thresholds with their ids, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (ParamId, &Threshold)> {
        self.thresholds
            .iter()
            .enumerate()
            .map(|(i, t)| (ParamId(i as u8), t))
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }
}
