//! Fault monitor: per-tick classification of monitored parameters, time-in-state
//! accumulation and the sticky safe-mode request.

use crate::config::ConfigError;
use crate::fault::{Classification, Direction, ParamId, Threshold, ThresholdTable, MAX_PARAMETERS};
use crate::telemetry::Samples;
use alloc::collections::BTreeMap;
use alloc::string::String;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Accumulated state of one monitored parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterState {
    pub name: String,
    pub current: Classification,
    pub yellow_seconds: f64,
    pub red_seconds: f64,
}

impl ParameterState {
    fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            current: Classification::Nominal,
            yellow_seconds: 0.0,
            red_seconds: 0.0,
        }
    }
}

/// Read-only view returned by [`FaultMonitor::statistics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterStatistics {
    pub yellow_seconds: f64,
    pub red_seconds: f64,
    pub current: Classification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationChange {
    pub id: ParamId,
    pub name: String,
    pub from: Classification,
    pub to: Classification,
    pub value: f64,
}

/// Outcome of a single [`FaultMonitor::check`] call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    pub utime: f64,
    /// Classification of every registered parameter after this check. Parameters
    /// that were not sampled keep their previous classification.
    pub classifications: BTreeMap<String, Classification>,
    /// Parameters whose classification changed during this check, in id order.
    pub changes: alloc::vec::Vec<ClassificationChange>,
    /// True only for the check that raised the safe-mode request.
    pub safe_mode_requested: bool,
}

impl CheckReport {
    pub fn classification(&self, name: &str) -> Option<Classification> {
        self.classifications.get(name).copied()
    }

    pub fn any_red(&self) -> bool {
        self.classifications
            .values()
            .any(|c| *c == Classification::Red)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("non-finite value {value} for '{parameter}'")]
pub struct InvalidValueError {
    pub parameter: String,
    pub value: f64,
}

#[derive(Debug)]
pub struct FaultMonitor {
    table: ThresholdTable,
    states: Vec<ParameterState, MAX_PARAMETERS>,
    safe_mode_on_red: bool,
    safe_mode_requested: bool,
    safe_mode_requested_at: Option<f64>,
    check_count: u64,
}

impl FaultMonitor {
    pub fn new(safe_mode_on_red: bool) -> Self {
        Self {
            table: ThresholdTable::new(),
            states: Vec::new(),
            safe_mode_on_red,
            safe_mode_requested: false,
            safe_mode_requested_at: None,
            check_count: 0,
        }
    }

    /// Register a monitored parameter.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the name is already registered, when red is
    /// not strictly more severe than yellow for `direction`, or when the table
    /// is full.
    pub fn add_threshold(
        &mut self,
        name: &str,
        yellow: f64,
        red: f64,
        direction: Direction,
    ) -> Result<ParamId, ConfigError> {
        let threshold = Threshold::new(name, yellow, red, direction)?;
        let id = self.table.insert(threshold)?;

        // Table and state array share capacity, so this push cannot fail once
        // the insert above succeeded.
        let pushed = self.states.push(ParameterState::new(name));
        debug_assert!(pushed.is_ok(), "state array out of step with threshold table");
        debug_assert_eq!(self.states.len(), self.table.len());

        debug!(parameter = name, %direction, yellow, red, "threshold registered");
        Ok(id)
    }

    /// Classify every registered parameter present in `samples` and accumulate
    /// time-in-state.
    ///
    /// The call is atomic: when it fails nothing is updated.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidValueError`] if a sampled value of a registered
    /// parameter is not finite, or if `step_size` is negative or not finite.
    pub fn check(
        &mut self,
        samples: &Samples,
        utime: f64,
        step_size: f64,
    ) -> Result<CheckReport, InvalidValueError> {
        if !step_size.is_finite() || step_size < 0.0 {
            return Err(InvalidValueError {
                parameter: "step_size".into(),
                value: step_size,
            });
        }

        for (_, threshold) in self.table.iter() {
            if let Some(value) = samples.get(threshold.name()) {
                if !value.is_finite() {
                    return Err(InvalidValueError {
                        parameter: threshold.name().into(),
                        value,
                    });
                }
            }
        }

        self.check_count += 1;
        let mut report = CheckReport {
            utime,
            ..CheckReport::default()
        };
        let mut saw_red = false;

        for (id, threshold) in self.table.iter() {
            let state = &mut self.states[id.index()];

            if let Some(value) = samples.get(threshold.name()) {
                let classification = threshold.classify(value);

                match classification {
                    Classification::Yellow => state.yellow_seconds += step_size,
                    Classification::Red => {
                        state.red_seconds += step_size;
                        saw_red = true;
                    }
                    Classification::Nominal => {}
                }

                if classification != state.current {
                    report.changes.push(ClassificationChange {
                        id,
                        name: state.name.clone(),
                        from: state.current,
                        to: classification,
                        value,
                    });
                    state.current = classification;
                }
            }

            report
                .classifications
                .insert(state.name.clone(), state.current);
        }

        if saw_red && self.safe_mode_on_red && !self.safe_mode_requested {
            self.safe_mode_requested = true;
            self.safe_mode_requested_at = Some(utime);
            report.safe_mode_requested = true;
            warn!(utime, "RED limit reached, safe mode requested");
        }

        Ok(report)
    }

    /// Raise the safe-mode request without a RED classification (ground command).
    /// Returns true if this call raised it.
    pub fn force_safe_mode(&mut self, utime: f64) -> bool {
        if self.safe_mode_requested {
            return false;
        }
        self.safe_mode_requested = true;
        self.safe_mode_requested_at = Some(utime);
        true
    }

    pub fn safe_mode_requested(&self) -> bool {
        self.safe_mode_requested
    }

    pub fn safe_mode_requested_at(&self) -> Option<f64> {
        self.safe_mode_requested_at
    }

    pub fn safe_mode_on_red(&self) -> bool {
        self.safe_mode_on_red
    }

    pub fn statistics(&self) -> BTreeMap<String, ParameterStatistics> {
        self.states
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    ParameterStatistics {
                        yellow_seconds: s.yellow_seconds,
                        red_seconds: s.red_seconds,
                        current: s.current,
                    },
                )
            })
            .collect()
    }

    pub fn state(&self, name: &str) -> Option<&ParameterState> {
        self.table
            .lookup(name)
            .and_then(|id| self.states.get(id.index()))
    }

    pub fn states(&self) -> &[ParameterState] {
        &self.states
    }

    pub fn thresholds(&self) -> &ThresholdTable {
        &self.table
    }

    pub fn check_count(&self) -> u64 {
        self.check_count
    }
}

impl Default for FaultMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}
