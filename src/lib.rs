//! # satconops
//!
//! A deterministic Day-In-The-Life (DITL) spacecraft operations simulator.
//!
//! A run advances a discrete clock over a mission period. Every tick it samples
//! the subsystem models, classifies monitored parameters against yellow/red
//! limits, schedules observations from a priority queue and dispatches the
//! resulting commands. A RED classification raises a sticky safe-mode request;
//! the loop then clears pending commands, commands `ENTER_SAFE_MODE` and stays
//! in safe mode for the rest of the run.
//!
//! ## Quick Start
//!
//! ```rust
//! use satconops::{Direction, FaultMonitor, Pointing, Simulation, SimulationClock, Spacecraft};
//!
//! let mut monitor = FaultMonitor::new(true);
//! monitor.add_threshold("battery_level", 0.5, 0.4, Direction::Below).unwrap();
//! monitor.add_threshold("temperature", 50.0, 60.0, Direction::Above).unwrap();
//!
//! let clock = SimulationClock::new(1_543_276_800.0, 1_543_280_400.0, 60.0).unwrap();
//! let mut sim = Simulation::new(Spacecraft::default(), clock, Some(monitor), "quickstart");
//! sim.add_target(Pointing::new(1, 62.0, 21.0, 0.0), 5, 600.0).unwrap();
//!
//! let summary = sim.run().unwrap();
//! assert_eq!(summary.ticks, 60);
//! ```
//!
//! ## Architecture
//!
//! - [`fault`] - Threshold table and classification
//! - [`safety`] - Fault monitor and the safe-mode request
//! - [`targets`] - Target queue and plan record
//! - [`command`] - Command queue
//! - [`simulation`] - Clock and control loop
//! - [`event`] / [`store`] - Event log and its persistence
//! - [`subsystems`] - Reference spacecraft models
//! - [`constraint`] - Target feasibility checks
//! - [`config`] - JSON run configuration

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

extern crate alloc;

pub mod command;
pub mod config;
pub mod constraint;
pub mod event;
pub mod fault;
pub mod safety;
pub mod simulation;
pub mod store;
pub mod subsystems;
pub mod targets;
pub mod telemetry;

pub use command::{Command, CommandQueue, CommandType};
pub use config::{ConfigError, SimulationConfig};
pub use constraint::Constraint;
pub use event::{Event, EventLog, EventType};
pub use fault::{Classification, Direction, Threshold, ThresholdTable};
pub use safety::{CheckReport, FaultMonitor, InvalidValueError};
pub use simulation::{RunSummary, SimError, SimState, Simulation, SimulationClock};
pub use store::{EventSink, JsonLinesEventStore, MemoryEventStore};
pub use subsystems::{AcsMode, Spacecraft, SpacecraftBus};
pub use targets::{Pointing, Target, TargetQueue};
pub use telemetry::Samples;
