//! Time-stepped control loop.
//!
//! Each tick samples the bus, runs the fault monitor, performs the safe-mode
//! transition when one has been requested, schedules observations, dispatches
//! the command queue and finally propagates the subsystem models across the
//! step. Safe mode is terminal: once entered, the loop keeps the spacecraft in
//! its minimal-risk configuration until the end of the run.

use crate::command::{Command, CommandQueue, CommandQueueFull, CommandType};
use crate::config::{ConfigError, SimulationConfig, BATTERY_LEVEL, DEFAULT_EVENT_BATCH_SIZE};
use crate::constraint::{AllOf, Constraint, SunAvoidance, VisibilityWindows};
use crate::event::{Event, EventLog, EventType};
use crate::safety::{CheckReport, FaultMonitor, ParameterStatistics};
use crate::store::{EventSink, SinkError};
use crate::subsystems::{AcsMode, Spacecraft, SpacecraftBus};
use crate::targets::{Plan, PlanEntry, Pointing, Target, TargetError, TargetQueue};
use crate::telemetry::Samples;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    CommandQueue(#[from] CommandQueueFull),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error("safe mode is active, new targets are not accepted")]
    SafeModeActive,
    #[error("simulation has reached its end time")]
    Finished,
}

/// Discrete mission clock. Time is derived from the tick count, never summed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationClock {
    begin: f64,
    end: f64,
    step_size: f64,
    ticks: u64,
}

impl SimulationClock {
    pub fn new(begin: f64, end: f64, step_size: f64) -> Result<Self, ConfigError> {
        if !step_size.is_finite() || step_size <= 0.0 {
            return Err(ConfigError::InvalidStepSize(step_size));
        }
        if !begin.is_finite() || !end.is_finite() || end <= begin {
            return Err(ConfigError::InvalidTimeRange { begin, end });
        }
        Ok(Self {
            begin,
            end,
            step_size,
            ticks: 0,
        })
    }

    /// Time of the next tick to execute.
    pub fn utime(&self) -> f64 {
        self.begin + self.ticks as f64 * self.step_size
    }

    pub fn is_finished(&self) -> bool {
        self.utime() >= self.end
    }

    /// Yield the current tick's time and move to the next tick.
    pub fn advance(&mut self) -> Option<f64> {
        if self.is_finished() {
            return None;
        }
        let utime = self.utime();
        self.ticks += 1;
        Some(utime)
    }

    pub fn begin(&self) -> f64 {
        self.begin
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimState {
    Running,
    SafeMode,
}

/// What a single tick did, for callers that drive the loop themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub utime: f64,
    pub state: SimState,
    pub report: Option<CheckReport>,
    pub degraded: Vec<(String, f64)>,
    pub entered_safe_mode: bool,
    pub target_queried: bool,
    /// Command queue contents right before dispatch.
    pub queued: Vec<Command>,
    pub dispatched: Vec<Command>,
    pub rejected: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub begin: f64,
    pub end: f64,
    pub ticks: u64,
    pub final_state: SimState,
    pub cancelled: bool,
    pub safe_mode_entered_at: Option<f64>,
    pub observations_completed: usize,
    pub observations_aborted: usize,
    pub total_exposure_s: f64,
    pub commands_dispatched: u32,
    pub commands_rejected: u32,
    pub targets_remaining: usize,
    /// Seconds spent in each ACS mode, keyed by mode name.
    pub mode_seconds: BTreeMap<String, f64>,
    pub min_battery_level: Option<f64>,
    pub events_logged: usize,
    pub statistics: BTreeMap<String, ParameterStatistics>,
}

pub struct Simulation<B: SpacecraftBus> {
    bus: B,
    clock: SimulationClock,
    state: SimState,
    monitor: Option<FaultMonitor>,
    targets: TargetQueue,
    commands: CommandQueue,
    log: EventLog,
    sink: Option<Box<dyn EventSink>>,
    constraint: Box<dyn Constraint>,
    plan: Plan,
    active: Option<PlanEntry>,
    charging: bool,
    emergency_charging: bool,
    safe_mode_commanded: bool,
    safe_mode_entered_at: Option<f64>,
    next_command_id: u32,
    samples: Samples,
    started: bool,
    finished: bool,
    commands_dispatched: u32,
    commands_rejected: u32,
    mode_seconds: BTreeMap<String, f64>,
    min_battery_level: Option<f64>,
}

impl<B: SpacecraftBus> core::fmt::Debug for Simulation<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Simulation")
            .field("run_id", &self.log.run_id())
            .field("clock", &self.clock)
            .field("state", &self.state)
            .field("targets", &self.targets.len())
            .field("commands", &self.commands.len())
            .field("events", &self.log.len())
            .finish()
    }
}

impl Simulation<Spacecraft> {
    /// Build a run on the reference spacecraft from a validated configuration.
    pub fn from_config(config: &SimulationConfig) -> Result<Self, SimError> {
        Self::from_config_with_bus(config, Spacecraft::new(&config.spacecraft))
    }
}

impl<B: SpacecraftBus> Simulation<B> {
    pub fn new(
        bus: B,
        clock: SimulationClock,
        monitor: Option<FaultMonitor>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            clock,
            state: SimState::Running,
            monitor,
            targets: TargetQueue::new(),
            commands: CommandQueue::new(),
            log: EventLog::new(run_id, DEFAULT_EVENT_BATCH_SIZE),
            sink: None,
            constraint: Box::new(|_: &Target, _: f64| true),
            plan: Plan::new(),
            active: None,
            charging: false,
            emergency_charging: true,
            safe_mode_commanded: false,
            safe_mode_entered_at: None,
            next_command_id: 1,
            samples: Samples::new(),
            started: false,
            finished: false,
            commands_dispatched: 0,
            commands_rejected: 0,
            mode_seconds: BTreeMap::new(),
            min_battery_level: None,
        }
    }

    /// Build a run from a configuration on a caller-supplied bus.
    pub fn from_config_with_bus(config: &SimulationConfig, bus: B) -> Result<Self, SimError> {
        config.validate()?;

        let clock = SimulationClock::new(config.begin, config.end, config.step_size)?;
        let run_id = config
            .run_id
            .clone()
            .unwrap_or_else(|| format!("ditl-{}", config.begin as i64));

        let mut sim = Self::new(bus, clock, config.fault_monitor()?, run_id)
            .with_event_batch_size(config.event_batch_size)
            .with_emergency_charging(config.emergency_charging);

        let mut constraints = AllOf::new();
        if let Some(angle) = config.constraints.sun_avoidance_deg {
            constraints = constraints.with(SunAvoidance::new(angle));
        }
        let mut windows = VisibilityWindows::new();
        for target in &config.targets {
            for window in &target.windows {
                windows.add_window(target.obsid, window[0], window[1]);
            }
        }
        if !windows.is_empty() {
            constraints = constraints.with(windows);
        }
        if !constraints.is_empty() {
            sim = sim.with_constraint(constraints);
        }

        for target in &config.targets {
            sim.add_target(
                Pointing::new(target.obsid, target.ra, target.dec, target.roll),
                target.priority,
                target.duration,
            )?;
        }

        Ok(sim)
    }

    pub fn with_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_constraint(mut self, constraint: impl Constraint + 'static) -> Self {
        self.constraint = Box::new(constraint);
        self
    }

    /// Only takes effect before the first event has been logged.
    pub fn with_event_batch_size(mut self, batch_size: usize) -> Self {
        if self.log.is_empty() {
            self.log = EventLog::new(self.log.run_id(), batch_size);
        }
        self
    }

    pub fn with_emergency_charging(mut self, enabled: bool) -> Self {
        self.emergency_charging = enabled;
        self
    }

    /// Queue a candidate observation. Refused once safe mode is active.
    pub fn add_target(
        &mut self,
        pointing: Pointing,
        priority: i32,
        duration: f64,
    ) -> Result<u64, SimError> {
        if self.state == SimState::SafeMode {
            return Err(SimError::SafeModeActive);
        }
        Ok(self.targets.add_target(pointing, priority, duration)?)
    }

    /// Ground-commanded safe mode, taken on the next tick.
    pub fn request_safe_mode(&mut self) {
        let utime = self.clock.utime();
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.force_safe_mode(utime);
        }
        self.safe_mode_commanded = true;
    }

    fn safe_mode_requested(&self) -> bool {
        self.safe_mode_commanded
            || self
                .monitor
                .as_ref()
                .is_some_and(FaultMonitor::safe_mode_requested)
    }

    fn next_command(&mut self, command_type: CommandType, utime: f64) -> Command {
        let command = Command {
            id: self.next_command_id,
            command_type,
            issued_at: utime,
        };
        self.next_command_id = self.next_command_id.wrapping_add(1);
        command
    }

    fn enqueue(&mut self, command_type: CommandType, utime: f64) -> Result<(), SimError> {
        let command = self.next_command(command_type, utime);
        self.commands.enqueue(command)?;
        Ok(())
    }

    /// Close out the active observation, completed or not.
    fn end_observation(&mut self, utime: f64, completed: bool, reason: &str) {
        let Some(mut entry) = self.active.take() else {
            return;
        };

        entry.completed = completed;
        if !completed {
            entry.end = utime;
        }
        self.plan.push(entry);

        let description = if completed {
            format!(
                "obsid {} completed, {:.0} s on target",
                entry.obsid(),
                entry.exposure()
            )
        } else {
            format!("obsid {} aborted: {reason}", entry.obsid())
        };
        let mode = self.bus.acs_mode();
        self.log.append(
            Event::new(utime, EventType::Observation, description)
                .with_obsid(Some(entry.obsid()))
                .with_acs_mode(mode),
        );
    }

    /// Execute one tick.
    ///
    /// # Errors
    ///
    /// [`SimError::Finished`] once the clock has reached the end time, and
    /// any error that aborts the run (full command queue, sink failure).
    pub fn tick(&mut self) -> Result<TickOutcome, SimError> {
        let utime = self.clock.advance().ok_or(SimError::Finished)?;
        let step_size = self.clock.step_size();

        if !self.started {
            self.started = true;
            info!(run_id = %self.log.run_id(), begin = self.clock.begin(), end = self.clock.end(), "run started");
            let description = format!(
                "run {} started: {} to {}, step {} s",
                self.log.run_id(),
                self.clock.begin(),
                self.clock.end(),
                step_size
            );
            self.log.append(Event::new(utime, EventType::Run, description));
        }

        let mut outcome = TickOutcome {
            utime,
            state: self.state,
            report: None,
            degraded: Vec::new(),
            entered_safe_mode: false,
            target_queried: false,
            queued: Vec::new(),
            dispatched: Vec::new(),
            rejected: Vec::new(),
        };

        self.sample(utime, &mut outcome);
        self.check_faults(utime, step_size, &mut outcome);

        if self.state == SimState::Running && self.safe_mode_requested() {
            self.enter_safe_mode(utime)?;
            outcome.entered_safe_mode = true;
        }

        match self.state {
            SimState::SafeMode => {
                if !outcome.entered_safe_mode {
                    self.bus.hold_safe_mode(utime);
                }
            }
            SimState::Running => self.schedule(utime, &mut outcome)?,
        }

        outcome.queued = self.commands.iter().copied().collect();
        self.dispatch_commands(utime, &mut outcome);

        let mode = self.bus.acs_mode();
        let elapsed = step_size.min(self.clock.end() - utime);
        *self.mode_seconds.entry(mode.as_str().into()).or_insert(0.0) += elapsed;

        self.bus.advance(utime, step_size);

        if let Some(sink) = self.sink.as_deref_mut() {
            self.log.flush_full_batches(sink)?;
        }

        outcome.state = self.state;
        Ok(outcome)
    }

    fn sample(&mut self, utime: f64, outcome: &mut TickOutcome) {
        self.samples.clear();
        self.bus.sample(utime, &mut self.samples);

        // Bad readings are dropped here so the monitor leaves those
        // parameters exactly as they were.
        outcome.degraded = self.samples.take_non_finite();
        for (name, value) in &outcome.degraded {
            warn!(utime, parameter = %name, value, "degraded sample dropped");
            self.log.append(Event::new(
                utime,
                EventType::DegradedSample,
                format!("non-finite value {value} for '{name}', sample ignored"),
            ));
        }

        if let Some(level) = self.samples.get(BATTERY_LEVEL) {
            self.min_battery_level = Some(self.min_battery_level.map_or(level, |m| m.min(level)));
        }
    }

    fn check_faults(&mut self, utime: f64, step_size: f64, outcome: &mut TickOutcome) {
        let Some(monitor) = self.monitor.as_mut() else {
            return;
        };

        match monitor.check(&self.samples, utime, step_size) {
            Ok(report) => {
                for change in &report.changes {
                    debug!(utime, parameter = %change.name, from = %change.from, to = %change.to, "classification changed");
                    self.log.append(Event::new(
                        utime,
                        EventType::Classification,
                        format!(
                            "{}: {} -> {} (value {})",
                            change.name, change.from, change.to, change.value
                        ),
                    ));
                }
                outcome.report = Some(report);
            }
            Err(err) => {
                warn!(utime, error = %err, "fault check skipped");
                self.log.append(Event::new(
                    utime,
                    EventType::DegradedSample,
                    format!("fault check skipped: {err}"),
                ));
            }
        }
    }

    fn enter_safe_mode(&mut self, utime: f64) -> Result<(), SimError> {
        let cleared = self.commands.len();
        self.commands.clear();
        self.enqueue(CommandType::EnterSafeMode, utime)?;

        self.end_observation(utime, false, "safe mode");
        self.charging = false;
        self.state = SimState::SafeMode;
        self.safe_mode_entered_at = Some(utime);

        warn!(utime, cleared, "entering safe mode");
        let mode = self.bus.acs_mode();
        self.log.append(
            Event::new(
                utime,
                EventType::SafeMode,
                format!("safe mode entered, {cleared} pending commands cleared"),
            )
            .with_acs_mode(mode),
        );
        Ok(())
    }

    fn schedule(&mut self, utime: f64, outcome: &mut TickOutcome) -> Result<(), SimError> {
        if let Some(entry) = self.active {
            if utime >= entry.end {
                self.end_observation(utime, true, "");
                self.enqueue(CommandType::EndObservation { obsid: entry.obsid() }, utime)?;
            } else if !self.constraint.is_feasible(&entry.target, utime) {
                // Occulted or sun-blocked mid-observation; the queue is asked
                // for a replacement below in the same tick.
                info!(utime, obsid = entry.obsid(), "target constrained, observation ended");
                self.end_observation(utime, false, "target constrained");
                self.enqueue(CommandType::EndObservation { obsid: entry.obsid() }, utime)?;
            }
        }

        if self.emergency_charging {
            let alert = self.bus.battery_alert();
            if alert && !self.charging {
                if let Some(entry) = self.active {
                    self.end_observation(utime, false, "battery charge alert");
                    self.enqueue(CommandType::EndObservation { obsid: entry.obsid() }, utime)?;
                }
                self.enqueue(CommandType::StartBatteryCharge, utime)?;
                self.charging = true;
                info!(utime, "emergency charging started");
                self.log.append(Event::new(
                    utime,
                    EventType::Charging,
                    "battery charge alert, emergency charging started",
                ));
            } else if !alert && self.charging {
                self.enqueue(CommandType::EndBatteryCharge, utime)?;
                self.charging = false;
                info!(utime, "emergency charging ended");
                self.log.append(Event::new(
                    utime,
                    EventType::Charging,
                    "battery recharged, emergency charging ended",
                ));
            }
        }

        if self.active.is_some() || self.charging {
            return Ok(());
        }

        outcome.target_queried = true;
        let constraint = &self.constraint;
        let next = self
            .targets
            .pop_next(utime, |target, now| constraint.is_feasible(target, now));

        match next {
            Some(target) => {
                let slew_time = self.bus.slew_time(&target.pointing);
                let entry = PlanEntry::new(target, utime, slew_time);
                self.active = Some(entry);
                self.enqueue(
                    CommandType::SlewToTarget {
                        pointing: target.pointing,
                    },
                    utime,
                )?;
                self.log.append(
                    Event::new(
                        utime,
                        EventType::Queue,
                        format!(
                            "obsid {} selected (priority {}, slew {:.0} s, {:.0} s on target)",
                            target.pointing.obsid, target.priority, slew_time, target.duration
                        ),
                    )
                    .with_obsid(Some(target.pointing.obsid)),
                );
            }
            None => {
                if !self.targets.is_empty() {
                    debug!(utime, queued = self.targets.len(), "no feasible target");
                }
            }
        }

        Ok(())
    }

    fn dispatch_commands(&mut self, utime: f64, outcome: &mut TickOutcome) {
        for command in self.commands.drain() {
            let obsid = command.command_type.obsid();
            match self.bus.dispatch(&command, utime) {
                Ok(()) => {
                    self.commands_dispatched += 1;
                    let mode = self.bus.acs_mode();
                    self.log.append(
                        Event::new(utime, EventType::Command, command.to_string())
                            .with_obsid(obsid)
                            .with_acs_mode(mode),
                    );
                    outcome.dispatched.push(command);
                }
                Err(err) => {
                    self.commands_rejected += 1;
                    warn!(utime, command = %command, error = %err, "command rejected");
                    let mode = self.bus.acs_mode();
                    self.log.append(
                        Event::new(utime, EventType::CommandRejected, format!("{command}: {err}"))
                            .with_obsid(obsid)
                            .with_acs_mode(mode),
                    );
                    outcome.rejected.push(command);

                    // A target that was never slewed to cannot be observed
                    if let CommandType::SlewToTarget { pointing } = command.command_type {
                        if self.active.is_some_and(|entry| entry.obsid() == pointing.obsid) {
                            self.end_observation(utime, false, "slew rejected");
                        }
                    }
                }
            }
        }
    }

    /// Run every remaining tick.
    pub fn run(&mut self) -> Result<RunSummary, SimError> {
        self.run_until_cancelled(&AtomicBool::new(false))
    }

    /// Run until the end time or until `cancel` is set. Cancellation is
    /// observed between ticks only. Pending events are flushed either way,
    /// including when a tick fails.
    pub fn run_until_cancelled(&mut self, cancel: &AtomicBool) -> Result<RunSummary, SimError> {
        let result = self.run_ticks(cancel);
        let flushed = self.finish();

        match result {
            Ok(cancelled) => {
                flushed?;
                Ok(self.summary(cancelled))
            }
            Err(err) => {
                if let Err(flush_err) = flushed {
                    warn!(error = %flush_err, "final event flush failed after abort");
                }
                Err(err)
            }
        }
    }

    fn run_ticks(&mut self, cancel: &AtomicBool) -> Result<bool, SimError> {
        while !self.clock.is_finished() {
            if cancel.load(Ordering::Relaxed) {
                info!(utime = self.clock.utime(), "run cancelled");
                return Ok(true);
            }
            self.tick()?;
        }
        Ok(false)
    }

    /// Log the end-of-run event and flush everything still pending.
    pub fn finish(&mut self) -> Result<(), SimError> {
        if !self.finished {
            self.finished = true;
            let utime = self.clock.utime().min(self.clock.end());
            let description = format!(
                "run {} ended after {} ticks in state {:?}",
                self.log.run_id(),
                self.clock.ticks(),
                self.state
            );
            self.log.append(Event::new(utime, EventType::Run, description));
            info!(run_id = %self.log.run_id(), ticks = self.clock.ticks(), "run finished");
        }

        if let Some(sink) = self.sink.as_deref_mut() {
            self.log.flush_all(sink)?;
        }
        Ok(())
    }

    pub fn summary(&self, cancelled: bool) -> RunSummary {
        RunSummary {
            run_id: self.log.run_id().into(),
            begin: self.clock.begin(),
            end: self.clock.end(),
            ticks: self.clock.ticks(),
            final_state: self.state,
            cancelled,
            safe_mode_entered_at: self.safe_mode_entered_at,
            observations_completed: self.plan.completed().count(),
            observations_aborted: self.plan.len() - self.plan.completed().count(),
            total_exposure_s: self.plan.total_exposure(),
            commands_dispatched: self.commands_dispatched,
            commands_rejected: self.commands_rejected,
            targets_remaining: self.targets.len(),
            mode_seconds: self.mode_seconds.clone(),
            min_battery_level: self.min_battery_level,
            events_logged: self.log.len(),
            statistics: self.statistics(),
        }
    }

    /// Per-parameter fault statistics; empty without a fault monitor.
    pub fn statistics(&self) -> BTreeMap<String, ParameterStatistics> {
        self.monitor
            .as_ref()
            .map(FaultMonitor::statistics)
            .unwrap_or_default()
    }

    pub fn state(&self) -> SimState {
        self.state
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn monitor(&self) -> Option<&FaultMonitor> {
        self.monitor.as_ref()
    }

    pub fn target_queue(&self) -> &TargetQueue {
        &self.targets
    }

    pub fn command_queue(&self) -> &CommandQueue {
        &self.commands
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn active_observation(&self) -> Option<&PlanEntry> {
        self.active.as_ref()
    }

    pub fn is_charging(&self) -> bool {
        self.charging
    }

    pub fn current_mode(&self) -> AcsMode {
        self.bus.acs_mode()
    }
}
