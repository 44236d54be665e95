use satconops::command::{Command, CommandType, DispatchError};
use satconops::config::{SimulationConfig, TargetConfig};
use satconops::event::{Event, EventBatch, EventType};
use satconops::fault::{Classification, Direction};
use satconops::safety::FaultMonitor;
use satconops::simulation::{SimError, SimState, Simulation, SimulationClock};
use satconops::store::{EventSink, MemoryEventStore, SinkError, StoredEvent};
use satconops::subsystems::{AcsMode, SpacecraftBus};
use satconops::targets::Pointing;
use satconops::telemetry::Samples;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::AtomicBool;

const STEP: f64 = 60.0;

/// Test double with a per-tick battery script.
struct ScriptedBus {
    battery: Vec<f64>,
    temperature: f64,
    last_battery: Cell<f64>,
    alert_below: Option<f64>,
    reject_slews: bool,
    mode: AcsMode,
    dispatched: Vec<(f64, Command)>,
    safe_holds: Vec<f64>,
    advances: Vec<f64>,
}

impl ScriptedBus {
    fn new(battery: &[f64]) -> Self {
        Self {
            battery: battery.to_vec(),
            temperature: 20.0,
            last_battery: Cell::new(1.0),
            alert_below: None,
            reject_slews: false,
            mode: AcsMode::Science,
            dispatched: Vec::new(),
            safe_holds: Vec::new(),
            advances: Vec::new(),
        }
    }

    fn dispatched_types(&self) -> Vec<&'static str> {
        self.dispatched
            .iter()
            .map(|(_, c)| c.command_type.name())
            .collect()
    }
}

impl SpacecraftBus for ScriptedBus {
    fn sample(&self, utime: f64, samples: &mut Samples) {
        let index = ((utime / STEP) as usize).min(self.battery.len() - 1);
        let level = self.battery[index];
        self.last_battery.set(level);
        samples.insert("battery_level", level);
        samples.insert("temperature", self.temperature);
    }

    fn dispatch(&mut self, command: &Command, utime: f64) -> Result<(), DispatchError> {
        match command.command_type {
            CommandType::SlewToTarget { .. } if self.reject_slews => {
                return Err(DispatchError {
                    command: command.command_type.name(),
                    reason: "wheels offline",
                });
            }
            CommandType::SlewToTarget { .. } | CommandType::EndBatteryCharge => {
                self.mode = AcsMode::Science
            }
            CommandType::StartBatteryCharge => self.mode = AcsMode::Charging,
            CommandType::EnterSafeMode => self.mode = AcsMode::SafeMode,
            CommandType::EndObservation { .. } => {}
        }
        self.dispatched.push((utime, *command));
        Ok(())
    }

    fn hold_safe_mode(&mut self, utime: f64) {
        self.safe_holds.push(utime);
    }

    fn advance(&mut self, utime: f64, _step_size: f64) {
        self.advances.push(utime);
    }

    fn acs_mode(&self) -> AcsMode {
        self.mode
    }

    fn slew_time(&self, _pointing: &Pointing) -> f64 {
        STEP
    }

    fn battery_alert(&self) -> bool {
        self.alert_below
            .is_some_and(|limit| self.last_battery.get() < limit)
    }
}

/// Sink handle the test can keep while the simulation owns a boxed copy.
#[derive(Clone, Default)]
struct SharedSink(Rc<RefCell<MemoryEventStore>>);

impl EventSink for SharedSink {
    fn store(&mut self, batch: &EventBatch) -> Result<(), SinkError> {
        self.0.borrow_mut().store(batch)
    }

    fn events_for_run(&self, run_id: &str) -> Result<Vec<Event>, SinkError> {
        self.0.borrow().events_for_run(run_id)
    }

    fn events_of_type(
        &self,
        run_id: Option<&str>,
        event_type: EventType,
    ) -> Result<Vec<StoredEvent>, SinkError> {
        self.0.borrow().events_of_type(run_id, event_type)
    }

    fn runs(&self) -> Result<Vec<String>, SinkError> {
        self.0.borrow().runs()
    }
}

fn monitor() -> FaultMonitor {
    let mut monitor = FaultMonitor::new(true);
    monitor
        .add_threshold("battery_level", 0.5, 0.4, Direction::Below)
        .unwrap();
    monitor
        .add_threshold("temperature", 50.0, 60.0, Direction::Above)
        .unwrap();
    monitor
}

fn simulation(battery: &[f64], ticks: u32, with_monitor: bool) -> Simulation<ScriptedBus> {
    let clock = SimulationClock::new(0.0, ticks as f64 * STEP, STEP).unwrap();
    let monitor = with_monitor.then(monitor);
    Simulation::new(ScriptedBus::new(battery), clock, monitor, "test-run")
}

fn count(sim: &Simulation<ScriptedBus>, event_type: EventType) -> usize {
    sim.event_log().of_type(event_type).count()
}

#[test]
fn test_red_battery_enters_safe_mode_on_first_tick() {
    let mut sim = simulation(&[0.38], 10, true);
    sim.add_target(Pointing::new(1, 10.0, 10.0, 0.0), 5, 600.0).unwrap();

    let outcome = sim.tick().unwrap();
    assert_eq!(outcome.utime, 0.0);

    let report = outcome.report.as_ref().unwrap();
    assert_eq!(report.classification("battery_level"), Some(Classification::Red));
    assert_eq!(report.classification("temperature"), Some(Classification::Nominal));
    assert!(report.safe_mode_requested);
    assert!(sim.monitor().unwrap().safe_mode_requested());

    // Exactly one ENTER_SAFE_MODE queued before dispatch, nothing else
    assert_eq!(outcome.queued.len(), 1);
    assert_eq!(outcome.queued[0].command_type, CommandType::EnterSafeMode);
    assert!(outcome.entered_safe_mode);
    assert!(!outcome.target_queried);
    assert_eq!(outcome.state, SimState::SafeMode);
    assert_eq!(sim.bus().dispatched_types(), ["ENTER_SAFE_MODE"]);

    sim.run().unwrap();
    assert_eq!(sim.target_queue().stats().queries, 0);
    assert_eq!(sim.target_queue().len(), 1);
}

#[test]
fn test_safe_mode_is_irreversible() {
    let mut sim = simulation(&[0.9, 0.35, 0.9], 6, true);
    let summary = sim.run().unwrap();

    assert_eq!(summary.final_state, SimState::SafeMode);
    assert_eq!(summary.safe_mode_entered_at, Some(60.0));
    assert_eq!(count(&sim, EventType::SafeMode), 1);
    assert_eq!(
        sim.bus()
            .dispatched_types()
            .iter()
            .filter(|t| **t == "ENTER_SAFE_MODE")
            .count(),
        1
    );

    // Held on every tick after the transition tick
    assert_eq!(sim.bus().safe_holds, [120.0, 180.0, 240.0, 300.0]);

    // Battery recovered, but the request stays raised
    assert_eq!(
        summary.statistics["battery_level"].current,
        Classification::Nominal
    );
    assert!(sim.monitor().unwrap().safe_mode_requested());
}

#[test]
fn test_targets_rejected_in_safe_mode() {
    let mut sim = simulation(&[0.1], 3, true);
    sim.tick().unwrap();
    assert!(matches!(
        sim.add_target(Pointing::new(9, 10.0, 10.0, 0.0), 1, 60.0),
        Err(SimError::SafeModeActive)
    ));
}

#[test]
fn test_safe_mode_aborts_active_observation() {
    let mut sim = simulation(&[0.9, 0.9, 0.9, 0.2], 5, true);
    sim.add_target(Pointing::new(1, 10.0, 10.0, 0.0), 1, 600.0).unwrap();

    let first = sim.tick().unwrap();
    assert!(first.target_queried);
    assert_eq!(first.dispatched[0].command_type.name(), "SLEW_TO_TARGET");
    assert!(sim.active_observation().is_some());

    sim.tick().unwrap();
    sim.tick().unwrap();
    let outcome = sim.tick().unwrap();
    assert!(outcome.entered_safe_mode);
    assert_eq!(outcome.queued.len(), 1);
    assert_eq!(outcome.queued[0].command_type, CommandType::EnterSafeMode);

    // Active observation recorded as aborted
    assert!(sim.active_observation().is_none());
    let entry = &sim.plan().entries()[0];
    assert!(!entry.completed);
    assert_eq!(entry.end, 180.0);
}

#[test]
fn test_event_order_within_transition_tick() {
    let mut sim = simulation(&[0.3], 2, true);
    sim.tick().unwrap();

    let types: Vec<EventType> = sim.event_log().events().iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        [
            EventType::Run,
            EventType::Classification,
            EventType::SafeMode,
            EventType::Command,
        ]
    );
}

#[test]
fn test_degraded_sample_leaves_parameter_untouched() {
    let mut sim = simulation(&[0.45, f64::NAN, 0.45], 3, true);

    sim.tick().unwrap();
    let outcome = sim.tick().unwrap();
    assert_eq!(outcome.degraded.len(), 1);
    assert_eq!(outcome.degraded[0].0, "battery_level");

    // Battery was skipped, temperature still classified
    let stats = sim.statistics();
    assert_eq!(stats["battery_level"].yellow_seconds, 60.0);
    assert_eq!(stats["battery_level"].current, Classification::Yellow);
    assert_eq!(count(&sim, EventType::DegradedSample), 1);

    sim.tick().unwrap();
    assert_eq!(sim.statistics()["battery_level"].yellow_seconds, 120.0);
    assert_eq!(sim.state(), SimState::Running);
}

#[test]
fn test_observation_lifecycle() {
    let mut sim = simulation(&[0.9], 10, false);
    sim.add_target(Pointing::new(1, 10.0, 10.0, 0.0), 1, 120.0).unwrap();
    sim.add_target(Pointing::new(2, 20.0, 10.0, 0.0), 5, 120.0).unwrap();
    sim.add_target(Pointing::new(3, 30.0, 10.0, 0.0), 5, 120.0).unwrap();

    let summary = sim.run().unwrap();
    assert_eq!(summary.observations_completed, 3);
    assert_eq!(summary.observations_aborted, 0);
    assert_eq!(summary.total_exposure_s, 360.0);

    // Priority first, then insertion order
    let order: Vec<u32> = sim.plan().entries().iter().map(|e| e.obsid()).collect();
    assert_eq!(order, [2, 3, 1]);

    // slew 60 s + 120 s exposure: next target picked at 180 s
    let begins: Vec<f64> = sim.plan().entries().iter().map(|e| e.begin).collect();
    assert_eq!(begins, [0.0, 180.0, 360.0]);

    let bus = sim.bus();
    assert_eq!(
        bus.dispatched_types(),
        [
            "SLEW_TO_TARGET",
            "END_OBSERVATION",
            "SLEW_TO_TARGET",
            "END_OBSERVATION",
            "SLEW_TO_TARGET",
            "END_OBSERVATION",
        ]
    );
    assert!(summary.mode_seconds.contains_key("SCIENCE"));
}

#[test]
fn test_target_queue_not_queried_while_observing() {
    let mut sim = simulation(&[0.9], 4, false);
    sim.add_target(Pointing::new(1, 10.0, 10.0, 0.0), 1, 600.0).unwrap();

    let queried: Vec<bool> = (0..4).map(|_| sim.tick().unwrap().target_queried).collect();
    assert_eq!(queried, [true, false, false, false]);
}

#[test]
fn test_emergency_charging() {
    let mut sim = simulation(&[0.9, 0.55, 0.55, 0.97, 0.97], 5, false);
    sim.bus_mut().alert_below = Some(0.6);
    sim.add_target(Pointing::new(1, 10.0, 10.0, 0.0), 1, 6000.0).unwrap();
    sim.add_target(Pointing::new(2, 10.0, 10.0, 0.0), 0, 60.0).unwrap();

    sim.run().unwrap();

    assert_eq!(
        sim.bus().dispatched_types(),
        [
            "SLEW_TO_TARGET",
            "END_OBSERVATION",
            "START_BATTERY_CHARGE",
            "END_BATTERY_CHARGE",
            "SLEW_TO_TARGET",
        ]
    );
    assert_eq!(count(&sim, EventType::Charging), 2);
    assert!(!sim.plan().entries()[0].completed);
}

#[test]
fn test_emergency_charging_disabled() {
    let mut sim = simulation(&[0.9, 0.55], 3, false).with_emergency_charging(false);
    sim.bus_mut().alert_below = Some(0.6);
    sim.run().unwrap();
    assert_eq!(count(&sim, EventType::Charging), 0);
    assert!(!sim.is_charging());
}

#[test]
fn test_rejected_command_does_not_stop_run() {
    let mut sim = simulation(&[0.9], 3, false);
    sim.bus_mut().reject_slews = true;
    sim.add_target(Pointing::new(1, 10.0, 10.0, 0.0), 1, 60.0).unwrap();

    let summary = sim.run().unwrap();
    assert_eq!(summary.ticks, 3);
    assert_eq!(summary.commands_rejected, 1);
    assert_eq!(count(&sim, EventType::CommandRejected), 1);
    assert!(!sim.plan().entries()[0].completed);
    assert!(sim.active_observation().is_none());
}

#[test]
fn test_ground_commanded_safe_mode() {
    let mut sim = simulation(&[0.9], 4, true);
    sim.tick().unwrap();
    sim.request_safe_mode();

    let outcome = sim.tick().unwrap();
    assert!(outcome.entered_safe_mode);
    assert_eq!(sim.monitor().unwrap().safe_mode_requested_at(), Some(60.0));
}

#[test]
fn test_events_flushed_in_order() {
    let sink = SharedSink::default();
    let mut sim = simulation(&[0.9, 0.45, 0.35], 8, true)
        .with_event_batch_size(2)
        .with_sink(Box::new(sink.clone()));
    sim.add_target(Pointing::new(1, 10.0, 10.0, 0.0), 1, 60.0).unwrap();

    sim.run().unwrap();

    let stored = sink.events_for_run("test-run").unwrap();
    assert_eq!(stored, sim.event_log().events());
    assert!(sim.event_log().pending().is_empty());
    assert!(stored.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(sink.0.borrow().batch_count() >= 2);
}

#[test]
fn test_cancelled_run_still_flushes() {
    let sink = SharedSink::default();
    let mut sim = simulation(&[0.9], 8, false).with_sink(Box::new(sink.clone()));

    let cancel = AtomicBool::new(true);
    let summary = sim.run_until_cancelled(&cancel).unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.ticks, 0);
    let stored = sink.events_of_type(Some("test-run"), EventType::Run).unwrap();
    assert_eq!(stored.len(), 1);
}

#[test]
fn test_tick_after_end_fails() {
    let mut sim = simulation(&[0.9], 2, false);
    sim.tick().unwrap();
    sim.tick().unwrap();
    assert!(matches!(sim.tick(), Err(SimError::Finished)));
    assert_eq!(sim.bus().advances, [0.0, 60.0]);
}

#[test]
fn test_visibility_windows_from_config() {
    let mut config = SimulationConfig::new(0.0, 600.0, STEP);
    config.targets.push(TargetConfig {
        obsid: 7,
        ra: 10.0,
        dec: 10.0,
        roll: 0.0,
        priority: 9,
        duration: 60.0,
        windows: vec![[240.0, 420.0]],
    });

    let mut sim = Simulation::from_config_with_bus(&config, ScriptedBus::new(&[0.9])).unwrap();
    sim.run().unwrap();

    let entry = &sim.plan().entries()[0];
    assert_eq!(entry.begin, 240.0);
    assert!(entry.completed);
}

#[test]
fn test_observation_ends_when_window_closes() {
    let mut config = SimulationConfig::new(0.0, 1200.0, STEP);
    config.targets.push(TargetConfig {
        obsid: 7,
        ra: 10.0,
        dec: 10.0,
        roll: 0.0,
        priority: 9,
        duration: 1800.0,
        windows: vec![[0.0, 300.0]],
    });
    config.targets.push(TargetConfig {
        obsid: 8,
        ra: 20.0,
        dec: 10.0,
        roll: 0.0,
        priority: 1,
        duration: 600.0,
        windows: Vec::new(),
    });

    let mut sim = Simulation::from_config_with_bus(&config, ScriptedBus::new(&[0.9])).unwrap();
    let summary = sim.run().unwrap();

    let entries = sim.plan().entries();
    assert_eq!(entries.len(), 2);

    // Cut short at the first tick outside the window
    assert_eq!(entries[0].obsid(), 7);
    assert!(!entries[0].completed);
    assert_eq!(entries[0].end, 300.0);
    assert_eq!(entries[0].exposure(), 240.0);

    // Replacement picked in the same tick
    assert_eq!(entries[1].obsid(), 8);
    assert_eq!(entries[1].begin, 300.0);
    assert!(entries[1].completed);

    let at_close: Vec<&str> = sim
        .bus()
        .dispatched
        .iter()
        .filter(|(t, _)| *t == 300.0)
        .map(|(_, c)| c.command_type.name())
        .collect();
    assert_eq!(at_close, ["END_OBSERVATION", "SLEW_TO_TARGET"]);
    assert_eq!(summary.observations_aborted, 1);
    assert_eq!(summary.observations_completed, 1);
}

#[test]
fn test_reference_runs_are_deterministic() {
    let json = r#"{
        "run_id": "determinism",
        "begin": 1543276800.0,
        "end": 1543298400.0,
        "step_size": 60.0,
        "fault_management": {
            "thresholds": {
                "temperature": { "name": "temperature", "yellow": 50.0, "red": 60.0, "direction": "above" }
            }
        },
        "constraints": { "sun_avoidance_deg": 45.0 },
        "targets": [
            { "obsid": 1, "ra": 62.0, "dec": 21.0, "priority": 3, "duration": 1800.0 },
            { "obsid": 2, "ra": 100.0, "dec": -10.0, "priority": 2, "duration": 3600.0 },
            { "obsid": 3, "ra": 242.0, "dec": -21.0, "priority": 9, "duration": 600.0 }
        ]
    }"#;
    let config = SimulationConfig::from_json_str(json).unwrap();

    let mut first = Simulation::from_config(&config).unwrap();
    let mut second = Simulation::from_config(&config).unwrap();
    let a = first.run().unwrap();
    let b = second.run().unwrap();

    assert_eq!(a, b);
    assert_eq!(first.event_log().events(), second.event_log().events());
    // Obsid 3 sits on the sun and is never scheduled
    assert!(first.plan().entries().iter().all(|e| e.obsid() != 3));
    assert_eq!(a.targets_remaining, 1);
}
