use satconops::config::ConfigError;
use satconops::fault::{Classification, Direction};
use satconops::safety::FaultMonitor;
use satconops::telemetry::Samples;

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

fn battery(value: f64) -> Samples {
    Samples::new().with("battery_level", value)
}

#[test]
fn test_below_classification() {
    let cases = [
        (0.55, Classification::Nominal),
        (0.5, Classification::Yellow),
        (0.45, Classification::Yellow),
        (0.4, Classification::Red),
        (0.35, Classification::Red),
    ];

    for (value, expected) in cases {
        let mut monitor = FaultMonitor::new(false);
        monitor
            .add_threshold("battery_level", 0.5, 0.4, Direction::Below)
            .unwrap();
        let report = monitor.check(&battery(value), 0.0, 60.0).unwrap();
        assert_eq!(
            report.classification("battery_level"),
            Some(expected),
            "value {value}"
        );
    }
}

#[test]
fn test_above_classification() {
    let mut monitor = monitor();

    let report = monitor
        .check(&Samples::new().with("temperature", 55.0), 0.0, 60.0)
        .unwrap();
    assert_eq!(report.classification("temperature"), Some(Classification::Yellow));

    let report = monitor
        .check(&Samples::new().with("temperature", 65.0), 60.0, 60.0)
        .unwrap();
    assert_eq!(report.classification("temperature"), Some(Classification::Red));
}

#[test]
fn test_yellow_accumulation() {
    let mut monitor = monitor();
    for tick in 0..7 {
        monitor.check(&battery(0.45), tick as f64 * 30.0, 30.0).unwrap();
    }

    let stats = monitor.statistics();
    assert_eq!(stats["battery_level"].yellow_seconds, 210.0);
    assert_eq!(stats["battery_level"].red_seconds, 0.0);
    assert_eq!(stats["battery_level"].current, Classification::Yellow);
}

#[test]
fn test_red_does_not_count_as_yellow() {
    let mut monitor = monitor();
    monitor.check(&battery(0.45), 0.0, 60.0).unwrap();
    monitor.check(&battery(0.3), 60.0, 60.0).unwrap();
    monitor.check(&battery(0.3), 120.0, 60.0).unwrap();

    let state = monitor.state("battery_level").unwrap();
    assert_eq!(state.yellow_seconds, 60.0);
    assert_eq!(state.red_seconds, 120.0);
}

#[test]
fn test_safe_mode_flag_is_sticky() {
    let mut monitor = monitor();

    let report = monitor.check(&battery(0.3), 0.0, 60.0).unwrap();
    assert!(report.safe_mode_requested);
    assert!(monitor.safe_mode_requested());
    assert_eq!(monitor.safe_mode_requested_at(), Some(0.0));

    for tick in 1..10 {
        let report = monitor.check(&battery(0.9), tick as f64 * 60.0, 60.0).unwrap();
        assert!(!report.safe_mode_requested);
        assert_eq!(report.classification("battery_level"), Some(Classification::Nominal));
    }
    assert!(monitor.safe_mode_requested());
    assert_eq!(monitor.safe_mode_requested_at(), Some(0.0));
}

#[test]
fn test_red_without_safe_mode_on_red() {
    let mut monitor = FaultMonitor::new(false);
    monitor
        .add_threshold("battery_level", 0.5, 0.4, Direction::Below)
        .unwrap();

    let report = monitor.check(&battery(0.1), 0.0, 60.0).unwrap();
    assert!(report.any_red());
    assert!(!monitor.safe_mode_requested());
}

#[test]
fn test_zero_step_is_idempotent() {
    let mut monitor = monitor();
    let samples = Samples::new()
        .with("battery_level", 0.45)
        .with("temperature", 20.0);

    let first = monitor.check(&samples, 0.0, 0.0).unwrap();
    let before = monitor.statistics();
    let second = monitor.check(&samples, 0.0, 0.0).unwrap();

    assert_eq!(before, monitor.statistics());
    assert_eq!(first.classifications, second.classifications);
    assert!(second.changes.is_empty());
    assert_eq!(monitor.statistics()["battery_level"].yellow_seconds, 0.0);
}

#[test]
fn test_absent_parameters_keep_state() {
    let mut monitor = monitor();
    monitor
        .check(
            &Samples::new()
                .with("battery_level", 0.45)
                .with("temperature", 55.0),
            0.0,
            60.0,
        )
        .unwrap();
    let temperature_before = monitor.state("temperature").unwrap().clone();

    let report = monitor.check(&battery(0.45), 60.0, 60.0).unwrap();

    assert_eq!(monitor.state("temperature").unwrap(), &temperature_before);
    // Snapshot still covers the omitted parameter
    assert_eq!(report.classification("temperature"), Some(Classification::Yellow));
    assert_eq!(monitor.state("battery_level").unwrap().yellow_seconds, 120.0);
}

#[test]
fn test_unknown_names_ignored() {
    let mut monitor = monitor();
    let report = monitor
        .check(&Samples::new().with("wheel_speed", 1e9), 0.0, 60.0)
        .unwrap();
    assert_eq!(report.classifications.len(), 2);
    assert!(report.changes.is_empty());
}

#[test]
fn test_invalid_value_is_atomic() {
    let mut monitor = monitor();
    monitor.check(&battery(0.45), 0.0, 60.0).unwrap();
    let before = monitor.statistics();

    let samples = Samples::new()
        .with("battery_level", 0.3)
        .with("temperature", f64::NAN);
    let err = monitor.check(&samples, 60.0, 60.0).unwrap_err();
    assert_eq!(err.parameter, "temperature");

    // The valid battery sample in the same call was not applied either
    assert_eq!(before, monitor.statistics());
    assert!(!monitor.safe_mode_requested());
}

#[test]
fn test_invalid_step_size() {
    let mut monitor = monitor();
    assert!(monitor.check(&battery(0.45), 0.0, -1.0).is_err());
    assert!(monitor.check(&battery(0.45), 0.0, f64::INFINITY).is_err());
    assert_eq!(monitor.statistics()["battery_level"].yellow_seconds, 0.0);
}

#[test]
fn test_classification_changes_reported() {
    let mut monitor = monitor();
    let report = monitor.check(&battery(0.45), 0.0, 60.0).unwrap();
    assert_eq!(report.changes.len(), 1);
    assert_eq!(report.changes[0].from, Classification::Nominal);
    assert_eq!(report.changes[0].to, Classification::Yellow);

    let report = monitor.check(&battery(0.46), 60.0, 60.0).unwrap();
    assert!(report.changes.is_empty());
}

#[test]
fn test_add_threshold_validation() {
    let mut monitor = FaultMonitor::new(true);
    assert!(matches!(
        monitor.add_threshold("x", 0.4, 0.5, Direction::Below),
        Err(ConfigError::SeverityOrder { .. })
    ));
    assert!(matches!(
        monitor.add_threshold("x", 60.0, 50.0, Direction::Above),
        Err(ConfigError::SeverityOrder { .. })
    ));
    assert!(matches!(
        monitor.add_threshold("x", 0.5, 0.5, Direction::Below),
        Err(ConfigError::SeverityOrder { .. })
    ));
    assert!(matches!(
        monitor.add_threshold("x", f64::NAN, 0.5, Direction::Below),
        Err(ConfigError::NonFiniteLimit { .. })
    ));

    monitor.add_threshold("x", 0.5, 0.4, Direction::Below).unwrap();
    assert!(matches!(
        monitor.add_threshold("x", 0.6, 0.3, Direction::Below),
        Err(ConfigError::DuplicateThreshold(_))
    ));
}

#[test]
fn test_dense_ids_are_stable() {
    let mut monitor = FaultMonitor::new(true);
    let a = monitor.add_threshold("a", 1.0, 0.0, Direction::Below).unwrap();
    let b = monitor.add_threshold("b", 1.0, 0.0, Direction::Below).unwrap();
    assert_eq!(a.index(), 0);
    assert_eq!(b.index(), 1);
    assert_eq!(monitor.thresholds().lookup("b"), Some(b));
}

#[test]
fn test_parameter_capacity() {
    let mut monitor = FaultMonitor::new(true);
    for i in 0..satconops::fault::MAX_PARAMETERS {
        monitor
            .add_threshold(&format!("p{i}"), 1.0, 0.0, Direction::Below)
            .unwrap();
    }
    assert!(matches!(
        monitor.add_threshold("overflow", 1.0, 0.0, Direction::Below),
        Err(ConfigError::TooManyParameters { .. })
    ));
}
