use clap::{App, Arg};
use colored::*;
use satconops::config::SimulationConfig;
use satconops::simulation::{RunSummary, SimState, Simulation};
use satconops::store::{EventSink, JsonLinesEventStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info, warn, Level};

const DEFAULT_STORE: &str = "satconops-events.jsonl";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("satconops-simulator")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🛰️  Day-In-The-Life spacecraft operations simulator")
        .arg(
            Arg::with_name("config")
                .help("Run configuration (JSON)")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("store")
                .short("s")
                .long("store")
                .value_name("FILE")
                .help("JSON-lines event store to append to")
                .takes_value(true)
                .default_value(DEFAULT_STORE),
        )
        .arg(
            Arg::with_name("run-id")
                .long("run-id")
                .value_name("RUN_ID")
                .help("Run id (defaults to the config's, else a random UUID)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("pace-ms")
                .long("pace-ms")
                .value_name("MILLISECONDS")
                .help("Wall-clock delay between ticks (0 runs flat out)")
                .takes_value(true)
                .default_value("0")
                .validator(|v| match v.parse::<u64>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Pacing must be a whole number of milliseconds".into()),
                }),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable debug logging"),
        )
        .get_matches();

    let level = if matches.is_present("verbose") { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config_path = matches.value_of("config").unwrap_or_default();
    let store_path = matches.value_of("store").unwrap_or(DEFAULT_STORE);
    let pace_ms = matches.value_of("pace-ms").unwrap_or("0").parse::<u64>()?;

    let mut config = SimulationConfig::from_json_file(config_path)?;
    if let Some(run_id) = matches.value_of("run-id") {
        config.run_id = Some(run_id.to_string());
    }
    if config.run_id.is_none() {
        config.run_id = Some(uuid::Uuid::new_v4().to_string());
    }

    println!("🛰️  satconops DITL simulator");
    println!("================================");
    println!("   Run:     {}", config.run_id.as_deref().unwrap_or_default().bright_white());
    println!("   Period:  {} → {} ({} ticks of {} s)", config.begin, config.end, config.tick_count(), config.step_size);
    println!("   Targets: {}", config.targets.len());
    println!("   Store:   {}", store_path);

    let store = JsonLinesEventStore::open(store_path)?;
    store.ensure_new_run(config.run_id.as_deref().unwrap_or_default())?;
    let mut sim = Simulation::from_config(&config)?.with_sink(Box::new(store));

    let cancel = Arc::new(AtomicBool::new(false));
    let ctrl_c_cancel = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping after the current tick");
            ctrl_c_cancel.store(true, Ordering::Relaxed);
        }
    });

    let summary = if pace_ms == 0 {
        sim.run_until_cancelled(&cancel)
    } else {
        run_paced(&mut sim, &cancel, Duration::from_millis(pace_ms)).await
    };

    match summary {
        Ok(summary) => {
            print_summary(&summary);
            println!("   Slews performed:    {}", sim.bus().attitude().total_slews());
            Ok(())
        }
        Err(e) => {
            error!("Run aborted: {}", e);
            Err(e.into())
        }
    }
}

/// Tick on a wall-clock interval instead of as fast as possible.
async fn run_paced(
    sim: &mut Simulation<satconops::Spacecraft>,
    cancel: &AtomicBool,
    period: Duration,
) -> Result<RunSummary, satconops::SimError> {
    let mut interval = time::interval(period);
    let mut cancelled = false;

    let result = loop {
        if sim.clock().is_finished() {
            break Ok(());
        }
        interval.tick().await;
        if cancel.load(Ordering::Relaxed) {
            cancelled = true;
            break Ok(());
        }
        match sim.tick() {
            Ok(outcome) => {
                if outcome.entered_safe_mode {
                    warn!(utime = outcome.utime, "spacecraft entered safe mode");
                }
            }
            Err(e) => break Err(e),
        }
    };

    let flushed = sim.finish();
    result?;
    flushed?;
    info!("paced run complete");
    Ok(sim.summary(cancelled))
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}", "Run summary".bright_blue().bold());
    println!("   Ticks executed:     {}", summary.ticks);

    let state = match summary.final_state {
        SimState::Running => "RUNNING".bright_green(),
        SimState::SafeMode => "SAFE MODE".bright_red(),
    };
    println!("   Final state:        {}", state);
    if summary.cancelled {
        println!("   {}", "Run was cancelled before its end time".yellow());
    }
    if let Some(at) = summary.safe_mode_entered_at {
        println!("   Safe mode entered:  {}", format!("{at}").bright_red());
    }

    println!(
        "   Observations:       {} completed, {} aborted ({:.0} s on target)",
        summary.observations_completed, summary.observations_aborted, summary.total_exposure_s
    );
    println!(
        "   Commands:           {} dispatched, {} rejected",
        summary.commands_dispatched, summary.commands_rejected
    );
    println!("   Targets remaining:  {}", summary.targets_remaining);
    if let Some(level) = summary.min_battery_level {
        let text = format!("{:.1}%", level * 100.0);
        let text = if level < 0.5 { text.yellow() } else { text.green() };
        println!("   Min battery level:  {}", text);
    }

    for (mode, seconds) in &summary.mode_seconds {
        println!("   {:<20}{:.0} s", format!("{mode}:"), seconds);
    }

    for (name, stats) in &summary.statistics {
        println!(
            "   {:<20}{} now, {:.0} s yellow, {:.0} s red",
            format!("{name}:"),
            stats.current,
            stats.yellow_seconds,
            stats.red_seconds
        );
    }

    println!("   Events logged:      {}", summary.events_logged);
}
