use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use satconops::event::EventType;
use satconops::store::{EventSink, JsonLinesEventStore, StoredEvent};

const DEFAULT_STORE: &str = "satconops-events.jsonl";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("satconops")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🛰️  Query event logs recorded by satconops-simulator runs")
        .arg(
            Arg::with_name("store")
                .short("s")
                .long("store")
                .value_name("FILE")
                .help("JSON-lines event store")
                .takes_value(true)
                .default_value(DEFAULT_STORE)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("runs")
                .about("📋 List recorded runs")
        )
        .subcommand(
            SubCommand::with_name("events")
                .about("📜 Show events of a run")
                .long_about("Show stored events, optionally restricted to one run and/or one event type")
                .arg(
                    Arg::with_name("run")
                        .short("r")
                        .long("run")
                        .value_name("RUN_ID")
                        .help("Only events of this run")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("type")
                        .short("t")
                        .long("type")
                        .value_name("EVENT_TYPE")
                        .help("Only events of this type (e.g. safe_mode, command)")
                        .takes_value(true)
                        .validator(|v| {
                            v.parse::<EventType>().map(|_| ())
                        }),
                ),
        )
        .get_matches();

    let store_path = matches.value_of("store").unwrap_or(DEFAULT_STORE);
    let format = matches.value_of("format").unwrap_or("table");

    if !std::path::Path::new(store_path).exists() {
        eprintln!("{} No event store at {}", "❌".red(), store_path.bright_white());
        return Err("event store not found".into());
    }
    let store = JsonLinesEventStore::open(store_path)?;

    match matches.subcommand() {
        ("runs", _) => handle_runs(&store, format)?,
        ("events", Some(sub_matches)) => handle_events(&store, sub_matches, format)?,
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {} List recorded runs", "satconops runs".bright_cyan());
            println!("  {} Safe-mode entries of a run", "satconops events --run <RUN_ID> --type safe_mode".bright_cyan());
        }
    }

    Ok(())
}

fn handle_runs(store: &JsonLinesEventStore, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let runs = store.runs()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&runs)?),
        "compact" => {
            for run in &runs {
                println!("{}", run);
            }
        }
        _ => {
            println!("{}", "Recorded runs".bright_blue().bold());
            for run in &runs {
                let events = store.events_for_run(run)?;
                let safe = events.iter().any(|e| e.event_type == EventType::SafeMode);
                let status = if safe { "SAFE MODE".bright_red() } else { "NOMINAL".bright_green() };
                println!("  {:<40} {:>7} events  {}", run.bright_white(), events.len(), status);
            }
        }
    }

    Ok(())
}

fn handle_events(
    store: &JsonLinesEventStore,
    matches: &ArgMatches<'_>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let run = matches.value_of("run");
    let event_type = matches
        .value_of("type")
        .map(|t| t.parse::<EventType>())
        .transpose()?;

    let records: Vec<StoredEvent> = match event_type {
        Some(event_type) => store.events_of_type(run, event_type)?,
        None => store
            .read_all()?
            .into_iter()
            .filter(|r| run.map_or(true, |id| r.run_id == id))
            .collect(),
    };

    match format {
        "json" => {
            for record in &records {
                println!("{}", serde_json::to_string(record)?);
            }
        }
        "compact" => {
            for record in &records {
                println!(
                    "[{}] {} {}",
                    record.event.timestamp, record.event.event_type, record.event.description
                );
            }
        }
        _ => print_event_table(&records),
    }

    Ok(())
}

fn colored_type(event_type: EventType) -> ColoredString {
    let label = format!("{:<16}", event_type.as_str());
    match event_type {
        EventType::SafeMode | EventType::CommandRejected => label.bright_red(),
        EventType::DegradedSample | EventType::Classification | EventType::Charging => label.yellow(),
        EventType::Observation | EventType::Queue => label.bright_cyan(),
        EventType::Run => label.bright_blue(),
        EventType::Command => label.white(),
    }
}

fn print_event_table(records: &[StoredEvent]) {
    println!("{}", "┌──────────┬────────────────┬──────────────────┬────────┬───────────┬──────────────────────────────".bright_white());
    println!("{}", "│      Seq │ Time           │ Type             │ Obsid  │ ACS mode  │ Description".bright_white());
    println!("{}", "├──────────┼────────────────┼──────────────────┼────────┼───────────┼──────────────────────────────".bright_white());

    for record in records {
        let event = &record.event;
        let obsid = event.obsid.map(|o| o.to_string()).unwrap_or_default();
        let mode = event.acs_mode.map(|m| m.as_str()).unwrap_or("");
        println!(
            "│ {:>8} │ {:>14.1} │ {} │ {:>6} │ {:<9} │ {}",
            record.sequence,
            event.timestamp,
            colored_type(event.event_type),
            obsid,
            mode,
            event.description
        );
    }

    println!("{} {} events", "└".bright_white(), records.len());
}
