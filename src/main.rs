//! reveil - Alarm scheduling for calendar events.
//!
//! Usage:
//!   reveil run -c <config>              Run the alarm service
//!   reveil import <EVENT_PATH> <ICS>    Register the alarms of an event
//!   reveil delete <EVENT_PATH>          Remove every alarm of an event
//!   reveil list                         List stored alarms
//!   reveil next <ICS>                   Show when an event's alarms fire next

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use reveil::core::ical::Trigger;
use reveil::{
    AlarmFilter, AlarmService, AlarmState, AlarmStore, CalendarEvent, EventChangeListener,
    EventPath, InMemoryStorage, RRuleEngine, RecurrenceEngine, ReveilConfig, YamlLoader,
    config::StorageConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// reveil - Alarm scheduling for calendar events
#[derive(Parser)]
#[command(name = "reveil")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file (defaults apply when omitted)
    #[arg(short, long, global = true, value_name = "CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the alarm service until interrupted
    Run,

    /// Register the alarms of a calendar event
    Import {
        /// Path identifying the calendar object
        #[arg(value_name = "EVENT_PATH")]
        event_path: String,

        /// VCALENDAR file to read
        #[arg(value_name = "ICS")]
        ics: PathBuf,

        /// Replace the event's waiting alarms instead of adding to them
        #[arg(long)]
        update: bool,
    },

    /// Remove every alarm of a calendar event
    Delete {
        #[arg(value_name = "EVENT_PATH")]
        event_path: String,
    },

    /// List stored alarms
    List {
        /// Only alarms of this event
        #[arg(long)]
        event_path: Option<String>,

        /// Only alarms in this state (WAITING, RUNNING, DONE, ERROR, UNHANDLED)
        #[arg(long)]
        state: Option<AlarmState>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show when the alarms of an event fire next
    Next {
        #[arg(value_name = "ICS")]
        ics: PathBuf,

        /// Start of the search (RFC 3339, default: now)
        #[arg(long)]
        after: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => YamlLoader::load_config(path)?,
        None => ReveilConfig::default(),
    };

    if let Commands::Next { ics, after } = &cli.command {
        return next_alarms(ics, after.unwrap_or_else(Utc::now));
    }

    match &config.storage {
        StorageConfig::Memory => {
            if !matches!(cli.command, Commands::Run) {
                warn!("Using in-memory storage; changes are lost on exit");
            }
            execute(Arc::new(InMemoryStorage::new()), &config, cli.command).await
        }
        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { path } => {
            let store = Arc::new(reveil::SqliteStorage::new(path).await?);
            let result = execute(Arc::clone(&store), &config, cli.command).await;
            store.close().await;
            result
        }
        #[cfg(not(feature = "sqlite"))]
        StorageConfig::Sqlite { .. } => {
            Err("sqlite storage requires the 'sqlite' feature".into())
        }
    }
}

async fn execute<S: AlarmStore + 'static>(
    store: Arc<S>,
    config: &ReveilConfig,
    command: Commands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Run => run_service(store, config).await,
        Commands::Import {
            event_path,
            ics,
            update,
        } => import_event(store, event_path, ics, update).await,
        Commands::Delete { event_path } => {
            let listener = EventChangeListener::new(store);
            let removed = listener.on_deleted(&EventPath::new(event_path.clone())).await?;
            info!("Removed {} alarm(s) of {}", removed, event_path);
            Ok(())
        }
        Commands::List {
            event_path,
            state,
            json,
        } => list_alarms(store, event_path, state, json).await,
        Commands::Next { .. } => Ok(()),
    }
}

/// Run the alarm service until Ctrl+C.
async fn run_service<S: AlarmStore + 'static>(
    store: Arc<S>,
    config: &ReveilConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = AlarmService::from_config(store, config)?;
    let handle = service.init().await?;

    info!(
        "Alarm service running (tick interval: {}s)",
        config.tick_interval_secs
    );
    info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    handle.shutdown().await?;

    info!("Goodbye!");
    Ok(())
}

/// Register the alarms of one VCALENDAR file.
async fn import_event<S: AlarmStore>(
    store: Arc<S>,
    event_path: String,
    ics: PathBuf,
    update: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload = std::fs::read_to_string(&ics)?;
    let event_path = EventPath::new(event_path);
    let listener = EventChangeListener::new(store);

    let outcomes = if update {
        listener.on_updated(&event_path, &payload).await?
    } else {
        listener.on_created(&event_path, &payload).await?
    };

    let mut failed = 0;
    for (index, outcome) in outcomes.iter().enumerate() {
        match outcome {
            Ok(alarm) => info!(
                "  [{}] {} due {} ({})",
                index, alarm.action, alarm.due_date, alarm.id
            ),
            Err(e) => {
                failed += 1;
                error!("  [{}] skipped: {}", index, e);
            }
        }
    }
    info!(
        "Registered {} of {} alarm(s) for {}",
        outcomes.len() - failed,
        outcomes.len(),
        event_path
    );
    Ok(())
}

/// Print stored alarms.
async fn list_alarms<S: AlarmStore>(
    store: Arc<S>,
    event_path: Option<String>,
    state: Option<AlarmState>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut filter = AlarmFilter::all();
    if let Some(path) = event_path {
        filter = AlarmFilter::for_event(EventPath::new(path));
    }
    if let Some(state) = state {
        filter = filter.with_state(state);
    }

    let alarms = store.list(&filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&alarms)?);
        return Ok(());
    }

    if alarms.is_empty() {
        println!("No alarms found");
        return Ok(());
    }

    for alarm in &alarms {
        println!("ID: {}", alarm.id);
        println!("  Event: {}", alarm.event_path);
        if let Some(summary) = &alarm.summary {
            println!("  Summary: {}", summary);
        }
        println!("  Action: {}", alarm.action);
        println!("  Due: {}", alarm.due_date);
        println!("  State: {}", alarm.state);
        if let Some(recipient) = &alarm.recipient {
            println!("  Recipient: {}", recipient);
        }
        println!();
    }

    Ok(())
}

/// Print the next firing of every alarm of an event after `after`.
fn next_alarms(ics: &Path, after: DateTime<Utc>) -> Result<(), Box<dyn std::error::Error>> {
    let payload = std::fs::read_to_string(ics)?;
    let event = CalendarEvent::parse(EventPath::new(ics.display().to_string()), &payload)?;
    let engine = RRuleEngine::new();

    println!("Event: {}", event.uid);
    if let Some(summary) = &event.summary {
        println!("  Summary: {}", summary);
    }
    println!("  Recurring: {}", event.is_recurring());

    for definition in event.alarm_definitions() {
        let definition = match definition {
            Ok(definition) => definition,
            Err(e) => {
                println!("  - invalid alarm: {}", e);
                continue;
            }
        };

        let next = match definition.trigger {
            Trigger::Relative(offset) if event.is_recurring() => {
                match after.checked_sub_signed(offset) {
                    Some(window_start) => engine
                        .next_occurrence(&event, window_start)?
                        .and_then(|start| start.checked_add_signed(offset)),
                    None => None,
                }
            }
            trigger => trigger.fire_time(event.start).filter(|at| *at > after),
        };

        let label = format!(
            "[{}] {} ({})",
            definition.index, definition.action, definition.trigger
        );
        match next {
            Some(at) => println!("  - {} at {}", label, at),
            None => println!("  - {} does not fire again", label),
        }
    }

    Ok(())
}
