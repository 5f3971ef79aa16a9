//! Command-line front end.
//!
//! Each invocation opens the store, resolves tonight's session, applies one
//! command and prints the resulting state.

use crate::config::Config;
use crate::error::Result;
use crate::format::PlainFormatter;
use crate::publisher::TrackerState;
use crate::session::{SessionId, SessionRecord, SessionStore, SleepQuality, SqliteSessionStore};
use crate::tracker::SleepTracker;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Track your sleep from the terminal
#[derive(Parser, Debug)]
#[command(name = "sleeptrack", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Sessions database (defaults to the configured data directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Output format
    #[arg(short = 'o', long, default_value = "text", value_enum, global = true)]
    pub output: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start tracking a night of sleep
    Start,
    /// Stop tracking the night in progress
    Stop,
    /// Delete every recorded night
    Clear,
    /// Show whether a night is in progress
    Status,
    /// List recorded nights, newest first
    History,
    /// Rate how well you slept during a finished night
    Rate {
        /// Night id, as shown by `history`
        id: i64,
        /// 0 (very bad) to 5 (excellent)
        #[arg(value_parser = parse_quality)]
        quality: SleepQuality,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

fn parse_quality(s: &str) -> std::result::Result<SleepQuality, String> {
    let score: u8 = s
        .parse()
        .map_err(|_| format!("Expected a number from 0 to 5, got '{s}'"))?;
    SleepQuality::try_from(score)
}

/// JSON output structure for `--output json`
#[derive(Serialize)]
#[serde(tag = "type")]
enum JsonOutput<'a> {
    #[serde(rename = "state")]
    State {
        state: &'a TrackerState,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<&'a str>,
    },
    #[serde(rename = "stopped")]
    Stopped {
        night: &'a SessionRecord,
        state: &'a TrackerState,
    },
    #[serde(rename = "history")]
    History { nights: &'a [SessionRecord] },
}

/// Run one command against the configured store.
pub async fn run(cli: Cli, config: &Config) -> Result<()> {
    let db_path = cli.db.clone().unwrap_or_else(|| config.sessions_db_path());
    let store = Arc::new(SqliteSessionStore::open(&db_path)?);
    let formatter = PlainFormatter::new(config.time_format.clone());
    let tracker = SleepTracker::with_system_clock(
        Arc::clone(&store) as Arc<dyn SessionStore>,
        Arc::new(formatter.clone()),
    );
    tracker.refresh().finished().await?;

    let printer = Printer {
        format: cli.output,
        formatter,
    };
    let result = execute(&cli.command, &tracker, store.as_ref(), &printer).await;
    tracker.shutdown();
    result
}

async fn execute(
    command: &Commands,
    tracker: &SleepTracker,
    store: &dyn SessionStore,
    printer: &Printer,
) -> Result<()> {
    match command {
        Commands::Start => {
            // Only offer start when no night is in progress
            if !tracker.state().start_enabled {
                return printer.state(&tracker.state(), "A night is already in progress");
            }
            tracker.start().finished().await?;
            let state = tracker.state();
            let message = state.tonight.as_ref().map(|night| {
                format!(
                    "Started night {} at {}",
                    night.id,
                    printer.formatter.timestamp(night.start_time_ms)
                )
            });
            printer.state(&state, message.as_deref().unwrap_or("Started"))
        }
        Commands::Stop => {
            if !tracker.state().stop_enabled {
                return printer.state(&tracker.state(), "No night in progress");
            }
            let mut navigation = tracker.navigation_event();
            tracker.stop().finished().await?;
            let stopped = navigation.borrow_and_update().clone();
            tracker.acknowledge_navigation_event();
            match stopped {
                Some(night) => printer.stopped(&night, &tracker.state()),
                None => printer.state(&tracker.state(), "Stopped"),
            }
        }
        Commands::Clear => {
            if !tracker.state().clear_enabled {
                return printer.state(&tracker.state(), "Nothing to clear");
            }
            tracker.clear().finished().await?;
            printer.state(&tracker.state(), "Cleared all nights")
        }
        Commands::Status => printer.status(&tracker.state()),
        Commands::History => {
            let nights = store.all().await?;
            printer.history(&nights, &tracker.state())
        }
        Commands::Rate { id, quality } => {
            tracker.rate(SessionId(*id), *quality).finished().await?;
            printer.state(&tracker.state(), &format!("Rated night {id}: {quality}"))
        }
    }
}

struct Printer {
    format: OutputFormat,
    formatter: PlainFormatter,
}

impl Printer {
    fn json(value: &JsonOutput<'_>) -> Result<()> {
        println!("{}", serde_json::to_string(value)?);
        Ok(())
    }

    fn state(&self, state: &TrackerState, message: &str) -> Result<()> {
        match self.format {
            OutputFormat::Text => {
                println!("{message}");
                Ok(())
            }
            OutputFormat::Json => Self::json(&JsonOutput::State {
                state,
                message: Some(message),
            }),
        }
    }

    fn status(&self, state: &TrackerState) -> Result<()> {
        match self.format {
            OutputFormat::Text => {
                match &state.tonight {
                    Some(night) => println!(
                        "Asleep since {} (night {})",
                        self.formatter.timestamp(night.start_time_ms),
                        night.id
                    ),
                    None => println!("Awake"),
                }
                Ok(())
            }
            OutputFormat::Json => Self::json(&JsonOutput::State {
                state,
                message: None,
            }),
        }
    }

    fn stopped(&self, night: &SessionRecord, state: &TrackerState) -> Result<()> {
        match self.format {
            OutputFormat::Text => {
                let slept = night.duration();
                println!(
                    "Stopped night {} after {}h {:02}m",
                    night.id,
                    slept.num_hours(),
                    slept.num_minutes() % 60
                );
                println!("How did you sleep? Run `sleeptrack rate {} <0-5>`", night.id);
                Ok(())
            }
            OutputFormat::Json => Self::json(&JsonOutput::Stopped { night, state }),
        }
    }

    fn history(&self, nights: &[SessionRecord], state: &TrackerState) -> Result<()> {
        match self.format {
            OutputFormat::Text => {
                if state.history_text.is_empty() {
                    println!("No nights recorded");
                } else {
                    print!("{}", state.history_text);
                }
                Ok(())
            }
            OutputFormat::Json => Self::json(&JsonOutput::History { nights }),
        }
    }
}
