//! activetime: command-line client for the session ledger.
//!
//! ## Subcommands
//!
//! - `track`: Run the idle-aware tracker, reading host events from stdin
//! - `start`, `heartbeat`, `pause`, `resume`, `stop`: One-shot lifecycle calls
//! - `logs`, `events`: Read finalized sessions and activity events
//! - `record-event`: Append an activity event to a session
//! - `health`: Check the ledger is reachable

use activetime_client::config::{self, ClientConfig};
use activetime_client::host::{HostIntegration, LineHost};
use activetime_client::logging;
use activetime_client::session::{ContextInfo, Identity, SessionClient};
use activetime_client::tracker::{SystemClock, Tracker, TrackerSettings};
use activetime_client::{ClientError, LedgerApi, TcpTransport};
use activetime_protocol::{RecordEventParams, SessionId, StartParams, DATE_FORMAT};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "activetime")]
#[command(about = "Idle-aware session time tracking")]
#[command(version)]
struct Cli {
    /// Client config file (defaults to ~/.activetime/client.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Ledger address, overriding config and environment
    #[arg(long, global = true, value_name = "HOST:PORT")]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct IdentityArgs {
    /// User to attribute time to (defaults to config `user_id`)
    #[arg(long)]
    user_id: Option<i64>,

    /// Task to attribute time to (defaults to config `task_id`)
    #[arg(long)]
    task_id: Option<i64>,

    /// Host application name (defaults to config `app_name`)
    #[arg(long)]
    app_name: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Track a session from host events on stdin
    /// (`activity`, `open <path>`, `task <id|none>`, `stop`, `exit`)
    Track {
        #[command(flatten)]
        identity: IdentityArgs,

        /// Open this context immediately
        #[arg(long, value_name = "PATH")]
        context: Option<String>,
    },

    /// Start a session and print its id
    Start {
        #[command(flatten)]
        identity: IdentityArgs,

        /// Path of the document being worked on; empty for an unsaved one
        #[arg(long, value_name = "PATH", default_value = "")]
        context_path: String,

        /// Display name (defaults to the file name)
        #[arg(long)]
        context_name: Option<String>,
    },

    /// Mark a session as alive
    Heartbeat {
        #[arg(value_name = "SESSION_ID")]
        session_id: SessionId,
    },

    /// Pause a session
    Pause {
        #[arg(value_name = "SESSION_ID")]
        session_id: SessionId,
    },

    /// Resume a paused session
    Resume {
        #[arg(value_name = "SESSION_ID")]
        session_id: SessionId,
    },

    /// Stop a session and finalize its duration
    Stop {
        #[arg(value_name = "SESSION_ID")]
        session_id: SessionId,
    },

    /// List finalized sessions for a user on a UTC date
    Logs {
        #[arg(long)]
        user_id: Option<i64>,

        /// YYYY-MM-DD (defaults to today, UTC)
        #[arg(long)]
        date: Option<String>,
    },

    /// List activity events recorded for a session
    Events {
        #[arg(value_name = "SESSION_ID")]
        session_id: SessionId,
    },

    /// Append an activity event to a session
    RecordEvent {
        #[arg(value_name = "SESSION_ID")]
        session_id: SessionId,

        #[arg(value_name = "EVENT_TYPE")]
        event_type: String,

        /// Arbitrary JSON payload
        #[arg(long, value_name = "JSON")]
        data: Option<String>,
    },

    /// Check that the ledger is reachable
    Health,
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        tracing::error!(error = %err, "activetime command failed");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), ClientError> {
    let mut config = config::load_config(cli.config)?;
    if let Some(server) = cli.server {
        config.server_addr = server;
        config.validate()?;
    }
    let api = LedgerApi::new(Box::new(TcpTransport::new(
        config.server_addr.clone(),
        config.request_timeout(),
    )));

    match cli.command {
        Commands::Track { identity, context } => {
            let identity = resolve_identity(&config, identity)?;
            track(api, &config, identity, context)
        }
        Commands::Start {
            identity,
            context_path,
            context_name,
        } => {
            let identity = resolve_identity(&config, identity)?;
            let context = ContextInfo::from_path(&context_path);
            let session_id = api.start(&StartParams {
                user_id: identity.user_id,
                task_id: identity.task_id,
                app_name: identity.app_name,
                context_name: context_name.unwrap_or(context.name),
                context_path: context.path,
            })?;
            print_json(&serde_json::json!({ "session_id": session_id }))
        }
        Commands::Heartbeat { session_id } => {
            api.heartbeat(session_id)?;
            print_ack()
        }
        Commands::Pause { session_id } => {
            api.pause(session_id)?;
            print_ack()
        }
        Commands::Resume { session_id } => {
            api.resume(session_id)?;
            print_ack()
        }
        Commands::Stop { session_id } => {
            api.stop(session_id)?;
            print_ack()
        }
        Commands::Logs { user_id, date } => {
            let user_id = user_id
                .or(config.user_id)
                .ok_or_else(|| ClientError::Config("user_id is required".to_string()))?;
            let day = match date {
                Some(raw) => NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|_| {
                    ClientError::Validation(format!("date must be formatted YYYY-MM-DD: {}", raw))
                })?,
                None => Utc::now().date_naive(),
            };
            print_json(&api.logs(user_id, day)?)
        }
        Commands::Events { session_id } => print_json(&api.session_events(session_id)?),
        Commands::RecordEvent {
            session_id,
            event_type,
            data,
        } => {
            let event_data = match data {
                Some(raw) => Some(serde_json::from_str(&raw).map_err(|err| {
                    ClientError::Validation(format!("--data is not valid JSON: {}", err))
                })?),
                None => None,
            };
            api.record_event(&RecordEventParams {
                session_id,
                event_type,
                event_data,
            })?;
            print_ack()
        }
        Commands::Health => print_json(&api.health()?),
    }
}

fn track(
    api: LedgerApi,
    config: &ClientConfig,
    identity: Identity,
    context: Option<String>,
) -> Result<(), ClientError> {
    let mut host = LineHost::new(identity.app_name.clone(), io::stdin().lock());
    let client = SessionClient::new(api, identity, config.idle_timeout(), Utc::now());
    let settings = TrackerSettings {
        poll_interval: config.poll_interval(),
        stop_wait: config.stop_wait(),
    };
    let tracker = Tracker::spawn(client, settings, Box::new(SystemClock))?;
    let handle = tracker.handle();

    info!(
        app_name = host.app_name(),
        server = %config.server_addr,
        idle_timeout_secs = config.idle_timeout_secs,
        "Tracker running"
    );
    if let Some(path) = context {
        handle.open_context(&path);
    }

    let result = host.run(&handle);
    tracker.wait();
    result
}

fn resolve_identity(config: &ClientConfig, args: IdentityArgs) -> Result<Identity, ClientError> {
    let user_id = args.user_id.or(config.user_id).ok_or_else(|| {
        ClientError::Config("user_id is required (--user-id or config)".to_string())
    })?;
    if user_id <= 0 {
        return Err(ClientError::Config("user_id must be positive".to_string()));
    }
    Ok(Identity {
        user_id,
        task_id: args.task_id.or(config.task_id),
        app_name: args.app_name.unwrap_or_else(|| config.app_name.clone()),
    })
}

fn print_ack() -> Result<(), ClientError> {
    print_json(&serde_json::json!({ "ack": true }))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), ClientError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| ClientError::Protocol(format!("Failed to render output: {}", err)))?;
    println!("{}", rendered);
    Ok(())
}
