use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value, json};
use tracing::info;

use courier_core::app::{Outbox, OutboxBuilder};
use courier_core::config::{CourierConfig, load_config, load_config_from_path};
use courier_core::domain::NewEvent;
use courier_core::impls::SqliteOutboxStore;

/// courier - forward queued events to an HTTP sink.
#[derive(Parser, Debug)]
#[command(name = "courier", version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./courier.toml when present).
    #[arg(long, global = true, env = "COURIER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue one event, then deliver everything pending.
    Enqueue {
        /// Event type, e.g. `create-table`.
        event: String,

        /// When the event happened (RFC 3339). Defaults to now.
        #[arg(long)]
        created: Option<DateTime<Utc>>,

        #[arg(long)]
        actor: Option<String>,

        #[arg(long)]
        database: Option<String>,

        #[arg(long)]
        table: Option<String>,

        /// JSON object of extra properties.
        #[arg(long)]
        properties: Option<String>,
    },
    /// Deliver everything pending and wait until done.
    Flush,
    /// Show pending / abandoned / sent counts.
    Status,
    /// List abandoned events.
    Abandoned {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Delete abandoned events.
    PurgeAbandoned,
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("courier_core={log_level},courier={log_level},warn"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

async fn open_outbox(config: &CourierConfig) -> anyhow::Result<Outbox> {
    let store = SqliteOutboxStore::open(&config.storage.database_path)
        .await
        .with_context(|| format!("opening {}", config.storage.database_path))?;
    let outbox = OutboxBuilder::from_config(&config.forward)?
        .store(Arc::new(store))
        .build()?;
    outbox.bootstrap().await?;
    Ok(outbox)
}

fn parse_properties(raw: Option<&str>) -> anyhow::Result<Map<String, Value>> {
    match raw {
        None => Ok(Map::new()),
        Some(raw) => serde_json::from_str(raw).context("--properties must be a JSON object"),
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config_from_path(path)?,
        None => load_config()?,
    };
    init_tracing(&config.log.level);

    let outbox = open_outbox(&config).await?;
    if !outbox.delivery_enabled() {
        info!("forward.api_url is not set, events are stored but not delivered");
    }

    match cli.command {
        Commands::Enqueue {
            event,
            created,
            actor,
            database,
            table,
            properties,
        } => {
            let mut new_event = NewEvent::new(event, created.unwrap_or_else(Utc::now))
                .properties(parse_properties(properties.as_deref())?);
            if let Some(actor) = actor {
                new_event = new_event.actor(actor);
            }
            if let Some(database) = database {
                new_event = new_event.database(database);
            }
            if let Some(table) = table {
                new_event = new_event.table(table);
            }

            outbox.start().await?;
            let id = outbox.enqueue(new_event).await?;
            outbox.shutdown().await;
            print_json(&json!({ "id": id.to_canonical() }))?;
        }
        Commands::Flush => {
            outbox.start().await?;
            outbox.shutdown().await;
            print_json(&outbox.status().await?)?;
        }
        Commands::Status => {
            print_json(&outbox.status().await?)?;
        }
        Commands::Abandoned { limit } => {
            print_json(&outbox.abandoned(limit).await?)?;
        }
        Commands::PurgeAbandoned => {
            let removed = outbox.purge_abandoned().await?;
            print_json(&json!({ "removed": removed }))?;
        }
    }

    Ok(())
}
