mod config;

use anyhow::{Context, anyhow};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use config::Config;
use netmem_core::codec::encode_same_network_response;
use netmem_core::{
    DeleteOutcome, EventType, Listener, NetworkMemoryStore, channel_listener,
};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const ALL_EVENT_TYPES: [EventType; 4] = [
    EventType::NudFailureRoam,
    EventType::NudFailureConfirm,
    EventType::NudFailureOrganic,
    EventType::NudFailureMacAddressChanged,
];

#[derive(Parser)]
#[command(name = "netmem")]
#[command(about = "Inspect and maintain a network memory store")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "netmem.yaml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Purge expired and retention-elapsed records now
    Sweep,
    /// Discard every record of every kind
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
    /// Print the attributes stored for an L2 key
    Show { l2_key: String },
    /// Tell whether two L2 keys are the same L3 network
    Same { l2_key1: String, l2_key2: String },
    /// Fetch a blob
    Blob {
        l2_key: String,
        client_id: String,
        name: String,

        /// Write the blob here instead of printing its size
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Count events of a cluster
    Events {
        cluster: String,

        /// Lower bound on event timestamps, ms since the epoch
        #[arg(long, default_value_t = 0)]
        since: i64,

        /// Event type codes to count (default: all)
        #[arg(long = "type", value_delimiter = ',')]
        types: Vec<i32>,
    },
    /// Delete an L2 key, or every key of a cluster
    Delete {
        target: String,

        /// Treat the target as a cluster
        #[arg(long)]
        cluster: bool,

        /// Remove records irrecoverably instead of soft-deleting them
        #[arg(long)]
        wipe: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netmem=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut cfg = match Config::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    // One-shot process: sweeping happens only on request.
    cfg.store.sweep_interval_ms = 0;

    let store = match NetworkMemoryStore::open(cfg.store) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = execute(&store, cli.command).await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn execute(store: &NetworkMemoryStore, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Sweep => {
            let report = wait(|l| store.sweep(Some(l))).await??;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Reset { yes } => {
            if !yes {
                return Err(anyhow!("refusing to reset without --yes"));
            }
            wait(|l| store.factory_reset(Some(l))).await??;
            println!("store reset");
        }
        Commands::Show { l2_key } => {
            let attributes = wait(|l| store.retrieve_network_attributes(&l2_key, Some(l)))
                .await?
                .with_context(|| format!("no attributes for {}", l2_key))?;
            println!("{}", serde_json::to_string_pretty(&attributes)?);
            if let Some(expiry) = attributes
                .expiry
                .value()
                .and_then(|ms| chrono::DateTime::from_timestamp_millis(*ms))
            {
                println!("expires {}", expiry.to_rfc3339());
            }
        }
        Commands::Same { l2_key1, l2_key2 } => {
            let response =
                wait(|l| store.is_same_network(&l2_key1, &l2_key2, Some(l))).await??;
            let encoded = encode_same_network_response(&response)?;
            println!("{}", String::from_utf8(encoded)?);
        }
        Commands::Blob {
            l2_key,
            client_id,
            name,
            output,
        } => {
            let data: Bytes = wait(|l| store.retrieve_blob(&l2_key, &client_id, &name, Some(l)))
                .await?
                .with_context(|| format!("no blob {}/{}/{}", l2_key, client_id, name))?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &data)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("wrote {} bytes to {}", data.len(), path.display());
                }
                None => println!("{} bytes", data.len()),
            }
        }
        Commands::Events {
            cluster,
            since,
            types,
        } => {
            let event_types = if types.is_empty() {
                ALL_EVENT_TYPES.to_vec()
            } else {
                types
                    .into_iter()
                    .map(EventType::try_from)
                    .collect::<netmem_core::Result<Vec<_>>>()?
            };
            let since_times = vec![since; event_types.len()];
            let counts = wait(|l| {
                store.retrieve_network_event_count(
                    &cluster,
                    since_times,
                    event_types.clone(),
                    Some(l),
                )
            })
            .await??;
            for (event_type, count) in event_types.iter().zip(counts) {
                println!("{:?}: {}", event_type, count);
            }
        }
        Commands::Delete {
            target,
            cluster,
            wipe,
        } => {
            let outcome: DeleteOutcome = if cluster {
                wait(|l| store.delete_cluster(&target, wipe, Some(l))).await?
            } else {
                wait(|l| store.delete(&target, wipe, Some(l))).await?
            };
            if !outcome.status.is_success() {
                return Err(anyhow!(
                    "delete finished with {} after removing {} records",
                    outcome.status,
                    outcome.affected
                ));
            }
            println!("deleted {} records", outcome.affected);
        }
    }

    Ok(())
}

/// Issue one request and wait for its listener.
async fn wait<T: Send + 'static>(call: impl FnOnce(Listener<T>)) -> anyhow::Result<T> {
    let (listener, rx) = channel_listener();
    call(listener);
    rx.await.map_err(|_| anyhow!("store dropped the request"))
}
