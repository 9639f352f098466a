//! dtwins: drive the lifecycle of one Azure Digital Twins instance.
//!
//! Each invocation runs a single create, read, update, delete or import and
//! prints the resulting state as JSON on stdout. SIGINT/SIGTERM cancel the
//! operation in flight; remote work already accepted keeps running.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dtwins_provider::arm::ArmClient;
use dtwins_provider::config::DEFAULT_ENDPOINT;
use dtwins_provider::test_util::InMemoryTwins;
use dtwins_provider::{
    CancellationToken, ChangeSet, DesiredConfig, DigitalTwinsApi, DigitalTwinsReconciler,
    ProviderConfig, Reconciler, RemoteState, Tags, validate_import_id,
};

/// Digital Twins instance lifecycle driver
#[derive(Parser, Debug)]
#[command(name = "dtwins", version, about)]
struct Args {
    /// Azure subscription ID
    #[arg(long, env = "ARM_SUBSCRIPTION_ID")]
    subscription_id: String,

    /// Resource Manager endpoint
    #[arg(long, env = "ARM_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Bearer token for Resource Manager
    #[arg(long, env = "ARM_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Run against an in-memory control plane instead of Azure
    #[arg(long)]
    in_memory: bool,

    /// Create timeout in seconds
    #[arg(long)]
    create_timeout: Option<u64>,

    /// Read timeout in seconds
    #[arg(long)]
    read_timeout: Option<u64>,

    /// Update timeout in seconds
    #[arg(long)]
    update_timeout: Option<u64>,

    /// Delete timeout in seconds
    #[arg(long)]
    delete_timeout: Option<u64>,

    /// Initial delay between operation status polls, in seconds
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval: u64,

    /// Upper bound for the poll delay, in seconds
    #[arg(long, default_value = "60")]
    max_poll_interval: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new instance
    Create {
        /// Instance name
        #[arg(long)]
        name: String,

        /// Resource group holding the instance
        #[arg(long)]
        resource_group: String,

        /// Azure region, e.g. "westus"
        #[arg(long)]
        location: String,

        /// Tag as key=value (repeatable)
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,
    },
    /// Show the current state of an instance
    Read {
        /// Resource ID
        id: String,
    },
    /// Replace the tags of an instance
    Update {
        /// Resource ID
        id: String,

        /// Tag as key=value (repeatable)
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,

        /// Remove all tags
        #[arg(long, conflicts_with = "tags")]
        clear_tags: bool,
    },
    /// Delete an instance
    Delete {
        /// Resource ID
        id: String,
    },
    /// Adopt an existing instance
    Import {
        /// Resource ID
        id: String,
    },
}

fn parse_tag(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

impl Args {
    fn provider_config(&self) -> ProviderConfig {
        let mut config = ProviderConfig::new(self.subscription_id.as_str());
        config.endpoint = self.endpoint.clone();

        let timeouts = &mut config.timeouts;
        for (flag, slot) in [
            (self.create_timeout, &mut timeouts.create),
            (self.read_timeout, &mut timeouts.read),
            (self.update_timeout, &mut timeouts.update),
            (self.delete_timeout, &mut timeouts.delete),
        ] {
            if let Some(secs) = flag {
                *slot = Duration::from_secs(secs);
            }
        }

        config.poll.interval = Duration::from_secs(self.poll_interval);
        config.poll.max_interval = Duration::from_secs(self.max_poll_interval);
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging on stderr; stdout carries the JSON result
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "dtwins=info,dtwins_provider=info,reqwest=warn,hyper=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = args.provider_config();

    // Reject a malformed import ID before touching the network
    if let Command::Import { id } = &args.command {
        validate_import_id(id)?;
    }

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let output = if args.in_memory {
        info!("Using in-memory control plane");
        let api = Arc::new(InMemoryTwins::default());
        let reconciler = DigitalTwinsReconciler::from_config(&config, api);
        run(&reconciler, args.command, &cancel).await?
    } else {
        let Some(token) = args.access_token.as_deref() else {
            bail!("--access-token (or ARM_ACCESS_TOKEN) is required unless --in-memory is set");
        };
        let client = ArmClient::new(&config, token).context("failed to build ARM client")?;
        info!("Resource Manager endpoint: {}", config.endpoint);
        let reconciler = DigitalTwinsReconciler::from_config(&config, Arc::new(client));
        run(&reconciler, args.command, &cancel).await?
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cancel_on_signal(cancel: CancellationToken) {
    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            // Still honor Ctrl-C
            if signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
            return;
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => info!("Received SIGINT, cancelling"),
        _ = sigterm.recv() => info!("Received SIGTERM, cancelling"),
    }
    cancel.cancel();
}

async fn run<A: DigitalTwinsApi>(
    reconciler: &DigitalTwinsReconciler<A>,
    command: Command,
    cancel: &CancellationToken,
) -> Result<Value> {
    let output = match command {
        Command::Create {
            name,
            resource_group,
            location,
            tags,
        } => {
            let desired = DesiredConfig {
                name,
                resource_group_name: resource_group,
                location,
                tags: tags.into_iter().collect(),
            };
            let (id, state) = reconciler.create(&desired, cancel).await?;
            json!({ "id": id.encode(), "state": state })
        }
        Command::Read { id } => found(reconciler.read(&id, cancel).await?),
        Command::Update {
            id,
            tags,
            clear_tags,
        } => {
            let changes = if clear_tags {
                ChangeSet::tags(Tags::new())
            } else if tags.is_empty() {
                ChangeSet::default()
            } else {
                ChangeSet::tags(tags.into_iter().collect())
            };
            found(reconciler.update(&id, &changes, cancel).await?)
        }
        Command::Delete { id } => {
            reconciler.delete(&id, cancel).await?;
            json!({ "deleted": id })
        }
        Command::Import { id } => {
            let state = reconciler.import(&id, cancel).await?;
            json!({ "id": state.id.clone(), "state": state })
        }
    };
    Ok(output)
}

fn found(state: Option<RemoteState>) -> Value {
    match state {
        Some(state) => json!({ "found": true, "state": state }),
        None => json!({ "found": false }),
    }
}
