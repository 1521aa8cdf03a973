//! pbchat CLI entry point.
//!
//! Provides `check`, `services`, and `demo` subcommands for validating a
//! configuration, listing the known service types, or running a scripted
//! session against the in-process broker.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};

use pbchat::config::{load_config, runtime_paths};
use pbchat::credentials::load_default_credentials;
use pbchat::rpc::memory::MemoryBroker;
use pbchat::rpc::RpcTimeouts;
use pbchat::session::{log_on_auto, Account, ServiceDescriptor, ServiceType, WordsClient};
use pbchat::types::Metadata;
use pbchat::ui::{ChannelUi, ChatUi, UiEvent};

/// pbchat: chat client adapter for perspective-broker services.
#[derive(Parser)]
#[command(name = "pbchat", version, about)]
struct Cli {
    /// Config file to use instead of `~/.pbchat/config.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Load and validate the configuration, then list its accounts.
    Check,
    /// List registered service types.
    Services,
    /// Run a scripted two-account session against an in-process broker.
    Demo {
        /// Also write JSON logs to this directory.
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Check => handle_check(cli.config),
        Command::Services => {
            handle_services();
            Ok(())
        }
        Command::Demo { log_dir } => handle_demo(log_dir).await,
    }
}

/// Validate the configuration and report every account.
fn handle_check(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    pbchat::logging::init_cli();

    let path = match config_path {
        Some(path) => path,
        None => runtime_paths()?.config_toml,
    };
    let config = load_config(&path)?;
    config
        .validate()
        .with_context(|| format!("invalid config at {}", path.display()))?;
    let credentials = load_default_credentials()?;

    info!(
        path = %path.display(),
        accounts = config.accounts.len(),
        call_timeout_secs = config.rpc.call_timeout_secs,
        connect_timeout_secs = config.rpc.connect_timeout_secs,
        "configuration loaded"
    );

    let mut unresolved = 0_usize;
    for entry in &config.accounts {
        match Account::from_config(entry, &credentials) {
            Ok(account) => info!(
                account = %account.name,
                host = %account.host,
                port = account.port,
                auto_login = account.auto_login,
                "account ok"
            ),
            Err(e) => {
                warn!(account = %entry.name, error = %format!("{e:#}"), "account unusable");
                unresolved = unresolved.saturating_add(1);
            }
        }
        for service in &entry.services {
            if service.service_type.is_implemented() {
                info!(
                    account = %entry.name,
                    service_type = %service.service_type,
                    service = %service.service_name,
                    perspective = %service.perspective_name,
                    "service"
                );
            } else {
                warn!(
                    account = %entry.name,
                    service_type = %service.service_type,
                    service = %service.service_name,
                    "service type has no client and will not attach"
                );
            }
        }
    }

    if unresolved > 0 {
        anyhow::bail!("{unresolved} account(s) have no usable password");
    }
    info!("configuration valid");
    Ok(())
}

/// List every registered service type.
fn handle_services() {
    pbchat::logging::init_cli();
    for service_type in ServiceType::ALL {
        info!(
            service_type = %service_type,
            implemented = service_type.is_implemented(),
            "registered service type"
        );
    }
}

/// Log every UI event queued so far.
fn drain(events: &mut UnboundedReceiver<UiEvent>) {
    while let Ok(event) = events.try_recv() {
        info!(account = %event.account(), "{event}");
    }
}

fn words(connection: &pbchat::session::Connection) -> anyhow::Result<Arc<WordsClient>> {
    connection
        .words("words")
        .ok_or_else(|| anyhow::anyhow!("words service not attached"))
}

/// Script a session between two accounts on one in-process broker.
async fn handle_demo(log_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let _logging_guard = match log_dir {
        Some(dir) => Some(pbchat::logging::init_production(&dir)?),
        None => {
            pbchat::logging::init_cli();
            None
        }
    };

    // An older service: metadata-carrying messages are refused.
    let broker = MemoryBroker::new()
        .with_user("alice", "wonderland")
        .with_user("bob", "builder")
        .with_service("words")
        .with_contact("words", "alice", "bob")
        .with_contact("words", "bob", "alice")
        .reject_metadata();

    let accounts = vec![
        Arc::new(Account::new(
            "home",
            true,
            "localhost",
            8787,
            "alice",
            "wonderland",
            vec![
                ServiceDescriptor::new(ServiceType::Words, "words", "alice"),
                ServiceDescriptor::new(ServiceType::Reality, "stage", "alice"),
            ],
        )),
        Arc::new(Account::new(
            "work",
            true,
            "localhost",
            8787,
            "bob",
            "builder",
            vec![ServiceDescriptor::new(ServiceType::Words, "words", "bob")],
        )),
    ];

    let (ui, mut events) = ChannelUi::channel();
    let ui: Arc<dyn ChatUi> = Arc::new(ui);
    let timeouts = RpcTimeouts::default();

    let mut connections = Vec::new();
    for (name, outcome) in log_on_auto(&accounts, &broker, ui, &timeouts).await {
        let connection = outcome.with_context(|| format!("account {name} failed to log on"))?;
        for failure in connection.failures() {
            warn!(
                account = %name,
                service = %failure.descriptor.service_name,
                error = %failure.error,
                "service skipped"
            );
        }
        connections.push(connection);
    }
    drain(&mut events);

    let (alice, bob) = match connections.as_slice() {
        [a, b] => (words(a)?, words(b)?),
        _ => anyhow::bail!("expected two connections"),
    };

    broker.push_contact_list("words", "alice");
    alice.add_contact("bob")?.await?;
    drain(&mut events);

    bob.join_group("lobby").await?;
    alice.join_group("lobby").await?;
    drain(&mut events);

    alice.set_topic("lobby", "release planning")?.await?;
    drain(&mut events);

    let mut metadata = Metadata::new();
    metadata.insert("style".to_owned(), Value::from("bold"));
    alice
        .send_group("lobby", "shipping on friday", Some(&metadata))
        .await?;
    bob.send_direct("alice", "see you there", None).await?;
    drain(&mut events);

    alice.leave_group("lobby").await?;
    drain(&mut events);

    for connection in connections {
        connection.disconnect();
    }
    drain(&mut events);

    info!(calls = broker.calls().len(), "demo finished");
    Ok(())
}
