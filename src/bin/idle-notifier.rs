#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! IMAP IDLE notifier daemon
//!
//! `run` watches every configured folder until SIGINT/SIGTERM.
//! SIGHUP reloads the settings file, SIGUSR1 prints account status as
//! JSON on stdout.

use anyhow::bail;
use clap::{Parser, Subcommand};
use idle_notifier::{DedupStore, Notifier, Resolved, Settings, StatusBoard, Supervisor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "idle-notifier", version)]
#[command(about = "Push notifications for new IMAP mail, using IDLE")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Settings file
    #[arg(
        long,
        short,
        global = true,
        env = "IDLE_NOTIFIER_CONFIG",
        default_value = "config.toml"
    )]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Watch all configured folders (default)
    Run,

    /// Validate the settings file and print what would be watched
    Check,

    /// Send one test notification through every configured target set
    TestNotify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command.unwrap_or(Command::Run) {
        Command::Run => cmd_run(&args.config).await,
        Command::Check => cmd_check(&args),
        Command::TestNotify => cmd_test_notify(&args).await,
    }
}

fn load(path: &Path) -> anyhow::Result<Resolved> {
    Ok(Settings::load(path)?.resolve()?)
}

fn cmd_check(args: &Args) -> anyhow::Result<()> {
    let resolved = load(&args.config)?;

    if args.json {
        let accounts: Vec<_> = resolved
            .accounts
            .iter()
            .map(|a| {
                serde_json::json!({
                    "account": a.id,
                    "port": a.port,
                    "tls": a.tls,
                    "targets": a.notifier.targets().iter().map(|t| t.label()).collect::<Vec<_>>(),
                })
            })
            .collect();
        let summary = serde_json::json!({
            "accounts": accounts,
            "capabilities": resolved.capabilities,
            "store": resolved.store_path,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Settings OK: {}", args.config.display());
    println!("Store: {}", resolved.store_path.display());
    println!("Backends: {}", resolved.capabilities);
    for account in &resolved.accounts {
        println!(
            "  {} (port {}, {:?}, {} target(s))",
            account.id,
            account.port,
            account.tls,
            account.notifier.targets().len()
        );
    }
    Ok(())
}

async fn cmd_test_notify(args: &Args) -> anyhow::Result<()> {
    let resolved = load(&args.config)?;

    // Accounts inheriting the global targets share one notifier.
    let mut notifiers: Vec<Arc<Notifier>> = Vec::new();
    for account in &resolved.accounts {
        if !notifiers.iter().any(|n| Arc::ptr_eq(n, &account.notifier)) {
            notifiers.push(Arc::clone(&account.notifier));
        }
    }

    let mut failed = 0;
    for notifier in &notifiers {
        let report = notifier
            .send(Some(env!("CARGO_PKG_NAME")), Some("Test notification"))
            .await;
        failed += report.failed;
        if args.json {
            println!(
                "{}",
                serde_json::json!({ "delivered": report.delivered, "failed": report.failed })
            );
        } else {
            println!("delivered: {}, failed: {}", report.delivered, report.failed);
        }
    }

    if failed > 0 {
        bail!("{failed} target(s) failed");
    }
    Ok(())
}

async fn cmd_run(config_path: &Path) -> anyhow::Result<()> {
    let mut resolved = load(config_path)?;
    let store_path = resolved.store_path.clone();
    let store = Arc::new(DedupStore::open(&store_path)?);
    let status = StatusBoard::new();

    let shutdown = CancellationToken::new();
    spawn_shutdown_listener(shutdown.clone())?;
    spawn_status_dump(status.clone())?;
    let mut hangup = signal(SignalKind::hangup())?;

    loop {
        info!(
            accounts = resolved.accounts.len(),
            backends = %resolved.capabilities,
            "Starting monitoring"
        );
        if resolved.store_path != store_path {
            warn!("Store path changes take effect after a restart");
        }

        let generation = shutdown.child_token();
        let supervisor = Supervisor::new(resolved.accounts, resolved.supervisor, Arc::clone(&store))
            .with_status(status.clone());
        let mut handle = tokio::spawn(supervisor.run(generation.clone()));

        let next = loop {
            tokio::select! {
                summary = &mut handle => {
                    let summary = summary?;
                    if shutdown.is_cancelled() {
                        info!("Shut down");
                        return Ok(());
                    }
                    bail!("All accounts stopped ({} failed)", summary.failed);
                }
                Some(()) = hangup.recv() => {
                    info!(path = %config_path.display(), "Reloading settings");
                    match load(config_path) {
                        Ok(next) => break next,
                        Err(e) => error!("Reload failed, keeping current settings: {:#}", e),
                    }
                }
            }
        };

        generation.cancel();
        let summary = handle.await?;
        info!(
            stopped = summary.cancelled,
            failed = summary.failed,
            "Previous generation stopped"
        );
        resolved = next;
    }
}

fn spawn_shutdown_listener(token: CancellationToken) -> std::io::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        info!("Shutting down");
        token.cancel();
    });
    Ok(())
}

fn spawn_status_dump(status: StatusBoard) -> std::io::Result<()> {
    let mut user1 = signal(SignalKind::user_defined1())?;
    tokio::spawn(async move {
        while user1.recv().await.is_some() {
            match serde_json::to_string_pretty(&status.snapshot()) {
                Ok(json) => println!("{json}"),
                Err(e) => error!("Cannot serialize status: {}", e),
            }
        }
    });
    Ok(())
}
