use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use maq_core::{resolve_label, MachineCategory, MachineStatus};
use maq_notify::{Dispatcher, HttpGateway};
use maq_snapshot::{HandoverWizard, SnapshotRecorder};
use maq_storage::{StatusStore, BOARD_DOC_PATH};
use maq_sync::{SyncEngine, WsRemote};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use url::Url;

const SNAPSHOT_WAIT: Duration = Duration::from_secs(3);
const FLUSH_WAIT: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "maq")]
#[command(about = "Shop-floor machine status board", long_about = None)]
struct Cli {
    /// Websocket change feed, e.g. ws://hub:8600/ws
    #[arg(long, env = "MAQ_HUB_URL", default_value = "ws://127.0.0.1:8600/ws")]
    hub: String,
    /// Push fan-out endpoint on the hub
    #[arg(
        long,
        env = "MAQ_HUB_SEND_URL",
        default_value = "http://127.0.0.1:8600/api/send-fcm"
    )]
    send_url: String,
    /// Local mirror database
    #[arg(long, env = "MAQ_DB_PATH", default_value = ".maquinas/board.db")]
    db: String,
    /// Delivery token for this device; without one, no pushes are sent
    #[arg(long, env = "MAQ_PUSH_TOKEN")]
    push_token: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the live board, printing it on every change
    Watch,
    /// Change one machine's status and notify the floor
    Set {
        machine: String,
        /// Category by code or name, e.g. 1, mecanico, producing
        category: String,
        /// Index into the category's reason list
        #[arg(long)]
        reason: Option<usize>,
        /// Free text, required when the reason is "Otros"
        #[arg(long)]
        reason_text: Option<String>,
    },
    /// Record a shift-handover snapshot of the current board
    Snapshot {
        #[arg(long)]
        operator: String,
        #[arg(long)]
        observations: Option<String>,
        /// Reviewed-machine notes as machine=note, repeatable
        #[arg(long = "reviewed")]
        reviewed: Vec<String>,
    },
    /// Print the board without connecting (mirror only)
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Watch => watch(&cli).await,
        Commands::Set {
            machine,
            category,
            reason,
            reason_text,
        } => set(&cli, machine, category, *reason, reason_text.clone()).await,
        Commands::Snapshot {
            operator,
            observations,
            reviewed,
        } => snapshot(&cli, operator, observations.as_deref(), reviewed).await,
        Commands::Show => show(&cli),
    }
}

fn open_mirror(cli: &Cli) -> Result<StatusStore> {
    if let Some(parent) = std::path::Path::new(&cli.db).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    StatusStore::open(&cli.db).with_context(|| format!("open mirror at {}", cli.db))
}

/// Connects to the hub and returns the remote plus the board document's
/// feed, registered before the connection task starts so the initial
/// snapshot cannot slip past it.
fn connect(cli: &Cli) -> Result<(Arc<WsRemote>, mpsc::UnboundedReceiver<Value>)> {
    let url = Url::parse(&cli.hub).with_context(|| format!("parse hub url {}", cli.hub))?;
    let client_id = format!("board-{}", std::process::id());
    let (remote, mut feeds) =
        WsRemote::connect(url, &client_id, vec![BOARD_DOC_PATH.to_string()]);
    let feed = feeds.pop().ok_or_else(|| anyhow!("missing board feed"))?;
    Ok((remote, feed))
}

/// Waits for the hub's initial document and applies it, leaving the engine
/// ready to publish the next local mutation. A hub that has never stored
/// the document sends nothing; the engine then starts from its mirror.
async fn sync_up(
    engine: &mut SyncEngine<WsRemote>,
    feed: &mut mpsc::UnboundedReceiver<Value>,
) {
    match tokio::time::timeout(SNAPSHOT_WAIT, feed.recv()).await {
        Ok(Some(payload)) => {
            if engine.apply_remote(&payload) {
                engine.publish();
            }
        }
        _ => {
            engine.publish();
        }
    }
}

async fn watch(cli: &Cli) -> Result<()> {
    let (remote, mut feed) = connect(cli)?;
    let mirror = open_mirror(cli)?;
    let mut engine = SyncEngine::new(remote, Some(mirror));

    print_board(&engine);
    loop {
        tokio::select! {
            payload = feed.recv() => {
                match payload {
                    Some(payload) => {
                        if engine.apply_remote(&payload) {
                            engine.publish();
                            print_board(&engine);
                        }
                    }
                    None => return Err(anyhow!("change feed closed")),
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn set(
    cli: &Cli,
    machine: &str,
    category: &str,
    reason: Option<usize>,
    reason_text: Option<String>,
) -> Result<()> {
    let category: MachineCategory = category
        .parse()
        .map_err(|_| anyhow!("unknown category: {category}"))?;
    let status = MachineStatus::new(category, reason, reason_text)
        .map_err(|err| anyhow!("invalid status: {err}"))?;
    let label = resolve_label(
        status.category,
        status.reason_index,
        status.reason_text.as_deref(),
    );

    let (remote, mut feed) = connect(cli)?;
    let mirror = open_mirror(cli)?;
    let mut engine = SyncEngine::new(remote, Some(mirror));
    sync_up(&mut engine, &mut feed).await;

    let published = engine.set_status(machine, status);
    if published {
        let mut dispatcher = Dispatcher::new(
            HttpGateway::new(cli.send_url.clone()),
            cli.push_token.clone(),
        );
        dispatcher.dispatch(
            &format!("Cambio en máquina {machine}"),
            &label,
            machine,
            Instant::now(),
        );
    }
    // Writes are queued on the feed task; give it a moment to drain.
    tokio::time::sleep(FLUSH_WAIT).await;

    println!("{machine}: {label}");
    Ok(())
}

async fn snapshot(
    cli: &Cli,
    operator: &str,
    observations: Option<&str>,
    reviewed: &[String],
) -> Result<()> {
    let mut wizard = HandoverWizard::new();
    wizard.select_operator(operator)?;
    for entry in reviewed {
        let (machine, note) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("expected machine=note, got: {entry}"))?;
        wizard.add_log_entry(machine, note)?;
    }
    if let Some(text) = observations {
        wizard.set_observations(text)?;
    }
    wizard.review()?;
    let draft = wizard.confirm()?;

    let (remote, mut feed) = connect(cli)?;
    let mirror = open_mirror(cli)?;
    let mut engine = SyncEngine::new(remote.clone(), Some(mirror));
    sync_up(&mut engine, &mut feed).await;

    let recorder = SnapshotRecorder::new(remote);
    let outcome = recorder.record(engine.board(), &draft, chrono::Local::now());
    tokio::time::sleep(FLUSH_WAIT).await;

    if outcome.observations_only {
        println!("handover {} (observaciones)", outcome.key);
    } else {
        println!(
            "snapshot {} ({} máquinas)",
            outcome.key, outcome.machines_recorded
        );
    }
    Ok(())
}

fn show(cli: &Cli) -> Result<()> {
    let mirror = open_mirror(cli)?;
    let board = mirror
        .load_board()
        .context("load mirrored board")?
        .unwrap_or_default();
    if board.is_empty() {
        println!("(no mirrored state)");
        return Ok(());
    }
    for (machine_id, status) in board.iter() {
        let label = resolve_label(
            status.category,
            status.reason_index,
            status.reason_text.as_deref(),
        );
        println!("{machine_id}: {label}");
    }
    Ok(())
}

fn print_board(engine: &SyncEngine<WsRemote>) {
    let board = engine.board();
    if board.is_empty() {
        println!("(empty board)");
        return;
    }
    for (machine_id, status) in board.iter() {
        let label = resolve_label(
            status.category,
            status.reason_index,
            status.reason_text.as_deref(),
        );
        println!("{machine_id}: {label}");
    }
    println!("--");
}
