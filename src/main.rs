//! study_timer - Pomodoro focus timer and study tracker.
//!
//! # Commands
//!
//! - `study_timer run`: foreground timer with a live status line
//! - `study_timer daemon`: timer plus the WebSocket control channel used by
//!   the floating widget
//! - `study_timer task ...`: to-do list management
//! - `study_timer sessions`: completed-phase history
//! - `study_timer progress ...`: subject progress log
//! - `study_timer settings`: work/break lengths
//!
//! See `study_timer::config` for environment variables.

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use study_timer::config::{self, Config};
use study_timer::error;
use study_timer::notify::DesktopNotifier;
use study_timer::pomodoro::engine::{TimerEngine, TimerSnapshot, format_clock};
use study_timer::pomodoro::runner::{TimerRunner, lock_engine};
use study_timer::pomodoro::settings::{BREAK_MINUTES_RANGE, WORK_MINUTES_RANGE, parse_minutes};
use study_timer::progress::{ProgressInput, ProgressStore};
use study_timer::store::{FileStore, StoreKeys};
use study_timer::widget::FloatingWidget;
use study_timer::ws::control_server::{ControlState, bind_control_server, serve};

/// Progress entries written without `--user` belong to this owner.
const LOCAL_USER: &str = "local";

#[derive(Parser, Debug)]
#[command(name = "study_timer")]
#[command(author, version, about = "Pomodoro focus timer and study tracker", long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    STUDY_TIMER_DATA_DIR       Preference store directory
    STUDY_TIMER_USER           Per-user namespace
    STUDY_TIMER_WS_ADDR        Daemon address (default: 127.0.0.1:8765)
    STUDY_TIMER_NOTIFICATIONS  Desktop notifications (default: true)
    STUDY_TIMER_SOUND          Terminal bell (default: true)
")]
struct Cli {
    /// Namespace sessions, tasks and settings to this user id.
    #[arg(long, global = true)]
    user: Option<String>,

    /// Directory holding the stored lists.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the timer in this terminal until Ctrl+C.
    Run {
        /// Work length in minutes (1-60).
        #[arg(short, long)]
        work: Option<String>,

        /// Break length in minutes (1-30).
        #[arg(short, long = "break")]
        brk: Option<String>,

        /// Task credited with completed pomodoros.
        #[arg(short, long)]
        task: Option<String>,
    },

    /// Run the timer behind the widget control channel.
    Daemon {
        /// Listen address, overrides STUDY_TIMER_WS_ADDR.
        #[arg(long)]
        addr: Option<String>,
    },

    /// Manage the to-do list.
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Show completed sessions and today's focus time.
    Sessions,

    /// Record and review subject progress.
    Progress {
        #[command(subcommand)]
        action: ProgressAction,
    },

    /// Show or change work/break lengths.
    Settings {
        #[arg(short, long)]
        work: Option<String>,

        #[arg(short, long = "break")]
        brk: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum TaskAction {
    Add {
        #[arg(required = true)]
        title: Vec<String>,
    },
    List,
    Toggle { id: String },
    Remove { id: String },
}

#[derive(Subcommand, Debug)]
enum ProgressAction {
    Add {
        #[arg(long)]
        subject: String,
        #[arg(long, default_value = "")]
        topic: String,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        percentage: i64,
        #[arg(long, default_value = "")]
        notes: String,
        #[arg(long, default_value_t = 3, allow_negative_numbers = true)]
        understanding: i64,
    },
    List,
    Remove { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.data_dir, cli.user).context("Failed to load configuration")?;

    match cli.command {
        Command::Run { work, brk, task } => {
            let mut engine = load_engine(&config, true)?;
            apply_minutes(&mut engine, work.as_deref(), brk.as_deref());
            run_foreground(engine, task).await
        }
        Command::Daemon { addr } => {
            let addr = match addr {
                Some(raw) => config::parse_addr("--addr", &raw)?,
                None => config.ws_addr,
            };
            let engine = load_engine(&config, true)?;
            let progress = load_progress(&config)?;
            run_daemon(engine, progress, owner(&config), addr).await
        }
        Command::Task { action } => Ok(run_task(&config, action)?),
        Command::Sessions => Ok(run_sessions(&config)?),
        Command::Progress { action } => Ok(run_progress(&config, action)?),
        Command::Settings { work, brk } => {
            let mut engine = load_engine(&config, false)?;
            apply_minutes(&mut engine, work.as_deref(), brk.as_deref());
            let settings = engine.settings();
            println!(
                "Pomodoro settings: {}min work / {}min break",
                settings.work_minutes(),
                settings.break_minutes()
            );
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Environment first, then command-line overrides.
fn load_config(data_dir: Option<PathBuf>, user: Option<String>) -> error::Result<Config> {
    let mut config = Config::from_env()?;
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    if let Some(user) = user.filter(|u| !u.trim().is_empty()) {
        config.user = Some(user.trim().to_string());
    }
    Ok(config)
}

fn open_store(config: &Config) -> error::Result<FileStore> {
    Ok(FileStore::open(&config.data_dir)?)
}

/// `alerts` is false for one-shot commands that never complete a phase.
fn load_engine(config: &Config, alerts: bool) -> error::Result<TimerEngine> {
    let store = open_store(config)?;
    let notifier = if alerts {
        DesktopNotifier::new(config.notifications, config.sound)
    } else {
        DesktopNotifier::new(false, false)
    };
    Ok(TimerEngine::load(
        Box::new(store),
        Box::new(notifier),
        StoreKeys::for_user(config.user.as_deref()),
    ))
}

fn load_progress(config: &Config) -> error::Result<ProgressStore> {
    let keys = StoreKeys::for_user(config.user.as_deref());
    Ok(ProgressStore::load(Box::new(open_store(config)?), keys.progress))
}

fn owner(config: &Config) -> &str {
    config.user.as_deref().unwrap_or(LOCAL_USER)
}

fn apply_minutes(engine: &mut TimerEngine, work: Option<&str>, brk: Option<&str>) {
    if let Some(raw) = work {
        engine.set_work_minutes(parse_minutes(raw, WORK_MINUTES_RANGE));
    }
    if let Some(raw) = brk {
        engine.set_break_minutes(parse_minutes(raw, BREAK_MINUTES_RANGE));
    }
}

async fn run_foreground(engine: TimerEngine, task: Option<String>) -> Result<()> {
    let runner = TimerRunner::new(engine);

    if let Some(id) = task {
        let selected = runner.update(|e| {
            e.select_task(Some(id.as_str()));
            e.selected_task().is_some()
        });
        if !selected {
            warn!(task = %id, "unknown task, pomodoros will not be credited");
        }
    }

    let settings = lock_engine(&runner.engine()).settings();
    println!("🍅 study_timer - Pomodoro focus timer");
    println!("======================================");
    println!(
        "Pomodoro settings: {}min work / {}min break",
        settings.work_minutes(),
        settings.break_minutes()
    );
    println!("Press Ctrl+C to stop and see stats\n");

    let mut snapshots = runner.subscribe();
    runner.start();

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            snapshot = snapshots.recv() => match snapshot {
                Ok(snapshot) => render_status(&snapshot),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "status line fell behind");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    runner.shutdown();
    println!();
    print_stats(&lock_engine(&runner.engine()));
    Ok(())
}

fn render_status(snapshot: &TimerSnapshot) {
    let state = if snapshot.running { "running" } else { "paused" };
    let mut stdout = std::io::stdout();
    let _ = write!(
        stdout,
        "\r{} {} {} ({state})   ",
        snapshot.phase.emoji(),
        snapshot.label,
        snapshot.display
    );
    let _ = stdout.flush();
}

fn print_stats(engine: &TimerEngine) {
    println!("\n--- Session Statistics ---");
    println!(
        "Focus time today: {}",
        format_duration(engine.today_focus_seconds())
    );
    println!(
        "Completed pomodoros: {}",
        engine.sessions().completed_work_count()
    );

    let tasks = engine.tasks().as_slice();
    if !tasks.is_empty() {
        println!("\nPomodoros per task:");
        for task in tasks {
            println!("  {} - {}", task.title, task.pomodoro_count);
        }
    }
    println!("------------------------\n");
}

fn format_duration(seconds: u64) -> String {
    format!("{}m {}s", seconds / 60, seconds % 60)
}

async fn run_daemon(
    engine: TimerEngine,
    progress: ProgressStore,
    uid: &str,
    addr: SocketAddr,
) -> Result<()> {
    let runner = Arc::new(TimerRunner::new(engine));
    let state = Arc::new(ControlState::new(
        Arc::clone(&runner),
        FloatingWidget::default(),
        progress,
        uid,
    ));

    let listener = bind_control_server(addr)
        .await
        .with_context(|| format!("Failed to bind control server on {addr}"))?;

    println!("🍅 study_timer - Daemon Mode");
    println!("======================================");
    println!("Widget control channel on ws://{addr}");

    tokio::select! {
        result = serve(listener, state) => {
            if let Err(e) = result {
                error!(error = %e, "control server stopped");
            }
        }
        _ = wait_for_shutdown() => info!("shutdown requested"),
    }

    runner.shutdown();
    Ok(())
}

fn run_task(config: &Config, action: TaskAction) -> error::Result<()> {
    let mut engine = load_engine(config, false)?;
    match action {
        TaskAction::Add { title } => {
            let task = engine.add_task(&title.join(" "))?;
            println!("Added task {} ({})", task.title, task.id);
        }
        TaskAction::List => {
            let tasks = engine.tasks().as_slice();
            if tasks.is_empty() {
                println!("No tasks added yet.");
            }
            for task in tasks {
                let mark = if task.completed { "x" } else { " " };
                println!(
                    "[{mark}] {}  {}  ({} 🍅)",
                    task.id, task.title, task.pomodoro_count
                );
            }
        }
        TaskAction::Toggle { id } => {
            let task = engine.toggle_task(&id)?;
            let status = if task.completed { "done" } else { "open" };
            println!("{} is now {status}", task.title);
        }
        TaskAction::Remove { id } => {
            let task = engine.remove_task(&id)?;
            println!("Removed {}", task.title);
        }
    }
    Ok(())
}

fn run_sessions(config: &Config) -> error::Result<()> {
    let engine = load_engine(config, false)?;
    let sessions = engine.sessions().as_slice();
    if sessions.is_empty() {
        println!("No sessions recorded yet.");
    }
    for session in sessions {
        let task = session
            .task_id
            .as_deref()
            .and_then(|id| engine.tasks().get(id))
            .map(|t| format!("  [{}]", t.title))
            .unwrap_or_default();
        println!(
            "{}  {:<5}  {}{task}",
            session.date,
            session.kind.as_str(),
            format_clock(session.duration)
        );
    }
    println!(
        "\nFocus time today: {}",
        format_duration(engine.today_focus_seconds())
    );
    Ok(())
}

fn run_progress(config: &Config, action: ProgressAction) -> error::Result<()> {
    let uid = owner(config);
    let mut progress = load_progress(config)?;

    match action {
        ProgressAction::Add {
            subject,
            topic,
            percentage,
            notes,
            understanding,
        } => {
            let entry = progress.append(
                uid,
                ProgressInput {
                    subject,
                    topic,
                    percentage,
                    notes,
                    understanding,
                },
            )?;
            println!(
                "Saved {} {}% {} ({})",
                entry.subject,
                entry.percentage,
                entry.understanding_emoji(),
                entry.id
            );
        }
        ProgressAction::List => {
            let entries = progress.list_for(uid);
            if entries.is_empty() {
                println!("No progress entries yet.");
            }
            for entry in entries {
                println!(
                    "{}  {}  {:>3}%  {}  {}",
                    entry.created_at.format("%Y-%m-%d %H:%M"),
                    entry.subject,
                    entry.percentage,
                    entry.understanding_emoji(),
                    entry.topic
                );
                if !entry.notes.is_empty() {
                    println!("    {}", entry.notes);
                }
            }
        }
        ProgressAction::Remove { id } => {
            let entry = progress.delete(uid, &id)?;
            println!("Removed {} entry {}", entry.subject, entry.id);
        }
    }
    Ok(())
}

/// Waits for SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
