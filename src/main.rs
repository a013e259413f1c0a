// Entry point: the terminal UI by default, scripting subcommands otherwise.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod app;
mod commands;

use app::App;
use app::settings::{self, SettingsStore};
use app::systemd::TokioInvoker;

const LOG_ENV: &str = "SYSTEMD_INDICATOR_LOG";

#[derive(Parser)]
#[command(name = "systemd-indicator")]
#[command(about = "Monitor and toggle a list of systemd services")]
struct Args {
    /// Settings file holding the service list
    #[arg(long, global = true, env = settings::SETTINGS_ENV)]
    settings: Option<PathBuf>,

    /// Seconds between automatic state refreshes (0 disables; overrides the settings file)
    #[arg(long, global = true)]
    refresh: Option<u64>,

    /// Seconds to wait for a single systemctl call
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u64,

    /// Append logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the terminal UI (default)
    Tui,

    /// Print the configured services with their current state
    List {
        /// Print the stored entries in list order with their positions instead
        #[arg(long)]
        raw: bool,
    },

    /// Add a service to the list
    Add {
        /// Unit name (e.g., "nginx" or "nginx.service")
        name: String,
        /// Label shown instead of the unit name
        #[arg(long)]
        display: Option<String>,
        /// The unit belongs to the user service manager
        #[arg(long)]
        user: bool,
        /// Add the unit even if systemctl cannot find it
        #[arg(long)]
        force: bool,
    },

    /// Remove the service at a position of the list (see `list --raw`)
    Remove {
        /// Zero-based position in the settings file
        position: usize,
    },

    /// Start a service
    Start {
        /// Unit name
        name: String,
        #[arg(long)]
        user: bool,
    },

    /// Stop a service
    Stop {
        /// Unit name
        name: String,
        #[arg(long)]
        user: bool,
    },
}

fn init_logging(log_file: Option<&Path>, interactive: bool) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            let _ = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        // The terminal belongs to the UI.
        None if interactive => {
            let _ = builder.with_writer(io::sink).try_init();
        }
        None => {
            let _ = builder.with_writer(io::stderr).try_init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Tui);
    init_logging(args.log_file.as_deref(), matches!(command, Command::Tui))?;

    let path = match args.settings {
        Some(path) => path,
        None => settings::default_path()?,
    };
    let store = SettingsStore::open(path)?;
    let invoker = TokioInvoker::new(Duration::from_secs(args.timeout));

    match command {
        Command::Tui => {
            let refresh = args
                .refresh
                .map(Duration::from_secs)
                .unwrap_or_else(|| store.refresh_interval());
            let app = App::new(invoker, store, refresh);
            let mut terminal = ratatui::init();
            let result = app.run(&mut terminal).await;
            ratatui::restore();
            result
        }
        Command::List { raw: true } => commands::list_raw(&store),
        Command::List { raw: false } => commands::list(invoker, &store).await,
        Command::Add {
            name,
            display,
            user,
            force,
        } => commands::add(invoker, store, &name, display.as_deref(), user, force).await,
        Command::Remove { position } => commands::remove(store, position),
        Command::Start { name, user } => commands::set_active(invoker, &store, &name, user, true).await,
        Command::Stop { name, user } => commands::set_active(invoker, &store, &name, user, false).await,
    }
}
