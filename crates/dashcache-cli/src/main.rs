//! dashcache - manage dashboard sessions and fetch through the prefetch cache.
//!
//! Holds several logged-in identities at once, switches between them, and
//! resolves API paths through the coalescing TTL cache.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dashcache_core::{
    fetch_fn, Account, ApiClient, Config, FetchCoordinator, HoverScheduler, IdentityClass,
    JsonFileStorage, KeyringStorage, PrefetchRegistry, Query, SessionStorage, SessionStore,
    StorageBackend, Switchboard, TtlCache,
};

#[derive(Parser)]
#[command(
    name = "dashcache",
    version,
    about = "Multi-session dashboard client with a prefetching cache",
    long_about = "Keeps several authenticated identities side by side and fetches\n\
                  dashboard resources through a TTL cache that coalesces concurrent\n\
                  requests.\n\
                  \n\
                  Examples:\n\
                    dashcache login --class admin --email ops@example.com\n\
                    dashcache sessions\n\
                    dashcache switch user:me@example.com\n\
                    dashcache fetch /dashboard --repeat 5\n\
                    dashcache config --write\n\
                  \n\
                  Environment Variables:\n\
                    DASHCACHE_API_URL                # Override the API base URL\n\
                    DASHCACHE_TOKEN                  # Credential for `login` (skips prompt)\n\
                    RUST_LOG                         # Log filter (default: warn)"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: <config_dir>/dashcache/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// API base URL, overriding the config file
    #[arg(long, global = true, env = "DASHCACHE_API_URL")]
    api_url: Option<String>,

    /// Also write logs to daily files in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Add a session for an identity (replaces an existing one)
    Login {
        /// Identity class: admin, user or guest
        #[arg(long, default_value = "user")]
        class: IdentityClass,
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
        /// Bearer credential; prompted for when absent
        #[arg(long, env = "DASHCACHE_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// List sessions, most recently used first
    Sessions {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the active session
    Whoami,
    /// Make another session active
    Switch {
        /// Session key, e.g. admin:ops@example.com
        key: String,
    },
    /// Remove one session
    Logout { key: String },
    /// Remove every session
    LogoutAll,
    /// GET an API path through the prefetch cache
    Fetch {
        path: String,
        /// Issue this many concurrent requests for the same path
        #[arg(long, short = 'n', default_value = "1")]
        repeat: usize,
        /// Warm the cache through the hover scheduler first
        #[arg(long)]
        hover: bool,
    },
    /// Print the effective configuration
    Config {
        /// Also write it back to the config file
        #[arg(long)]
        write: bool,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&PathBuf>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "dashcache.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

/// Loaded configuration plus the overrides given on the command line.
struct AppContext {
    config: Config,
    config_path: PathBuf,
    /// `--config` was given rather than the default location
    explicit_path: bool,
    api_url: Option<String>,
}

impl AppContext {
    fn load(cli: &Cli) -> Result<Self> {
        let (config, config_path) = match &cli.config {
            Some(path) => (Config::load_from(path)?, path.clone()),
            None => (Config::load()?, Config::config_path()?),
        };
        Ok(Self {
            config,
            config_path,
            explicit_path: cli.config.is_some(),
            api_url: cli.api_url.clone(),
        })
    }

    fn storage(&self) -> Result<Arc<dyn SessionStorage>> {
        Ok(match self.config.storage {
            StorageBackend::File => Arc::new(JsonFileStorage::in_dir(&self.config.data_dir()?)),
            StorageBackend::Keyring => Arc::new(KeyringStorage::new()),
        })
    }

    /// A switchboard with persisted sessions restored.
    fn switchboard(&self) -> Result<Switchboard> {
        let storage = self.storage()?;
        info!(storage = %storage.describe(), "Using session storage");
        let board = Switchboard::new(Arc::new(SessionStore::new(storage)));
        board.on_boot(self.config.session_max_idle());
        Ok(board)
    }

    fn api_base_url(&self) -> Result<String> {
        self.api_url
            .clone()
            .or_else(|| self.config.api_base_url.clone())
            .context("No API base URL. Set api_base_url in the config or DASHCACHE_API_URL.")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_ref());
    let ctx = AppContext::load(&cli)?;

    match cli.command {
        Command::Login {
            class,
            email,
            name,
            token,
        } => run_login(&ctx, class, email, name, token),
        Command::Sessions { json } => run_sessions(&ctx, json),
        Command::Whoami => run_whoami(&ctx),
        Command::Switch { key } => run_switch(&ctx, &key),
        Command::Logout { key } => run_logout(&ctx, &key),
        Command::LogoutAll => run_logout_all(&ctx),
        Command::Fetch { path, repeat, hover } => run_fetch(&ctx, path, repeat, hover).await,
        Command::Config { write } => run_config(&ctx, write),
    }
}

fn run_login(
    ctx: &AppContext,
    class: IdentityClass,
    email: String,
    name: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let token = match token {
        Some(token) => token,
        None => rpassword::prompt_password("Credential: ")?,
    };

    let board = ctx.switchboard()?;
    let mut account = Account::with_email(email);
    if let Some(name) = name {
        account.name = name;
    }
    let key = board.store().login(class, account, token)?;

    let active = board.active_key();
    if active.as_ref() == Some(&key) {
        println!("Logged in as {} (active)", key);
    } else {
        println!("Logged in as {}", key);
        println!("Run `dashcache switch {}` to use it", key);
    }
    Ok(())
}

fn run_sessions(ctx: &AppContext, json: bool) -> Result<()> {
    let board = ctx.switchboard()?;
    let active = board.active_key();
    let sessions = board.store().all();

    if json {
        let rows: Vec<serde_json::Value> = sessions
            .iter()
            .map(|s| {
                serde_json::json!({
                    "key": s.key.as_str(),
                    "identity_class": s.identity_class.as_str(),
                    "email": s.account.email,
                    "name": s.display_name(),
                    "active": Some(&s.key) == active.as_ref(),
                    "last_active_at": s.last_active_at,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No sessions. Run `dashcache login` to add one.");
        return Ok(());
    }
    for s in &sessions {
        let marker = if Some(&s.key) == active.as_ref() { "*" } else { " " };
        println!(
            "{} {} {:<8} {:<32} last used {}",
            marker,
            s.badge.icon,
            s.badge.label,
            s.key,
            s.last_active_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
        );
    }
    Ok(())
}

fn run_whoami(ctx: &AppContext) -> Result<()> {
    let board = ctx.switchboard()?;
    match board.active() {
        Some(session) => {
            println!("{} {} ({})", session.badge.icon, session.display_name(), session.key);
            if !session.account.role.is_empty() {
                println!("role: {}", session.account.role);
            }
        }
        None => println!("Not logged in"),
    }
    Ok(())
}

fn run_switch(ctx: &AppContext, key: &str) -> Result<()> {
    let board = ctx.switchboard()?;
    if !board.switch_to(key) {
        bail!("No session named {}. See `dashcache sessions`.", key);
    }
    println!("Switched to {}", key);
    Ok(())
}

fn run_logout(ctx: &AppContext, key: &str) -> Result<()> {
    let board = ctx.switchboard()?;
    if !board.logout(key) {
        bail!("No session named {}", key);
    }
    match board.active_key() {
        Some(next) => println!("Logged out {}, now using {}", key, next),
        None => println!("Logged out {}", key),
    }
    Ok(())
}

fn run_logout_all(ctx: &AppContext) -> Result<()> {
    let board = ctx.switchboard()?;
    let count = board.store().len();
    board.logout_all();
    println!("Logged out {} session(s)", count);
    Ok(())
}

async fn run_fetch(ctx: &AppContext, path: String, repeat: usize, hover: bool) -> Result<()> {
    let board = ctx.switchboard()?;
    if board.active().is_none() {
        bail!("Not logged in. Run `dashcache login` first.");
    }

    let client = ApiClient::new(ctx.api_base_url()?, Arc::new(board))?;
    let coordinator = FetchCoordinator::new(TtlCache::new());
    let registry = PrefetchRegistry::new(coordinator.clone(), ctx.config.prefetch.clone());

    // Count real requests so coalescing is visible
    let requests = Arc::new(AtomicUsize::new(0));
    let loader = client.fetcher(&path);
    let counter = Arc::clone(&requests);
    registry.register(
        path.clone(),
        fetch_fn(move || {
            counter.fetch_add(1, Ordering::Relaxed);
            loader.call()
        }),
    );

    if hover {
        let scheduler = HoverScheduler::new(registry.clone());
        let delay = scheduler.hover_delay();
        eprintln!("Hovering {} for {:?}...", path, delay);
        scheduler.schedule_registered(&path, delay).finished().await;
    }

    let started = Instant::now();
    let results = registry.prefetch_many(std::iter::repeat(path.clone()).take(repeat.max(1))).await;
    let elapsed = started.elapsed();

    let Some(value) = results.into_iter().find_map(|(_, value)| value) else {
        bail!("Fetch of {} failed, see log output", path);
    };

    // A mounted view now renders straight from cache
    let query = Query::mount_registered(&registry, &path)
        .context("Loader disappeared from registry")?;
    let mut updates = query.subscribe();
    let _ = updates.wait_for(|state| state.is_settled()).await;

    println!("{}", serde_json::to_string_pretty(value.as_ref())?);
    eprintln!(
        "{} request(s) resolved with {} network fetch(es) in {:?}",
        repeat.max(1),
        requests.load(Ordering::Relaxed),
        elapsed,
    );
    if let Some(entry) = coordinator.cache().entry(&path) {
        eprintln!("cached {}, fresh for {:?}", entry.age_display(), entry.remaining());
    }
    Ok(())
}

fn run_config(ctx: &AppContext, write: bool) -> Result<()> {
    println!("# {}", ctx.config_path.display());
    let mut effective = ctx.config.clone();
    if ctx.api_url.is_some() {
        effective.api_base_url = ctx.api_url.clone();
    }
    if effective.data_dir.is_none() {
        effective.data_dir = ctx.config.data_dir().ok();
    }
    println!("{}", serde_json::to_string_pretty(&effective)?);

    if write {
        if ctx.explicit_path {
            effective.save_to(&ctx.config_path)?;
        } else {
            effective.save()?;
        }
        eprintln!("Wrote {}", ctx.config_path.display());
    }
    Ok(())
}
