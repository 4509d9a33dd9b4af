mod config;
mod http;
mod providers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use conductor_core::engine::Engine;
use conductor_core::janitor;
use conductor_core::planner::Planner;
use conductor_core::worker::{CodeWorker, Researcher, WorkerSet};
use conductor_store::memory::MemoryStateStore;
use conductor_store::postgres::PgStateStore;
use conductor_store::store::StateStore;

use config::{
    ConductorConfig, ConfigFile, DEFAULT_DATABASE_URL, DatabaseSection, config_path, save_config,
};
use providers::{HttpTextGenerator, PythonCodeRunner};

/// Wall time limit for one sandboxed code execution.
const CODE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Parser)]
#[command(name = "conductor", about = "Multi-agent workflow orchestration service")]
struct Cli {
    /// Database URL (overrides CONDUCTOR_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a conductor config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = DEFAULT_DATABASE_URL)]
        db_url: String,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the conductor database and apply migrations
    DbInit,
    /// Run the HTTP service
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8000)]
        port: u16,
        /// Keep state in memory instead of PostgreSQL (demo mode; state
        /// does not survive a restart)
        #[arg(long)]
        ephemeral: bool,
        /// Disable the background expired-state janitor
        #[arg(long)]
        no_janitor: bool,
    },
    /// Print the status view for a workflow thread
    Status {
        /// Thread id to inspect
        thread_id: String,
    },
    /// Remove workflow states older than the configured max age
    Cleanup {
        /// Override the configured max age, in hours
        #[arg(long)]
        max_age_hours: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => run_init(&db_url, force),
        Commands::DbInit => run_db_init(cli.database_url.as_deref()).await,
        Commands::Serve {
            bind,
            port,
            ephemeral,
            no_janitor,
        } => run_serve(cli.database_url.as_deref(), &bind, port, ephemeral, no_janitor).await,
        Commands::Status { thread_id } => run_status(cli.database_url.as_deref(), &thread_id).await,
        Commands::Cleanup { max_age_hours } => {
            run_cleanup(cli.database_url.as_deref(), max_age_hours).await
        }
    }
}

fn run_init(db_url: &str, force: bool) -> Result<()> {
    let path = config_path();
    if path.exists() && !force {
        bail!(
            "config file already exists at {} (use --force to overwrite)",
            path.display()
        );
    }

    let config = ConfigFile {
        database: DatabaseSection {
            url: db_url.to_owned(),
        },
        provider: Default::default(),
        janitor: Default::default(),
    };
    save_config(&config)?;
    println!("wrote config to {}", path.display());
    Ok(())
}

async fn run_db_init(database_url_flag: Option<&str>) -> Result<()> {
    let cfg = ConductorConfig::resolve(database_url_flag)?;
    PgStateStore::provision(&cfg.database_url).await?;
    println!("database ready at {}", cfg.database_url);
    Ok(())
}

/// Build the store for serve/status/cleanup commands.
async fn open_store(database_url_flag: Option<&str>) -> Result<(Arc<dyn StateStore>, ConductorConfig)> {
    let cfg = ConductorConfig::resolve(database_url_flag)?;
    let store = PgStateStore::connect(&cfg.database_url)
        .await
        .context("database not reachable (run `conductor db-init` first)")?;
    Ok((Arc::new(store), cfg))
}

/// Wire the engine: HTTP model provider and local code runner behind the
/// capability traits.
fn build_engine(store: Arc<dyn StateStore>, cfg: &ConductorConfig) -> Result<Arc<Engine>> {
    let generator = Arc::new(HttpTextGenerator::new(
        cfg.provider.base_url.clone(),
        cfg.provider.model.clone(),
        Duration::from_secs(cfg.provider.timeout_secs),
    )?);
    let code_runner = Arc::new(PythonCodeRunner::new(CODE_TIMEOUT));

    let workers = WorkerSet {
        researcher: Arc::new(Researcher::new(generator.clone())),
        code: Arc::new(CodeWorker::new(generator.clone(), code_runner)),
    };

    Ok(Arc::new(Engine::new(
        store,
        Planner::new(generator),
        workers,
    )))
}

async fn run_serve(
    database_url_flag: Option<&str>,
    bind: &str,
    port: u16,
    ephemeral: bool,
    no_janitor: bool,
) -> Result<()> {
    let (store, cfg): (Arc<dyn StateStore>, ConductorConfig) = if ephemeral {
        tracing::warn!("running with an in-memory store; state will not survive a restart");
        let cfg = ConductorConfig::resolve(database_url_flag)?;
        (Arc::new(MemoryStateStore::new()), cfg)
    } else {
        open_store(database_url_flag).await?
    };

    let engine = build_engine(store.clone(), &cfg)?;

    let cancel = CancellationToken::new();
    let janitor_handle = if no_janitor {
        None
    } else {
        Some(tokio::spawn(janitor::run_janitor(
            store,
            cfg.janitor.clone(),
            cancel.clone(),
        )))
    };

    let result = http::run_serve(engine, bind, port).await;

    cancel.cancel();
    if let Some(handle) = janitor_handle {
        let _ = handle.await;
    }

    result
}

async fn run_status(database_url_flag: Option<&str>, thread_id: &str) -> Result<()> {
    let (store, _cfg) = open_store(database_url_flag).await?;

    let state = store
        .get(thread_id)
        .await
        .context("failed to read workflow state")?
        .with_context(|| format!("workflow {thread_id} not found"))?;

    let view = conductor_core::status::status_view(thread_id, &state);
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

async fn run_cleanup(database_url_flag: Option<&str>, max_age_hours: Option<u64>) -> Result<()> {
    let (store, cfg) = open_store(database_url_flag).await?;

    let max_age = max_age_hours
        .map(|h| Duration::from_secs(h * 3600))
        .unwrap_or(cfg.janitor.max_age);

    let stats = janitor::sweep(store.as_ref(), max_age).await?;
    println!(
        "scanned {} entries, removed {}, {} errors",
        stats.scanned, stats.deleted, stats.errors
    );
    Ok(())
}
