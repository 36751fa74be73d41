use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use refgraph::api::HttpServer;
use refgraph::client::AnalyzerClient;
use refgraph::db::{migrate, Db};
use refgraph::graph::{import_manifest, AssetIndexManifest, SqliteAssetIndex};
use refgraph::jobs::{HomeContext, JobScheduler, JobStore};
use refgraph::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "refgraph")]
#[command(about = "Reference-chain analysis over an asset index", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server
    Serve,

    /// Load an asset manifest (JSON) into the index
    Import {
        manifest: PathBuf,
    },

    /// Ask a running server for a reference chain and print it
    Chain {
        start: String,

        /// dependencies, referencers or both
        #[arg(short, long)]
        direction: Option<String>,

        #[arg(long)]
        depth: Option<i64>,

        /// Always go through a job, even for small trees
        #[arg(long = "async")]
        force_async: bool,

        /// Server base URL (defaults to client.base_url)
        #[arg(long)]
        server: Option<String>,
    },

    /// Verify the index schema
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    // RUST_LOG wins over refgraph.log_level
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", config.refgraph.log_level.as_str())
    ).init();

    match cli.command.unwrap_or(Command::Verify) {
        Command::Serve => run_server(config).await,
        Command::Import { manifest } => run_import(config, manifest).await,
        Command::Chain { start, direction, depth, force_async, server } => {
            run_chain(config, start, direction, depth, force_async, server).await
        }
        Command::Verify => run_schema_verification(config).await,
    }
}

async fn open_index_db(config: &Config) -> Result<Db> {
    let db = Db::new(config.db_path());
    let migrations_dir = config.index.migrations_dir.clone();
    db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
        .await?;
    log::info!("Asset index ready at {}", config.db_path().display());
    Ok(db)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown requested");
}

/// Run the HTTP server until ctrl-c
async fn run_server(config: Config) -> Result<()> {
    log::info!("Starting refgraph v{}", env!("CARGO_PKG_VERSION"));

    let db = open_index_db(&config).await?;
    let home = HomeContext::spawn("refgraph-home", move || SqliteAssetIndex::open(&db))?;

    let store = JobStore::new(config.retention());
    let (scheduler, pool) =
        JobScheduler::start(store, home.handle(), config.jobs.dispatch_workers);
    log::info!(
        "{} dispatch worker(s), jobs retained for {}s",
        config.jobs.dispatch_workers,
        config.jobs.retention_secs
    );

    let server = HttpServer::new(scheduler, &config);
    let served = server
        .run(&config.http_server.host, config.http_server.port, shutdown_signal())
        .await;

    pool.shutdown_and_join().await;
    tokio::task::spawn_blocking(move || home.shutdown()).await?;
    served?;
    Ok(())
}

async fn run_import(config: Config, manifest_path: PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("Failed to read manifest {}", manifest_path.display()))?;
    let manifest: AssetIndexManifest = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse manifest {}", manifest_path.display()))?;

    let db = open_index_db(&config).await?;
    let stats = db
        .with_connection(move |conn| import_manifest(conn, &manifest))
        .await?;
    println!("Imported {} assets ({} new edges)", stats.assets, stats.new_edges);
    Ok(())
}

async fn run_chain(
    config: Config,
    start: String,
    direction: Option<String>,
    depth: Option<i64>,
    force_async: bool,
    server: Option<String>,
) -> Result<()> {
    let mut client_config = config.client.clone();
    if let Some(server) = server {
        client_config.base_url = server;
    }
    let client = AnalyzerClient::from_config(&client_config)?;

    let mut params = vec![("start", start)];
    if let Some(direction) = direction {
        params.push(("direction", direction));
    }
    if let Some(depth) = depth {
        params.push(("depth", depth.to_string()));
    }

    let path = if force_async {
        "/analysis/reference-chain/async"
    } else {
        "/analysis/reference-chain"
    };
    let report = client.get_with_async(path, &params).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Run migrations and check that the index schema is complete
async fn run_schema_verification(config: Config) -> Result<()> {
    log::info!("Starting refgraph v{}", env!("CARGO_PKG_VERSION"));
    let db = open_index_db(&config).await?;

    let (missing, applied, assets, edges) = db
        .with_connection(|conn| {
            let missing = migrate::missing_tables(conn)?;
            let applied = migrate::get_applied_migrations(conn)?;
            if !missing.is_empty() {
                return Ok((missing, applied, 0, 0));
            }
            let assets: i64 = conn.query_row("SELECT COUNT(*) FROM assets", [], |row| row.get(0))?;
            let edges: i64 =
                conn.query_row("SELECT COUNT(*) FROM asset_dependencies", [], |row| row.get(0))?;
            Ok((missing, applied, assets, edges))
        })
        .await?;

    if !missing.is_empty() {
        anyhow::bail!("Missing tables: {}", missing.join(", "));
    }
    log::info!("✓ {} migrations applied", applied.len());
    log::info!("✓ {} assets, {} dependency edges", assets, edges);
    println!("Schema OK");
    Ok(())
}
