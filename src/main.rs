use clap::Parser;
use miette::{IntoDiagnostic, Result};
use roadside_dispatch::application::engine::{Collaborators, DispatchEngine, Stores};
use roadside_dispatch::config::{
    DEFAULT_CANDIDATE_LIMIT, DEFAULT_CURRENCY, DEFAULT_MAX_RADIUS_KM, DEFAULT_RADIUS_KM,
    EngineConfig,
};
use roadside_dispatch::infrastructure::gateway::HmacGateway;
use roadside_dispatch::infrastructure::in_memory::InMemoryDirectory;
use roadside_dispatch::interfaces::csv::directory_reader::DirectoryReader;
use roadside_dispatch::interfaces::csv::event_reader::EventReader;
use roadside_dispatch::interfaces::csv::request_writer::RequestWriter;
use roadside_dispatch::interfaces::replay::ScriptRunner;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input events CSV file
    input: PathBuf,

    /// Actors and provider positions CSV file
    #[arg(long)]
    directory: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Shared secret used to sign and verify gateway callbacks
    #[arg(long, env = "GATEWAY_SECRET", default_value = "local-gateway-secret")]
    gateway_secret: String,

    /// Broadcast radius for requests that do not name one
    #[arg(long, default_value_t = DEFAULT_RADIUS_KM)]
    radius_km: f64,

    /// Largest broadcast radius a request may ask for
    #[arg(long, default_value_t = DEFAULT_MAX_RADIUS_KM)]
    max_radius_km: f64,

    /// Maximum providers offered a single broadcast
    #[arg(long, default_value_t = DEFAULT_CANDIDATE_LIMIT)]
    candidate_limit: usize,

    /// Settlement currency
    #[arg(long, default_value = DEFAULT_CURRENCY)]
    currency: String,
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    use roadside_dispatch::infrastructure::rocksdb::RocksDBStore;

    let Some(db_path) = db_path else {
        return Ok(Stores::in_memory());
    };
    let store = RocksDBStore::open(db_path).into_diagnostic()?;
    Ok(Stores {
        requests: Arc::new(store.clone()),
        conversations: Arc::new(store.clone()),
        payments: Arc::new(store.clone()),
        reviews: Arc::new(store),
    })
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    match db_path {
        None => Ok(Stores::in_memory()),
        Some(path) => Err(miette::miette!(
            "--db-path {} requires a build with the storage-rocksdb feature",
            path.display()
        )),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roadside_dispatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    let config = EngineConfig::new(
        cli.radius_km,
        cli.max_radius_km,
        cli.candidate_limit,
        cli.currency,
    )
    .into_diagnostic()?;

    let directory = Arc::new(InMemoryDirectory::new());
    let actors = File::open(&cli.directory).into_diagnostic()?;
    let loaded = DirectoryReader::new(actors).load_into(&directory).await;
    tracing::info!(loaded, "Directory loaded");

    let gateway = HmacGateway::new(cli.gateway_secret.as_bytes()).into_diagnostic()?;
    let engine = DispatchEngine::new(
        config,
        open_stores(cli.db_path)?,
        Collaborators {
            identity: directory.clone(),
            providers: directory,
            gateway: Arc::new(gateway.clone()),
        },
    )
    .into_diagnostic()?;

    // Replay events
    let mut runner = ScriptRunner::new(engine, gateway);
    let file = File::open(cli.input).into_diagnostic()?;
    for event in EventReader::new(file).events() {
        match event {
            // Failures are logged by the runner; keep going.
            Ok(event) => {
                let _ = runner.apply(&event).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Error reading event");
            }
        }
    }

    // Output final state
    let rows = runner.rows().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = RequestWriter::new(stdout.lock());
    writer.write_rows(rows).into_diagnostic()?;

    Ok(())
}
