use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use replicore::config::Config;
use replicore::election::NodeBuilder;
use replicore::error::{Error, ReplicoreErrorTrait};
use replicore::healthcheck::{HealthCheckJob, LoggingResultStore, ReqwestChecker, StaticTargets};
use replicore::metrics;
use replicore::queue::{HostingRecord, QueueIngestion, QueueProducer, TracingSink};
use replicore::scheduler::{JobOptions, Schedule, Scheduler, TaskDefinition};
use replicore::status::{self, StatusState};
use replicore::store::{RedisStore, SharedStore};

#[derive(Parser)]
#[command(
    name = "replicore",
    version,
    about = "Leader election and leader-aware job scheduling over Redis",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML). Environment variables are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json). Overrides logging.format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the election and run scheduled jobs until Ctrl-C
    Run,

    /// Push hosting records from a JSON Lines file onto the queue
    Enqueue {
        /// File with one encoded record per line
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Load and validate the configuration, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Run => run(config).await?,
        Commands::Enqueue { file } => {
            tracing::info!(file = %file.display(), "Starting enqueue command");
            enqueue(config, &file).await?;
        }
        Commands::CheckConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
            tracing::info!("Configuration is valid");
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("replicore=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("replicore={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

async fn connect(config: &Config) -> Result<SharedStore> {
    let store = RedisStore::connect(&config.redis_config())
        .await
        .context("Failed to connect to Redis")?;
    Ok(Arc::new(store))
}

async fn run(config: Config) -> Result<()> {
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    let store = connect(&config).await?;
    let sink = Arc::new(TracingSink);

    let ingestion = Arc::new(QueueIngestion::new(
        Arc::clone(&store),
        config.queue_config(),
        sink.clone(),
        sink.clone(),
        sink,
    ));

    let health_check = Arc::new(HealthCheckJob::new(
        Arc::new(StaticTargets(config.health_check.targets.clone())),
        Arc::new(ReqwestChecker::new(config.health_check_config().request_timeout)?),
        Arc::new(LoggingResultStore),
        config.health_check_config(),
    ));

    let scheduler = Arc::new(
        Scheduler::builder()
            .replica(
                TaskDefinition::new(ingestion, Schedule::Every(config.ingest_interval()))
                    .with_options(JobOptions::default().with_error_backoff(config.ingest_interval())),
            )
            .master(
                TaskDefinition::new(health_check, Schedule::Every(config.health_check_tick()))
                    .with_options(JobOptions::immediately().with_timeout(config.health_check_tick())),
            )
            .build(),
    );

    let node = Arc::new(
        scheduler
            .attach(NodeBuilder::new(Arc::clone(&store), config.election_config()))
            .build()?,
    );

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let status_task = if config.status.enabled {
        let addr = config
            .status
            .bind
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("Invalid status.bind address: {}", config.status.bind))?;
        let state = StatusState::new(Arc::clone(&node), Arc::clone(&scheduler));
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = status::serve(addr, state, shutdown).await {
                tracing::error!(error = %e, "Status server failed");
            }
        }))
    } else {
        None
    };

    tracing::info!(node_id = %node.id(), key = %config.election.key, "Starting node");
    node.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!(node_id = %node.id(), "Shutdown requested");

    if let Err(e) = node.stop().await {
        let err = Error::from(e);
        tracing::error!(category = %err.category(), error = %err, "Node did not stop cleanly");
    }
    scheduler.stop_all();

    shutdown_tx.send_replace(true);
    if let Some(task) = status_task {
        let _ = task.await;
    }

    tracing::info!("replicore stopped");
    Ok(())
}

async fn enqueue(config: Config, file: &Path) -> Result<()> {
    let store = connect(&config).await?;
    let producer = QueueProducer::new(store, config.queue.list_key.clone(), config.buffer_config())?;

    let handle = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;
    let mut lines = tokio::io::BufReader::new(handle).lines();

    let mut count = 0usize;
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let record = HostingRecord::decode(&line)
            .with_context(|| format!("Invalid record on line {line_no}"))?;
        producer.enqueue(&record).await?;
        count += 1;
    }

    producer.close().await?;
    tracing::info!(count, key = %config.queue.list_key, "Records enqueued");
    println!("Enqueued {count} records onto {}", config.queue.list_key);
    Ok(())
}
