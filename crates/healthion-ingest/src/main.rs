//! Healthion Ingest - queue-driven health export ingestion

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use healthion_common::logging::{init_logging, LogConfig, LogLevel};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use healthion_ingest::{
    config::Config,
    db,
    ingest::{
        import_file, Archiver, CountingImportStore, FileNotification, IdempotencyKey, ImportClaim,
        IngestionOrchestrator, ParserConfig, PgDumpTool, PgImportStore,
        PollScheduler, PresignedUploadRequest, QueueConsumer, TaskDispatcher, TaskResult,
        WorkerPool,
    },
    queue::SqsQueue,
    storage::{ObjectStore, Storage},
};

#[derive(Parser, Debug)]
#[command(name = "healthion-ingest")]
#[command(author, version, about = "Health export ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the queue until interrupted
    Consume,

    /// Poll the queue once and wait for the dispatched runs
    PollOnce,

    /// Poll the queue repeatedly for a fixed window
    PollWindow {
        /// Length of the window in seconds
        #[arg(short, long)]
        seconds: u64,
    },

    /// Ingest one object directly, bypassing the queue
    Process {
        #[arg(short, long)]
        bucket: String,

        #[arg(short, long)]
        key: String,

        /// User id; defaults to the first path segment of the key
        #[arg(short, long)]
        user_id: Option<String>,
    },

    /// Create a presigned upload URL for a new export
    Presign {
        #[arg(short, long)]
        user_id: String,

        #[arg(short, long)]
        filename: Option<String>,

        /// Content type of the export
        #[arg(long, default_value = "application/xml")]
        file_type: String,

        /// Maximum upload size in bytes
        #[arg(long, default_value_t = healthion_ingest::ingest::uploads::DEFAULT_MAX_FILE_SIZE)]
        max_file_size: u64,

        /// URL lifetime in seconds
        #[arg(short, long, default_value_t = healthion_ingest::ingest::uploads::DEFAULT_EXPIRATION_SECS)]
        expiration: u64,

        /// Poll the queue while the URL is valid
        #[arg(short, long)]
        watch: bool,
    },

    /// Parse and classify a local export without touching the database
    Inspect {
        #[arg(short, long)]
        file: PathBuf,

        /// Rows per chunk
        #[arg(short, long)]
        chunk_size: Option<usize>,
    },

    /// Apply database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("healthion-ingest")
        .filter_directives("aws_smithy_runtime=warn,aws_config=warn,sqlx=warn")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    init_logging(&log_config)?;

    let config = Config::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Consume => {
            let cancel = CancellationToken::new();
            tokio::spawn(cancel_on_shutdown_signal(cancel.clone()));
            poll_window(&config, None, cancel).await?;
        },
        Command::PollOnce => poll_once(&config).await?,
        Command::PollWindow { seconds } => {
            let cancel = CancellationToken::new();
            tokio::spawn(cancel_on_shutdown_signal(cancel.clone()));
            poll_window(&config, Some(Duration::from_secs(seconds)), cancel).await?;
        },
        Command::Process {
            bucket,
            key,
            user_id,
        } => {
            let orchestrator = build_orchestrator(&config).await?;
            let mut notification = FileNotification::new(bucket, key);
            notification.user_id = user_id;

            let result = orchestrator.run(&notification).await;
            print_json(&result)?;
            if !result.is_success() {
                anyhow::bail!(result.error.unwrap_or_else(|| "ingestion failed".to_string()));
            }
        },
        Command::Presign {
            user_id,
            filename,
            file_type,
            max_file_size,
            expiration,
            watch,
        } => {
            let storage = Storage::new(config.storage.clone()).await;
            let request = PresignedUploadRequest {
                user_id,
                filename,
                file_type: file_type.parse()?,
                max_file_size,
                expiration_seconds: expiration,
            };

            let upload = storage.presign_upload(&request).await?;
            print_json(&upload)?;

            if watch {
                let cancel = CancellationToken::new();
                tokio::spawn(cancel_on_shutdown_signal(cancel.clone()));
                poll_window(&config, Some(Duration::from_secs(expiration)), cancel).await?;
            }
        },
        Command::Inspect { file, chunk_size } => {
            let mut parser_config = ParserConfig::from(&config.ingest);
            if let Some(chunk_size) = chunk_size {
                parser_config = parser_config.with_chunk_size(chunk_size);
            }

            let store = CountingImportStore::new();
            let claim = ImportClaim {
                key: IdempotencyKey::new("local", &file.display().to_string(), "inspect"),
                bucket: "local".to_string(),
                object_key: file.display().to_string(),
                user_id: Uuid::nil(),
            };

            let outcome = import_file(&store, &parser_config, &file, &claim).await?;
            print_json(&outcome.stats())?;
        },
        Command::Migrate => {
            let pool = db::create_pool(&config.database).await?;
            db::run_migrations(&pool).await?;
        },
    }

    Ok(())
}

async fn build_orchestrator(config: &Config) -> Result<Arc<IngestionOrchestrator>> {
    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;

    let storage: Arc<dyn ObjectStore> = Arc::new(Storage::new(config.storage.clone()).await);
    let dump_tool = PgDumpTool::new(&config.ingest.dump_program, &config.database.url)
        .with_timeout(config.ingest.dump_timeout());
    let archiver = Archiver::new(storage.clone(), Arc::new(dump_tool));

    Ok(Arc::new(IngestionOrchestrator::new(
        storage,
        Arc::new(PgImportStore::new(pool)),
        archiver,
        &config.ingest,
    )))
}

async fn build_consumer(config: &Config, dispatcher: Arc<dyn TaskDispatcher>) -> Result<QueueConsumer> {
    let queue_url = config.queue.require_queue_url()?;
    let queue = SqsQueue::new(
        &config.storage.aws_settings(),
        config.queue.endpoint.as_deref(),
        queue_url,
    )
    .await;

    info!(queue_url, "Queue consumer ready");
    Ok(QueueConsumer::new(Arc::new(queue), dispatcher, &config.queue))
}

async fn start_pool(config: &Config) -> Result<(Arc<WorkerPool>, JoinHandle<usize>)> {
    let orchestrator = build_orchestrator(config).await?;
    let (pool, results) = WorkerPool::spawn(
        orchestrator,
        config.ingest.workers,
        config.ingest.queue_capacity,
    );
    Ok((Arc::new(pool), tokio::spawn(print_results(results))))
}

async fn poll_once(config: &Config) -> Result<()> {
    let (pool, printer) = start_pool(config).await?;
    let consumer = build_consumer(config, pool.clone()).await?;

    let summary = consumer.poll_once().await;

    pool.shutdown().await;
    printer.await?;

    print_json(&summary?)?;
    Ok(())
}

async fn poll_window(
    config: &Config,
    budget: Option<Duration>,
    cancel: CancellationToken,
) -> Result<()> {
    let (pool, printer) = start_pool(config).await?;
    let consumer = build_consumer(config, pool.clone()).await?;

    let scheduler = PollScheduler::new(Duration::from_secs(config.queue.poll_interval_secs));
    let summary = scheduler.run(&consumer, budget, cancel).await;

    info!("Waiting for in-flight runs");
    pool.shutdown().await;
    let completed = printer.await?;

    info!(completed, "All runs finished");
    print_json(&summary)?;
    Ok(())
}

/// Print each finished run as one JSON line
async fn print_results(mut results: mpsc::UnboundedReceiver<TaskResult>) -> usize {
    let mut count = 0;
    while let Some(result) = results.recv().await {
        match serde_json::to_string(&result) {
            Ok(line) => println!("{}", line),
            Err(e) => error!(error = %e, "Failed to serialize task result"),
        }
        count += 1;
    }
    count
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cancel the token on Ctrl+C or SIGTERM
async fn cancel_on_shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping polling");
    cancel.cancel();
}
