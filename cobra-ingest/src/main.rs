//! Video ingest service (cobra-ingest) - Main entry point
//!
//! Watches channel feeds, enriches new videos (transcript, summary, embedding),
//! keeps the vector index in step with the store and serves retrieval over HTTP.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cobra_common::config::{
    load_toml_config, locate_config_file, resolve_database_path, resolve_root_folder,
};
use cobra_common::db::init::init_database;
use cobra_common::events::EventBus;
use cobra_ingest::clients::{
    http_client, DiscordWebhookSink, FeedSource, LanguageModel, LogSink, NotificationSink,
    OpenAiClient, TimedTextClient, TranscriptSource, YoutubeDataApiClient, YoutubeFeedClient,
};
use cobra_ingest::config::{
    resolve_secret, IngestConfig, DISCORD_WEBHOOK_ENV_VAR, OPENAI_API_KEY_ENV_VAR,
    YOUTUBE_API_KEY_ENV_VAR,
};
use cobra_ingest::db::embeddings::count_embeddings;
use cobra_ingest::index::VectorIndex;
use cobra_ingest::notifier::Notifier;
use cobra_ingest::pipeline::{run_workers, work_queue, Pipeline, PipelineSettings, WorkReceiver};
use cobra_ingest::retrieval::Retrieval;
use cobra_ingest::watcher::FeedWatcher;
use cobra_ingest::{build_router, AppState};

/// Command-line arguments for cobra-ingest
#[derive(Parser, Debug)]
#[command(name = "cobra-ingest")]
#[command(about = "Video feed ingestion, enrichment and retrieval service")]
#[command(version)]
struct Args {
    /// Path to cobra.toml (overrides COBRA_CONFIG and the default locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root folder for the database and transcript archive
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Watch feeds, enrich videos and serve the API until interrupted (default)
    Run,
    /// Poll every channel once, enrich what was found, exit
    PollOnce,
    /// Enrich every video that is not fully enriched yet, exit
    Reprocess,
    /// Discover a channel's past uploads through the YouTube Data API
    Backfill {
        /// Channel youtube id (must be configured)
        #[arg(long)]
        channel: String,
        /// Number of most recent uploads to list
        #[arg(long, default_value_t = 50)]
        count: usize,
    },
    /// Ask the running service to rebuild its vector index from the store
    RebuildIndex,
    /// Load an index from the store in this process and report rows that
    /// would be skipped; the running service is not touched
    CheckIndex,
    /// Re-extract topics for every transcribed video, consolidating the
    /// topic vocabulary; summaries and quotes are kept
    RegenerateTopics,
    /// Create or upgrade the database schema, exit
    InitDb,
}

/// Everything the pipeline and watcher talk to
struct Collaborators {
    feed: Arc<dyn FeedSource>,
    transcripts: Arc<dyn TranscriptSource>,
    model: Arc<dyn LanguageModel>,
    notifier: Arc<Notifier>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path =
        locate_config_file(args.config.as_deref()).context("Failed to locate config file")?;
    let config: IngestConfig =
        load_toml_config(config_path.as_deref()).context("Failed to load config")?;

    // RUST_LOG overrides the configured level
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.base.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting cobra-ingest v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE"),
    );
    match &config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("No config file found, using built-in defaults"),
    }

    config.validate().context("Invalid configuration")?;

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), config.base.root_folder.as_deref());
    let db_path = resolve_database_path(&root_folder, config.base.database_path.as_deref());
    info!("Root folder: {}", root_folder.display());
    info!("Database: {}", db_path.display());

    let command = args.command.unwrap_or(Command::Run);
    if let Command::RebuildIndex = command {
        return request_index_rebuild(&config).await;
    }

    let db = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    if let Command::InitDb = command {
        info!("Database schema is up to date");
        return Ok(());
    }

    let index = Arc::new(
        VectorIndex::load(&db)
            .await
            .context("Failed to load vector index")?,
    );
    if let Command::CheckIndex = command {
        let stored = count_embeddings(&db).await.context("Failed to count embeddings")?;
        let stats = index.stats().await;
        println!(
            "Index: {} of {} stored embeddings loaded (dimension {})",
            stats.vectors,
            stored,
            stats
                .dimension
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        db.close().await;
        return Ok(());
    }

    let collaborators = build_collaborators(&config)?;
    let event_bus = EventBus::new(1000);

    let mut settings = PipelineSettings::from_config(&config);
    settings.archive_dir = settings
        .archive_dir
        .map(|dir| resolve_relative(&root_folder, &dir));

    let pipeline = Arc::new(Pipeline::new(
        db.clone(),
        Arc::clone(&collaborators.transcripts),
        Arc::clone(&collaborators.model),
        Arc::clone(&index),
        Arc::clone(&collaborators.notifier),
        event_bus.clone(),
        settings,
    ));

    let (queue, receiver) = work_queue(config.pipeline.queue_capacity);
    let watcher = Arc::new(
        FeedWatcher::new(
            db.clone(),
            Arc::clone(&collaborators.feed),
            queue,
            event_bus.clone(),
            &config,
        )
        .await
        .context("Failed to register channels")?,
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    match command {
        Command::Run => {
            let retrieval = Arc::new(Retrieval::new(
                db.clone(),
                Arc::clone(&index),
                Arc::clone(&collaborators.model),
                config.pipeline.call_timeout(),
            ));
            let state = AppState::new(db.clone(), event_bus.clone(), index, retrieval);
            run_service(&config, state, watcher, receiver, pipeline, shutdown).await?;
        }
        Command::PollOnce => {
            let workers = spawn_workers(&config, receiver, pipeline, &shutdown);
            let report = watcher.poll_once(&shutdown).await;
            info!(
                channels = report.channels_polled,
                failed = report.channels_failed,
                new_videos = report.new_videos.len(),
                "Poll finished, draining queue"
            );
            drop(watcher);
            finish_workers(workers).await?;
        }
        Command::Reprocess => {
            let workers = spawn_workers(&config, receiver, pipeline, &shutdown);
            let queued = watcher.resume_sweep().await.context("Resume sweep failed")?;
            info!(queued, "Reprocessing unfinished videos");
            drop(watcher);
            finish_workers(workers).await?;
        }
        Command::Backfill { channel, count } => {
            let Some(api_key) = resolve_secret(
                "YouTube API key",
                YOUTUBE_API_KEY_ENV_VAR,
                config.youtube.api_key.as_deref(),
            ) else {
                bail!(
                    "Backfill needs a YouTube Data API key ({} or [youtube] api_key)",
                    YOUTUBE_API_KEY_ENV_VAR
                );
            };
            let client = http_client(config.watcher.fetch_timeout())
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            let history = YoutubeDataApiClient::new(client, config.youtube.api_base_url.clone(), api_key);

            let workers = spawn_workers(&config, receiver, pipeline, &shutdown);
            let result = watcher.backfill(&history, &channel, count, &shutdown).await;
            drop(watcher);
            let report = result.context("Backfill failed")?;
            info!(
                channel = %channel,
                new_videos = report.new_videos.len(),
                "Backfill discovery finished, draining queue"
            );
            finish_workers(workers).await?;
        }
        Command::RegenerateTopics => {
            let report = pipeline
                .regenerate_topics(&shutdown)
                .await
                .context("Topic regeneration failed")?;
            println!(
                "Topics regenerated for {} of {} videos ({} failed, {} unused topics removed)",
                report.regenerated, report.videos, report.failed, report.pruned_topics
            );
        }
        Command::RebuildIndex | Command::CheckIndex | Command::InitDb => {}
    }

    db.close().await;
    info!("cobra-ingest stopped");
    Ok(())
}

/// `POST /index/rebuild` against the service configured in `[api]`
async fn request_index_rebuild(config: &IngestConfig) -> Result<()> {
    let url = format!("{}/index/rebuild", config.api.local_base_url()?);
    let client = http_client(config.pipeline.call_timeout()).map_err(|e| anyhow::anyhow!("{}", e))?;

    info!("Requesting index rebuild from {}", url);
    let response = client
        .post(&url)
        .send()
        .await
        .with_context(|| format!("cobra-ingest service not reachable at {}", url))?;

    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .context("Malformed rebuild response")?;
    if !status.is_success() {
        bail!("Index rebuild refused ({}): {}", status, body);
    }
    println!("Index rebuilt: {}", body);
    Ok(())
}

/// Long-running mode: watcher, worker pool and HTTP API until shutdown
async fn run_service(
    config: &IngestConfig,
    state: AppState,
    watcher: Arc<FeedWatcher>,
    receiver: WorkReceiver,
    pipeline: Arc<Pipeline>,
    shutdown: CancellationToken,
) -> Result<()> {
    let workers = spawn_workers(config, receiver, pipeline, &shutdown);

    let watcher_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { watcher.run(shutdown).await })
    };

    if config.api.enabled {
        let listener = tokio::net::TcpListener::bind(&config.api.bind_address)
            .await
            .with_context(|| format!("Failed to bind to {}", config.api.bind_address))?;
        info!("Starting HTTP server on {}", config.api.bind_address);

        let app = build_router(state);
        let server_shutdown = shutdown.clone();
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
        {
            error!(error = %e, "HTTP server error");
            shutdown.cancel();
        }
    } else {
        info!("HTTP API disabled");
        shutdown.cancelled().await;
    }

    if let Err(e) = watcher_task.await {
        warn!(error = %e, "Feed watcher task ended abnormally");
    }
    finish_workers(workers).await
}

fn spawn_workers(
    config: &IngestConfig,
    receiver: WorkReceiver,
    pipeline: Arc<Pipeline>,
    shutdown: &CancellationToken,
) -> JoinHandle<cobra_ingest::pipeline::WorkerReport> {
    tokio::spawn(run_workers(
        receiver,
        pipeline,
        config.pipeline.workers,
        shutdown.clone(),
        config.pipeline.shutdown_grace(),
    ))
}

async fn finish_workers(
    workers: JoinHandle<cobra_ingest::pipeline::WorkerReport>,
) -> Result<()> {
    let report = workers.await.context("Worker pool task failed")?;
    info!(
        processed = report.processed,
        enriched = report.enriched,
        notified = report.notified,
        stalled = report.stalled,
        aborted = report.aborted,
        "Enrichment summary"
    );
    Ok(())
}

fn build_collaborators(config: &IngestConfig) -> Result<Collaborators> {
    let fetch_client =
        http_client(config.watcher.fetch_timeout()).map_err(|e| anyhow::anyhow!("{}", e))?;
    let model_client =
        http_client(config.pipeline.call_timeout()).map_err(|e| anyhow::anyhow!("{}", e))?;

    let Some(openai_key) = resolve_secret(
        "OpenAI API key",
        OPENAI_API_KEY_ENV_VAR,
        config.openai.api_key.as_deref(),
    ) else {
        bail!(
            "No OpenAI API key configured (set {} or [openai] api_key)",
            OPENAI_API_KEY_ENV_VAR
        );
    };

    let sink: Arc<dyn NotificationSink> = match resolve_secret(
        "Discord webhook",
        DISCORD_WEBHOOK_ENV_VAR,
        config.notify.discord_webhook_url.as_deref(),
    ) {
        Some(url) => Arc::new(DiscordWebhookSink::new(fetch_client.clone(), url)),
        None => {
            warn!("No Discord webhook configured, notifications go to the log");
            Arc::new(LogSink)
        }
    };

    Ok(Collaborators {
        feed: Arc::new(YoutubeFeedClient::new(
            fetch_client.clone(),
            config.watcher.feed_base_url.clone(),
        )),
        transcripts: Arc::new(TimedTextClient::new(
            fetch_client.clone(),
            config.transcript.base_url.clone(),
            config.transcript.language.clone(),
        )),
        model: Arc::new(OpenAiClient::new(model_client, openai_key, &config.openai)),
        notifier: Arc::new(Notifier::new(
            sink,
            config.notify.mention_everyone,
            config.pipeline.call_timeout(),
        )),
    })
}

fn resolve_relative(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
