mod metrics;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harvester_core::{
    create_adapter, describe_collection, load_config, plan_gap_fill, validate_config,
    CollectionDescriptor, Config, FsSink, HttpSourceResolver, IngestConfig,
    IngestionOrchestrator, LogFormat, RequestThrottle, RunHandle, RunPhase, RunReport,
    SanitizedConfig,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => {
            if code != 0 {
                std::process::exit(code);
            }
        }
        Err(e) => {
            // Logging may not be initialized yet if the config failed to load.
            eprintln!("Fatal error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// 0 completed, 130 cancelled, 2 failed.
fn exit_code(report: &RunReport) -> i32 {
    if report.is_success() {
        0
    } else if report.state == RunPhase::Cancelled {
        130
    } else {
        2
    }
}

async fn run() -> Result<i32> {
    // Determine config path
    let config_path = std::env::var("HARVESTER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("harvester.toml"));

    // Load before logging is set up: the config picks the log format.
    let mut config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    init_logging(config.log_format);
    info!(version = VERSION, "Loaded configuration from {:?}", config_path);

    // One throttle for discovery, provider pages and source fetches alike.
    let throttle = RequestThrottle::new(&config.throttle);

    if config.ingest.discover {
        let info = describe_collection(&config.collection, &config.alchemy, throttle.clone())
            .await
            .context("Collection discovery failed")?;
        info.apply(&mut config.collection);
    }
    validate_config(&config).context("Configuration validation failed")?;

    // Compute config hash for the run log
    let sanitized = SanitizedConfig::from(&config);
    let config_json = serde_json::to_string(&sanitized).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        config_hash = &config_hash[..16],
        collection = %config.collection.name,
        chain = %config.collection.chain,
        provider = %config.collection.provider,
        output = ?config.output.root,
        "Configuration validated"
    );

    let sink = Arc::new(FsSink::new(&config.output.root, &config.collection.name));
    info!("Writing to {:?}", sink.collection_dir());

    // Gap filling runs over the missing ids only and leaves the main run's
    // progress file alone.
    let (descriptor, ingest) = if config.ingest.fill_gaps {
        let narrowed = plan_gap_fill(&config.collection, &sink)
            .await
            .context("Failed to scan output for missing tokens")?;
        match narrowed {
            Some(descriptor) => (
                descriptor,
                config
                    .ingest
                    .clone()
                    .with_resume(false)
                    .with_persist_progress(false),
            ),
            None => {
                info!("No missing tokens, nothing to fetch");
                return Ok(0);
            }
        }
    } else {
        (config.collection.clone(), config.ingest.clone())
    };

    let orchestrator = build_orchestrator(&config, &descriptor, ingest, throttle, sink)?;

    // Ctrl-C stops paging; records in flight still finish.
    let handle = RunHandle::new();
    let cancel_handle = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown requested, finishing in-flight records");
        cancel_handle.cancel();
    });

    let mut progress = handle.subscribe();
    let progress_task = tokio::spawn(async move {
        let mut last_pages = 0;
        while progress.changed().await.is_ok() {
            let snapshot = progress.borrow_and_update().clone();
            if snapshot.pages != last_pages {
                last_pages = snapshot.pages;
                info!(
                    pages = snapshot.pages,
                    processed = snapshot.records_processed,
                    media_failures = snapshot.media_failures,
                    metadata_failures = snapshot.metadata_failures,
                    "Progress"
                );
            }
            if snapshot.phase.is_terminal() {
                break;
            }
        }
    });

    let report = orchestrator.run(&descriptor, &handle).await;
    let _ = progress_task.await;

    let report_json =
        serde_json::to_string_pretty(&report).context("Failed to serialize run report")?;
    println!("{}", report_json);

    if let Some(path) = &config.metrics.textfile {
        match metrics::write_textfile(path) {
            Ok(()) => info!("Metrics written to {:?}", path),
            Err(e) => warn!("Failed to write metrics: {:#}", e),
        }
    }

    Ok(exit_code(&report))
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn build_orchestrator(
    config: &Config,
    descriptor: &CollectionDescriptor,
    ingest: IngestConfig,
    throttle: RequestThrottle,
    sink: Arc<FsSink>,
) -> Result<IngestionOrchestrator> {
    let adapter = create_adapter(descriptor, &config.alchemy, &config.nftscan, throttle.clone())
        .context("Failed to create provider adapter")?;
    info!("Using provider adapter: {}", adapter.name());

    let resolver = HttpSourceResolver::new(&config.resolver, throttle, config.retry.clone())
        .context("Failed to create source resolver")?;
    info!(gateways = config.resolver.gateways.len(), "Source resolver initialized");

    Ok(
        IngestionOrchestrator::new(ingest, adapter, Arc::new(resolver), sink)
            .with_retry_policy(config.retry.clone()),
    )
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
