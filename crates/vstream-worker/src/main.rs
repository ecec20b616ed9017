//! HLS transcoding worker binary.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vstream_queue::{JobQueue, QueueConfig};
use vstream_worker::{metrics, JobExecutor, PipelineContext, WorkerConfig};

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vstream=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Redis over TLS needs a process-wide crypto provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing()?;

    info!("Starting vstream-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        metrics::init_metrics(port)?;
        info!("Serving metrics on port {}", port);
    }

    let queue_config = QueueConfig::from_env();
    let ctx = PipelineContext::from_env(config, &queue_config.redis_url)
        .await
        .context("failed to build pipeline context")?;
    let queue = JobQueue::new(queue_config).context("failed to create job queue")?;

    let executor = Arc::new(JobExecutor::new(queue, ctx));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                signal_executor.shutdown();
            }
            Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
        }
    });

    executor.run().await?;

    info!("Worker shutdown complete");
    Ok(())
}
