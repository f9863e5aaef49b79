// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use cdf_config::PipelineConfig;
use cdf_gateway::{AppState, build_app};
use cdf_registry::JobRegistry;
use cdf_render::{CommandRasterizer, RasterizerSpec};
use cdf_worker::{Worker, WorkerConfig};
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cdf-gateway", version, about = "cardflow intake gateway")]
struct Args {
    /// Enable request/pipeline debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("cdf=debug,cdf_gateway=debug,cdf_worker=debug")
    } else {
        EnvFilter::new("cdf=info,cdf_gateway=info,cdf_worker=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (config, warnings) = PipelineConfig::from_env().context("load configuration")?;
    for warning in &warnings {
        warn!(%warning, "configuration warning");
    }
    let config = Arc::new(config);

    fs::create_dir_all(&config.intake_dir)
        .await
        .with_context(|| format!("create intake dir {}", config.intake_dir.display()))?;
    fs::create_dir_all(&config.result_dir)
        .await
        .with_context(|| format!("create result dir {}", config.result_dir.display()))?;

    let registry = Arc::new(JobRegistry::new(config.queue_capacity, config.job_ttl));
    let rasterizer = Arc::new(CommandRasterizer::new(rasterizer_spec(
        &config.rasterizer_cmd,
    )?));

    let shutdown = CancellationToken::new();

    for worker_id in 0..config.workers {
        let worker = Worker::new(
            worker_id,
            registry.clone(),
            rasterizer.clone(),
            WorkerConfig {
                result_root: config.result_dir.clone(),
                job_timeout: config.job_timeout,
            },
        );
        tokio::spawn(worker.run(shutdown.clone()));
    }

    tokio::spawn(reaper(
        registry.clone(),
        config.reap_interval,
        shutdown.clone(),
    ));

    let state = Arc::new(AppState {
        registry,
        config: config.clone(),
        started_at: Instant::now(),
    });
    let app = build_app(state);

    let bind = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(
        bind = %bind,
        workers = config.workers,
        queue_capacity = config.queue_capacity,
        "cdf-gateway listening"
    );

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            signal_token.cancel();
        })
        .await
        .context("serve")
}

/// `RASTERIZER_CMD` is a command line; the first token is the executable.
fn rasterizer_spec(cmd: &str) -> Result<RasterizerSpec> {
    let mut tokens = cmd.split_whitespace();
    let command = tokens
        .next()
        .context("RASTERIZER_CMD must not be empty")?;
    let mut spec = RasterizerSpec::new(command);
    spec.args = tokens.map(str::to_string).collect();
    Ok(spec)
}

/// Evict expired jobs and delete what they left on disk.
async fn reaper(
    registry: Arc<JobRegistry>,
    interval: std::time::Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let reaped = registry.reap(Utc::now()).await;
        for job in reaped {
            if let Some(result_dir) = &job.result_dir {
                if let Err(err) = fs::remove_dir_all(result_dir).await {
                    warn!(job_id = %job.id, error = %err, "result dir not removed");
                }
            }
            match fs::remove_file(&job.source_path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => warn!(job_id = %job.id, error = %err, "source file not removed"),
            }
            info!(job_id = %job.id, "expired job reaped");
        }
    }
}
