// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::WorkerConfig;
use crate::job::{ImageSize, Job, Selection};
use crate::queue::{connect_queue, upload_attributes};
use crate::runtime::build_worker;
use crate::vision::{DetectorBank, TemplateDetectorBank};

/// Font detection queue worker
#[derive(Parser, Debug)]
#[command(name = "fontdetective-worker")]
#[command(version)]
#[command(about = "Drains the image job queue and runs font detectors", long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, short, global = true, env = "FONTDETECTIVE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ConfigOverrides,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags that win over the file and the environment
#[derive(Args, Debug, Default)]
pub struct ConfigOverrides {
    #[arg(long, global = true)]
    pub queue_endpoint: Option<String>,

    #[arg(long, global = true)]
    pub result_store_endpoint: Option<String>,

    #[arg(long, global = true)]
    pub working_root: Option<PathBuf>,

    #[arg(long, global = true)]
    pub detector_directory: Option<PathBuf>,

    #[arg(long, global = true)]
    pub max_concurrent_detectors: Option<usize>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut WorkerConfig) {
        if let Some(v) = &self.queue_endpoint {
            config.queue_endpoint = v.clone();
        }
        if let Some(v) = &self.result_store_endpoint {
            config.result_store_endpoint = v.clone();
        }
        if let Some(v) = &self.working_root {
            config.working_root = v.clone();
        }
        if let Some(v) = &self.detector_directory {
            config.detector_directory = v.clone();
        }
        if let Some(v) = self.max_concurrent_detectors {
            config.max_concurrent_detectors = v;
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll the queue until interrupted
    Run,

    /// Send one job to the queue
    Enqueue(EnqueueArgs),

    /// Print the effective configuration and check the detector directory
    CheckConfig,
}

#[derive(Args, Debug, Clone)]
pub struct EnqueueArgs {
    /// Job identifier
    #[arg(long)]
    pub uid: String,

    /// Source image URL
    #[arg(long)]
    pub url: String,

    #[arg(long, default_value_t = 0)]
    pub x: u32,

    #[arg(long, default_value_t = 0)]
    pub y: u32,

    /// Selection width; defaults to the rest of the image
    #[arg(long)]
    pub w: Option<u32>,

    /// Selection height; defaults to the rest of the image
    #[arg(long)]
    pub h: Option<u32>,

    /// Image width the selection refers to
    #[arg(long)]
    pub image_w: u32,

    /// Image height the selection refers to
    #[arg(long)]
    pub image_h: u32,
}

impl EnqueueArgs {
    pub fn to_job(&self) -> Result<Job> {
        let job = Job {
            id: self.uid.clone(),
            source_url: self.url.clone(),
            crop_region: Selection {
                x: self.x,
                y: self.y,
                w: self.w.unwrap_or(self.image_w.saturating_sub(self.x)),
                h: self.h.unwrap_or(self.image_h.saturating_sub(self.y)),
            },
            image_size: ImageSize {
                w: self.image_w,
                h: self.image_h,
            },
        };
        job.validate().context("job would be rejected by the worker")?;
        Ok(job)
    }
}

/// Log filter from a `RUST_LOG`-style directive, `info` when unset or unparsable
pub fn log_filter(directive: Option<&str>) -> EnvFilter {
    directive
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Resolve the effective configuration for `cli`
pub fn load_config(cli: &Cli) -> Result<WorkerConfig> {
    let mut config = WorkerConfig::load(cli.config.as_deref())?;
    cli.overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// Execute CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Commands::Run => run(config).await,
        Commands::Enqueue(args) => enqueue(config, args).await,
        Commands::CheckConfig => check_config(config).await,
    }
}

async fn run(config: WorkerConfig) -> Result<()> {
    let assembled = build_worker(&config)?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Shutdown requested, finishing current job");
            signal_token.cancel();
        }
    });

    let stats = assembled.worker.run(shutdown).await;
    println!(
        "Processed {} jobs ({} aborted, {} poison) over {} polls",
        stats.completed_runs, stats.aborted_runs, stats.poison_messages, stats.polls
    );
    Ok(())
}

async fn enqueue(config: WorkerConfig, args: EnqueueArgs) -> Result<()> {
    if config.queue_endpoint.trim() == "memory:" {
        warn!("⚠️ Enqueueing into a memory queue that no worker will read");
    }
    let job = args.to_job()?;
    let queue = connect_queue(&config.queue_endpoint, config.request_timeout())?;
    queue
        .send(job.to_payload()?, upload_attributes())
        .await
        .with_context(|| format!("sending job {}", job.id))?;

    println!("✅ Enqueued job {} ({})", job.id, job.crop_region);
    Ok(())
}

async fn check_config(config: WorkerConfig) -> Result<()> {
    println!("{}", config.to_toml()?);

    let bank = TemplateDetectorBank::new(&config.detector_directory);
    match bank.list_detectors().await {
        Ok(detectors) if detectors.is_empty() => {
            println!("⚠️ No detectors in {}", config.detector_directory.display())
        }
        Ok(detectors) => println!("✅ Detectors: {}", detectors.join(", ")),
        Err(e) => println!("❌ {}", e),
    }
    Ok(())
}
