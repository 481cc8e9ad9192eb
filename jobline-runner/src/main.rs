//! Jobline Runner
//!
//! Processes the pending jobs of one thing end to end: discovers them,
//! describes each one, then claims, executes and reports them one at a time.
//!
//! The binary wires the runner against the in-process broker with the
//! simulated jobs backend attached, seeded with a few demo jobs.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jobline_backend::{JobStore, JobsService, seed_demo_jobs};
use jobline_client::{InMemoryBroker, JobsClient};
use jobline_runner::config::{ClaimMode, Config};
use jobline_runner::scheduler::JobDriver;
use jobline_runner::service::{SimulatedWork, WorkService};
use jobline_runner::shutdown::install_shutdown_handler;

#[derive(Parser)]
#[command(name = "jobline-runner")]
#[command(about = "Processes the pending jobs of a thing", long_about = None)]
struct Cli {
    /// Thing whose jobs are processed (random when omitted)
    #[arg(long, env = "THING_NAME")]
    thing_name: Option<String>,

    /// Client id of the transport session
    #[arg(long, env = "CLIENT_ID", default_value = "jobline-runner")]
    client_id: String,

    /// Step timeout sent with each claim, in minutes
    #[arg(long, env = "STEP_TIMEOUT_MINUTES", default_value_t = 15)]
    step_timeout_minutes: i64,

    /// Longest wait for any response, in seconds
    #[arg(long, env = "EXCHANGE_TIMEOUT_SECS", default_value_t = 30)]
    exchange_timeout_secs: u64,

    /// Duration of the simulated work, in milliseconds
    #[arg(long, env = "WORK_DURATION_MS", default_value_t = 1000)]
    work_duration_ms: u64,

    /// Local bound on one job's work, in seconds
    #[arg(long, env = "JOB_TIMEOUT_SECS", default_value_t = 300)]
    job_timeout_secs: u64,

    /// How many times the claim cycle runs
    #[arg(long, env = "CLAIM_MODE", value_enum, default_value_t = ClaimMode::Catalog)]
    claim_mode: ClaimMode,

    /// Jobs queued in the local backend at startup
    #[arg(long, env = "SIMULATED_JOBS", default_value_t = 3)]
    simulated_jobs: usize,
}

impl Cli {
    fn into_config(self) -> Result<Config> {
        let mut config = match self.thing_name {
            Some(thing_name) => Config::new(thing_name),
            None => Config::default(),
        };
        config.client_id = self.client_id;
        config.step_timeout_minutes = self.step_timeout_minutes;
        config.exchange_timeout = Duration::from_secs(self.exchange_timeout_secs);
        config.work_duration = Duration::from_millis(self.work_duration_ms);
        config.job_timeout = Duration::from_secs(self.job_timeout_secs);
        config.claim_mode = self.claim_mode;
        config.simulated_jobs = self.simulated_jobs;

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "jobline_runner=info,jobline_client=info,jobline_backend=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Jobline Runner");

    let config = Cli::parse()
        .into_config()
        .context("Invalid configuration")?;
    info!(
        "Loaded configuration: thing_name={}, client_id={}",
        config.thing_name, config.client_id
    );

    let shutdown = install_shutdown_handler();
    let broker = InMemoryBroker::new();

    // Local jobs backend
    let store = Arc::new(JobStore::new(config.thing_name.clone()));
    let seeded = seed_demo_jobs(&store, config.simulated_jobs)
        .map_err(|e| anyhow::anyhow!("Failed to seed demo jobs: {}", e))?;
    info!("Queued {} demo job(s)", seeded.len());

    let backend = JobsService::start(Arc::new(broker.connect("jobline-backend")), store)
        .await
        .context("Failed to start jobs backend")?;

    // Device side
    let client = JobsClient::new(
        Arc::new(broker.connect(config.client_id.clone())),
        config.thing_name.clone(),
    )
    .with_exchange_timeout(config.exchange_timeout)
    .with_cancellation(shutdown.clone());

    let work: Arc<dyn WorkService> = Arc::new(SimulatedWork::new(config.work_duration));
    let driver = JobDriver::new(config.clone(), client, work);

    info!(
        "Exchange timeout: {:?}, job timeout: {:?}",
        config.exchange_timeout, config.job_timeout
    );

    let outcome = driver.run().await;

    if let Err(e) = backend.stop().await {
        error!("Failed to stop jobs backend: {}", e);
    }

    match outcome {
        Ok(report) => {
            for job in &report.completed {
                info!(
                    "  {} (execution {}): {} at version {}",
                    job.job_id, job.execution_number, job.status, job.version_number
                );
            }
            info!(
                "Complete! {} job(s) discovered, {} processed",
                report.catalog.len(),
                report.completed.len()
            );
            Ok(())
        }
        Err(e) => {
            error!("Runner error: {}", e);
            Err(e.into())
        }
    }
}
