pub mod tasks;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;
use uuid::Uuid;

use crate::config::HeartbeatConfig;
use crate::registry::BotRegistry;

/// Periodic jobs that watch the registry while the polling loops run.
pub struct Scheduler {
    inner: JobScheduler,
    jobs: Vec<(&'static str, Uuid)>,
}

impl Scheduler {
    /// Build the registry's periodic jobs and start running them.
    pub async fn start(registry: Arc<BotRegistry>, heartbeat: &HeartbeatConfig) -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        let mut scheduler = Self {
            inner,
            jobs: Vec::new(),
        };

        let job = tasks::heartbeat_job(&heartbeat.cron, registry)?;
        scheduler.add("heartbeat", job).await?;

        scheduler
            .inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        info!(
            "Scheduler started with jobs [{}], heartbeat cron: {}",
            scheduler.job_names().join(", "),
            heartbeat.cron
        );
        Ok(scheduler)
    }

    async fn add(&mut self, name: &'static str, job: Job) -> Result<()> {
        let id = self
            .inner
            .add(job)
            .await
            .with_context(|| format!("Failed to add job: {}", name))?;
        self.jobs.push((name, id));
        Ok(())
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|(name, _)| *name).collect()
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .context("Failed to shutdown scheduler")?;
        info!("Scheduler stopped");
        Ok(())
    }
}
