use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::Job;
use tracing::info;

use crate::platform::BotIdentity;
use crate::registry::BotRegistry;

/// One log line describing the registry; tokens appear masked.
fn heartbeat_summary(count: usize, identities: &[BotIdentity]) -> String {
    if identities.is_empty() {
        return format!("Heartbeat: {} bot(s) running", count);
    }
    let masked: Vec<String> = identities.iter().map(BotIdentity::masked).collect();
    format!("Heartbeat: {} bot(s) running: {}", count, masked.join(", "))
}

/// Log the registry snapshot once.
pub async fn heartbeat(registry: &BotRegistry) -> String {
    let (count, identities) = registry.stats().await;
    let line = heartbeat_summary(count, &identities);
    info!("{}", line);
    line
}

/// Cron job that runs `heartbeat` on `cron` (six fields, seconds first).
pub fn heartbeat_job(cron: &str, registry: Arc<BotRegistry>) -> Result<Job> {
    Job::new_async(cron, move |_id, _scheduler| {
        let registry = registry.clone();
        Box::pin(async move {
            heartbeat(&registry).await;
        })
    })
    .with_context(|| format!("Invalid heartbeat cron expression: {}", cron))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::tests::empty_registry;
    use crate::templates::TemplateSelection;
    use std::collections::HashMap;

    #[test]
    fn test_heartbeat_summary_masks_tokens() {
        let identities = vec![BotIdentity::new("123456:ABCDEFGHIJKLmnop")];
        let line = heartbeat_summary(1, &identities);
        assert!(line.starts_with("Heartbeat: 1 bot(s) running"));
        assert!(!line.contains("ABCDEFGHIJKL"));
        assert!(line.contains(&identities[0].masked()));
    }

    #[tokio::test]
    async fn test_heartbeat_reports_registered_bots() {
        let registry = empty_registry();
        assert_eq!(heartbeat(&registry).await, "Heartbeat: 0 bot(s) running");

        let selection = TemplateSelection::new(&["reminder"], HashMap::new()).unwrap();
        registry
            .register(BotIdentity::new("42:secret-token"), "Reminders", selection)
            .await
            .unwrap();

        let line = heartbeat(&registry).await;
        assert!(line.starts_with("Heartbeat: 1 bot(s) running: 42:…oken"));
        assert!(!line.contains("secret"));
        registry.shutdown_all().await;
    }

    #[test]
    fn test_heartbeat_job_rejects_bad_cron() {
        let Err(err) = heartbeat_job("61 * * * * *", empty_registry()) else {
            panic!("bad cron accepted");
        };
        assert!(err.to_string().contains("61 * * * * *"));
    }
}
