use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::platform::{BotIdentity, Transport};
use crate::router;
use crate::templates::{Services, TemplateSelection};

/// Receive-cycle timing shared by every polling loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSettings {
    /// Long-poll timeout passed to `fetch_updates`
    pub timeout_secs: u64,
    /// Pause after every cycle, including failed ones
    pub cycle_delay: Duration,
}

/// State the receive task needs; shared between the instance and its task.
struct Shared {
    identity: BotIdentity,
    selection: TemplateSelection,
    transport: Arc<dyn Transport>,
    services: Arc<Services>,
    settings: PollSettings,
    /// Highest processed sequence number
    cursor: AtomicI64,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A registered bot: identity, enabled templates and its polling loop.
pub struct BotInstance {
    name: String,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl BotInstance {
    pub fn new(
        identity: BotIdentity,
        name: impl Into<String>,
        selection: TemplateSelection,
        transport: Arc<dyn Transport>,
        services: Arc<Services>,
        settings: PollSettings,
    ) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                identity,
                selection,
                transport,
                services,
                settings,
                cursor: AtomicI64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &BotIdentity {
        &self.shared.identity
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn selection(&self) -> &TemplateSelection {
        &self.shared.selection
    }

    pub fn cursor(&self) -> i64 {
        self.shared.cursor.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Spawn the receive task. Does nothing if it is already running.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            debug!("Bot {} is already polling", self.shared.identity);
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(self.shared.clone(), cancel.clone()));
        *worker = Some(Worker { cancel, handle });

        info!("Started polling for bot '{}' ({})", self.name, self.shared.identity);
    }

    /// Cancel the receive task and wait for it to exit. An in-flight fetch is
    /// dropped and its updates are never processed; a message still being
    /// handled is abandoned. Safe to call repeatedly.
    pub async fn stop(&self) {
        let Some(worker) = self.worker.lock().await.take() else {
            return;
        };

        worker.cancel.cancel();
        if let Err(e) = worker.handle.await {
            error!("Polling task for {} ended abnormally: {}", self.shared.identity, e);
        }

        info!("Stopped polling for bot '{}' ({})", self.name, self.shared.identity);
    }
}

async fn poll_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    // getUpdates is rejected while a webhook is set
    tokio::select! {
        _ = cancel.cancelled() => return,
        result = shared.transport.set_webhook("") => {
            if let Err(e) = result {
                warn!("Failed to clear webhook for {}: {}", shared.identity, e);
            }
        }
    }

    'cycles: loop {
        let offset = shared.cursor.load(Ordering::SeqCst) + 1;

        let fetched = tokio::select! {
            _ = cancel.cancelled() => break,
            result = shared.transport.fetch_updates(offset, shared.settings.timeout_secs) => result,
        };

        match fetched {
            Ok(updates) => {
                for update in updates {
                    if cancel.is_cancelled() {
                        break 'cycles;
                    }
                    if update.sequence <= shared.cursor.load(Ordering::SeqCst) {
                        debug!("Skipping already processed update {}", update.sequence);
                        continue;
                    }

                    shared.cursor.store(update.sequence, Ordering::SeqCst);

                    // Handlers may wait on external services; stop must not.
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!("Abandoned update {} on stop", update.sequence);
                            break 'cycles;
                        }
                        _ = router::route(
                            shared.transport.as_ref(),
                            &shared.services,
                            &shared.selection,
                            &update,
                        ) => {}
                    }
                }
            }
            Err(e) => {
                warn!("Failed to fetch updates for {}: {}", shared.identity, e);
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(shared.settings.cycle_delay) => {}
        }
    }

    debug!("Polling loop for {} exited", shared.identity);
}
