use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::bot::{BotInstance, PollSettings};
use crate::config::BotSeed;
use crate::memory::{BotStore, PersistedBot};
use crate::platform::{BotIdentity, Transport};
use crate::templates::{Services, TemplateSelection};

/// Builds the transport bound to one bot identity.
pub type TransportFactory = Arc<dyn Fn(&BotIdentity) -> Arc<dyn Transport> + Send + Sync>;

/// Process-wide table of running bots, keyed by identity.
///
/// The table lock is only held for lookups and inserts. Register and
/// unregister for one identity are serialized by that identity's slot lock,
/// so a stop and a start for the same bot never interleave while other bots
/// stay reachable.
pub struct BotRegistry {
    bots: Mutex<HashMap<BotIdentity, Arc<BotInstance>>>,
    slots: Mutex<HashMap<BotIdentity, Arc<Mutex<()>>>>,
    factory: TransportFactory,
    services: Arc<Services>,
    settings: PollSettings,
    store: Option<Arc<dyn BotStore>>,
}

impl BotRegistry {
    pub fn new(factory: TransportFactory, services: Arc<Services>, settings: PollSettings) -> Self {
        Self {
            bots: Mutex::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
            factory,
            services,
            settings,
            store: None,
        }
    }

    /// Persist registrations and removals through `store`.
    pub fn with_store(mut self, store: Arc<dyn BotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Persist the bot, then start its polling loop. A bot already running
    /// under the same identity is stopped and replaced.
    pub async fn register(
        &self,
        identity: BotIdentity,
        name: &str,
        selection: TemplateSelection,
    ) -> Result<Arc<BotInstance>> {
        if identity.is_empty() {
            anyhow::bail!("Bot token is empty");
        }

        if let Some(store) = &self.store {
            let persisted = PersistedBot {
                identity: identity.clone(),
                name: name.to_string(),
                template_ids: selection.ids().into_iter().map(String::from).collect(),
                credentials: selection.credentials().clone(),
                created_at: Utc::now(),
            };
            store
                .save_one(&persisted)
                .await
                .with_context(|| format!("Failed to persist bot {}", identity))?;
        }

        Ok(self.activate(identity, name, selection).await)
    }

    async fn lock_identity(&self, identity: &BotIdentity) -> OwnedMutexGuard<()> {
        let slot = self
            .slots
            .lock()
            .await
            .entry(identity.clone())
            .or_default()
            .clone();
        slot.lock_owned().await
    }

    async fn activate(
        &self,
        identity: BotIdentity,
        name: &str,
        selection: TemplateSelection,
    ) -> Arc<BotInstance> {
        let _slot = self.lock_identity(&identity).await;

        let previous = self.bots.lock().await.remove(&identity);
        if let Some(previous) = previous {
            info!("Replacing running bot '{}' ({})", previous.name(), identity);
            previous.stop().await;
        }

        let missing = selection.missing_credentials();
        if !missing.is_empty() {
            warn!("Bot {} has no credential for: {}", identity, missing.join(", "));
        }

        let transport = (self.factory)(&identity);
        let instance = Arc::new(BotInstance::new(
            identity.clone(),
            name,
            selection,
            transport,
            self.services.clone(),
            self.settings,
        ));
        instance.start().await;
        self.bots.lock().await.insert(identity, instance.clone());

        instance
    }

    /// Stop and forget a bot. Returns whether it was running here.
    pub async fn unregister(&self, identity: &BotIdentity) -> Result<bool> {
        let removed = {
            let _slot = self.lock_identity(identity).await;
            let instance = self.bots.lock().await.remove(identity);
            match instance {
                Some(instance) => {
                    instance.stop().await;
                    debug!(
                        "Bot '{}' ({}) stopped at update {}",
                        instance.name(),
                        instance.identity(),
                        instance.cursor()
                    );
                    true
                }
                None => false,
            }
        };

        if let Some(store) = &self.store {
            store
                .remove(identity)
                .await
                .with_context(|| format!("Failed to delete stored bot {}", identity))?;
        }

        if removed {
            info!("Unregistered bot {}", identity);
        } else {
            debug!("Bot {} was not registered", identity);
        }
        Ok(removed)
    }

    /// Start every stored bot, in stored order. Entries that cannot be
    /// restored are logged and skipped. Returns how many were started.
    pub async fn restore_all(&self, persisted: Vec<PersistedBot>) -> usize {
        let total = persisted.len();
        let mut restored = 0;

        for bot in persisted {
            if bot.identity.is_empty() {
                warn!("Skipping stored bot '{}': empty token", bot.name);
                continue;
            }

            let selection = match TemplateSelection::new(&bot.template_ids, bot.credentials) {
                Ok(selection) => selection,
                Err(e) => {
                    warn!("Skipping stored bot {}: {}", bot.identity, e);
                    continue;
                }
            };

            let instance = self.activate(bot.identity, &bot.name, selection).await;
            debug!(
                "Restored bot '{}' with templates {:?}",
                instance.name(),
                instance.selection().ids()
            );
            restored += 1;
        }

        info!("Restored {}/{} stored bots", restored, total);
        restored
    }

    /// Register config-declared bots that are not running yet. Tokens are
    /// checked against the API first; a seed without a name takes the bot's
    /// own first name.
    pub async fn seed(&self, seeds: &[BotSeed]) -> usize {
        let mut seeded = 0;

        for seed in seeds {
            let identity = BotIdentity::new(seed.token.as_str());
            if identity.is_empty() {
                warn!("Skipping configured bot with an empty token");
                continue;
            }
            if self.get(&identity).await.is_some() {
                debug!("Configured bot {} is already registered", identity);
                continue;
            }

            let selection = match TemplateSelection::new(&seed.templates, seed.credentials.clone())
            {
                Ok(selection) => selection,
                Err(e) => {
                    warn!("Skipping configured bot {}: {}", identity, e);
                    continue;
                }
            };

            let profile = match (self.factory)(&identity).validate_identity().await {
                Ok(profile) => profile,
                Err(e) => {
                    warn!("Skipping configured bot {}: token rejected: {}", identity, e);
                    continue;
                }
            };

            let name = seed.name.clone().unwrap_or_else(|| profile.first_name.clone());
            match self.register(identity, &name, selection).await {
                Ok(_) => {
                    info!("Registered configured bot '{}' ({})", name, profile.handle());
                    seeded += 1;
                }
                Err(e) => warn!("Failed to register configured bot '{}': {:#}", name, e),
            }
        }

        seeded
    }

    pub async fn get(&self, identity: &BotIdentity) -> Option<Arc<BotInstance>> {
        self.bots.lock().await.get(identity).cloned()
    }

    /// Number of registered bots and their identities.
    pub async fn stats(&self) -> (usize, Vec<BotIdentity>) {
        let bots = self.bots.lock().await;
        let mut identities: Vec<BotIdentity> = bots.keys().cloned().collect();
        identities.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        (bots.len(), identities)
    }

    /// Stop every loop and empty the table.
    pub async fn shutdown_all(&self) {
        let instances: Vec<Arc<BotInstance>> = {
            let mut bots = self.bots.lock().await;
            bots.drain().map(|(_, instance)| instance).collect()
        };

        let count = instances.len();
        futures::future::join_all(instances.iter().map(|instance| instance.stop())).await;
        info!("Stopped {} bot(s)", count);
    }
}
