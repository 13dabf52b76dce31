pub mod bots;
pub mod links;
pub mod reminders;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::platform::BotIdentity;

pub use bots::PersistedBot;
pub use reminders::Reminder;

/// Durable table of created bots, read once at startup and written on
/// register/unregister.
#[async_trait]
pub trait BotStore: Send + Sync {
    /// Every stored bot, in creation order.
    async fn load_all(&self) -> Result<Vec<PersistedBot>>;
    /// Insert or replace one bot, including its template order and credentials.
    async fn save_one(&self, bot: &PersistedBot) -> Result<()>;
    /// Returns whether a bot was removed.
    async fn remove(&self, identity: &BotIdentity) -> Result<bool>;
}

#[async_trait]
pub trait ReminderStore: Send + Sync {
    async fn save_reminder(&self, reminder: &Reminder) -> Result<()>;
}

#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Store `id -> url`. Returns `false` without writing when `id` is taken.
    async fn insert_link(&self, id: &str, url: &str) -> Result<bool>;
}

/// Thread-safe SQLite store backing bots, reminders and short links
#[derive(Clone)]
pub struct MemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl MemoryStore {
    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        // Run migrations on the raw connection before wrapping in Mutex.
        // This avoids blocking_lock() panic when called from async context.
        Self::run_migrations(&conn)?;

        info!("Store initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            -- Created bots, in creation order
            CREATE TABLE IF NOT EXISTS bots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                identity TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Enabled templates; position is handler-chain order
            CREATE TABLE IF NOT EXISTS bot_templates (
                identity TEXT NOT NULL,
                position INTEGER NOT NULL,
                template_id TEXT NOT NULL,
                PRIMARY KEY (identity, position),
                FOREIGN KEY (identity) REFERENCES bots(identity) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS bot_credentials (
                identity TEXT NOT NULL,
                template_id TEXT NOT NULL,
                credential TEXT NOT NULL,
                PRIMARY KEY (identity, template_id),
                FOREIGN KEY (identity) REFERENCES bots(identity) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS reminders (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                chat_id INTEGER NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_reminders_chat
                ON reminders(chat_id, created_at);

            CREATE TABLE IF NOT EXISTS short_links (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )
        .context("Failed to run migrations")?;

        Ok(())
    }
}
