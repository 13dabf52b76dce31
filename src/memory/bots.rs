use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use super::{BotStore, MemoryStore};
use crate::platform::BotIdentity;

/// A created bot as the persistence layer sees it. Template ids are kept raw;
/// they are checked against the catalog when the bot is restored.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedBot {
    pub identity: BotIdentity,
    pub name: String,
    pub template_ids: Vec<String>,
    pub credentials: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
impl BotStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<PersistedBot>> {
        let conn = self.conn.lock().await;

        let mut stmt = conn
            .prepare("SELECT identity, name, created_at FROM bots ORDER BY id ASC")
            .context("Failed to prepare bots query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .context("Failed to query bots")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect bots")?;

        let mut bots = Vec::with_capacity(rows.len());
        for (identity, name, created_at) in rows {
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .with_context(|| format!("Invalid created_at for bot {}", name))?
                .with_timezone(&Utc);
            bots.push(PersistedBot {
                template_ids: load_template_ids(&conn, &identity)?,
                credentials: load_credentials(&conn, &identity)?,
                identity: BotIdentity::new(identity),
                name,
                created_at,
            });
        }

        Ok(bots)
    }

    async fn save_one(&self, bot: &PersistedBot) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let identity = bot.identity.as_str();

        // Upsert keeps the original row id, so re-saving a bot keeps its
        // place in the restore order.
        tx.execute(
            "INSERT INTO bots (identity, name, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(identity) DO UPDATE SET name = excluded.name",
            rusqlite::params![identity, bot.name, bot.created_at.to_rfc3339()],
        )
        .context("Failed to upsert bot")?;

        tx.execute(
            "DELETE FROM bot_templates WHERE identity = ?1",
            rusqlite::params![identity],
        )?;
        tx.execute(
            "DELETE FROM bot_credentials WHERE identity = ?1",
            rusqlite::params![identity],
        )?;

        for (position, template_id) in bot.template_ids.iter().enumerate() {
            tx.execute(
                "INSERT INTO bot_templates (identity, position, template_id) VALUES (?1, ?2, ?3)",
                rusqlite::params![identity, position as i64, template_id],
            )
            .context("Failed to insert bot template")?;
        }

        for (template_id, credential) in &bot.credentials {
            tx.execute(
                "INSERT INTO bot_credentials (identity, template_id, credential) VALUES (?1, ?2, ?3)",
                rusqlite::params![identity, template_id, credential],
            )
            .context("Failed to insert bot credential")?;
        }

        tx.commit().context("Failed to commit bot")?;
        Ok(())
    }

    async fn remove(&self, identity: &BotIdentity) -> Result<bool> {
        let conn = self.conn.lock().await;
        let rows = conn
            .execute(
                "DELETE FROM bots WHERE identity = ?1",
                rusqlite::params![identity.as_str()],
            )
            .context("Failed to delete bot")?;
        Ok(rows > 0)
    }
}

fn load_template_ids(conn: &Connection, identity: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT template_id FROM bot_templates WHERE identity = ?1 ORDER BY position ASC",
    )?;
    let ids = stmt
        .query_map(rusqlite::params![identity], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .context("Failed to load bot templates")?;
    Ok(ids)
}

fn load_credentials(conn: &Connection, identity: &str) -> Result<HashMap<String, String>> {
    let mut stmt =
        conn.prepare("SELECT template_id, credential FROM bot_credentials WHERE identity = ?1")?;
    let credentials = stmt
        .query_map(rusqlite::params![identity], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<HashMap<String, String>>>()
        .context("Failed to load bot credentials")?;
    Ok(credentials)
}
