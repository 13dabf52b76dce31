use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{LinkStore, MemoryStore};

#[async_trait]
impl LinkStore for MemoryStore {
    async fn insert_link(&self, id: &str, url: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let rows = conn
            .execute(
                "INSERT OR IGNORE INTO short_links (id, url) VALUES (?1, ?2)",
                rusqlite::params![id, url],
            )
            .context("Failed to store short link")?;
        Ok(rows > 0)
    }
}

impl MemoryStore {
    /// Original URL behind a short id.
    #[allow(dead_code)]
    pub async fn resolve_link(&self, id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        match conn.query_row(
            "SELECT url FROM short_links WHERE id = ?1",
            rusqlite::params![id],
            |row| row.get(0),
        ) {
            Ok(url) => Ok(Some(url)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("Failed to resolve short link"),
        }
    }
}
