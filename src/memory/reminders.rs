use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{MemoryStore, ReminderStore};

#[derive(Debug, Clone, PartialEq)]
pub struct Reminder {
    pub id: String,
    pub user_id: i64,
    pub chat_id: i64,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
impl ReminderStore for MemoryStore {
    async fn save_reminder(&self, reminder: &Reminder) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO reminders (id, user_id, chat_id, text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                reminder.id,
                reminder.user_id,
                reminder.chat_id,
                reminder.text,
                reminder.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert reminder")?;
        Ok(())
    }
}

impl MemoryStore {
    /// Reminders created in a chat, oldest first.
    #[allow(dead_code)]
    pub async fn reminders_for_chat(&self, chat_id: i64) -> Result<Vec<Reminder>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, chat_id, text, created_at
                 FROM reminders WHERE chat_id = ?1
                 ORDER BY created_at ASC",
            )
            .context("Failed to prepare reminders query")?;

        let rows = stmt
            .query_map(rusqlite::params![chat_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .context("Failed to query reminders")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to collect reminders")?;

        rows.into_iter()
            .map(|(id, user_id, chat_id, text, created_at)| {
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .with_context(|| format!("Invalid created_at for reminder {}", id))?
                    .with_timezone(&Utc);
                Ok(Reminder {
                    id,
                    user_id,
                    chat_id,
                    text,
                    created_at,
                })
            })
            .collect()
    }
}
