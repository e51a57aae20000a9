use std::{collections::HashSet, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::message::{ConversationSummary, Identity, Message};

pub type SharedStore = Arc<dyn MessageStore>;

/// Durable, append-only record of chat messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Appends a message and returns it with its store-assigned id and timestamp.
    async fn create(&self, sender: &Identity, receiver: &Identity, content: &str) -> anyhow::Result<Message>;

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Message>>;

    /// All messages between `a` and `b`, oldest first.
    async fn between(&self, a: &Identity, b: &Identity) -> anyhow::Result<Vec<Message>>;

    /// Latest messages sent or received by `identity`, newest first.
    async fn recent(&self, identity: &Identity, limit: u32) -> anyhow::Result<Vec<Message>>;

    /// One summary per peer `identity` has exchanged messages with, newest first.
    async fn conversations(&self, identity: &Identity) -> anyhow::Result<Vec<ConversationSummary>>;
}

type MessageRow = (String, String, String, String, i64);

const COLUMNS: &str = "id,sender_id,receiver_id,content,created_at";

pub struct SqliteMessageStore {
    db_pool: SqlitePool,
    // nanos of the last assigned created_at
    last_created: Mutex<i64>,
}

impl SqliteMessageStore {
    /// Creates the schema if needed and resumes the timestamp sequence.
    pub async fn open(db_pool: SqlitePool) -> anyhow::Result<SqliteMessageStore> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                sender_id TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(&db_pool)
        .await
        .context("creating messages table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS messages_pair ON messages (sender_id, receiver_id, created_at)")
            .execute(&db_pool)
            .await?;

        let (last,): (Option<i64>,) = sqlx::query_as("SELECT MAX(created_at) FROM messages")
            .fetch_one(&db_pool)
            .await?;

        Ok(SqliteMessageStore {
            db_pool,
            last_created: Mutex::new(last.unwrap_or(0)),
        })
    }

    fn next_timestamp(&self) -> anyhow::Result<i64> {
        let now = i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos())
            .context("clock out of range")?;
        let mut last = self.last_created.lock();
        *last = now.max(*last + 1);
        Ok(*last)
    }
}

fn from_row((id, sender, receiver, content, created_at): MessageRow) -> anyhow::Result<Message> {
    Ok(Message {
        id: Uuid::parse_str(&id)?,
        sender: Identity::new(sender),
        receiver: Identity::new(receiver),
        content,
        created_at: OffsetDateTime::from_unix_timestamp_nanos(created_at.into())?,
    })
}

fn from_rows(rows: Vec<MessageRow>) -> anyhow::Result<Vec<Message>> {
    rows.into_iter().map(from_row).collect()
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn create(&self, sender: &Identity, receiver: &Identity, content: &str) -> anyhow::Result<Message> {
        anyhow::ensure!(!content.trim().is_empty(), "message content is empty");

        let id = Uuid::now_v7();
        let created_at = self.next_timestamp()?;
        sqlx::query("INSERT INTO messages (id,sender_id,receiver_id,content,created_at) VALUES (?,?,?,?,?)")
            .bind(id.to_string())
            .bind(sender.as_str())
            .bind(receiver.as_str())
            .bind(content)
            .bind(created_at)
            .execute(&self.db_pool)
            .await
            .with_context(|| format!("persisting message {sender} -> {receiver}"))?;

        Ok(Message {
            id,
            sender: sender.clone(),
            receiver: receiver.clone(),
            content: content.to_owned(),
            created_at: OffsetDateTime::from_unix_timestamp_nanos(created_at.into())?,
        })
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!("SELECT {COLUMNS} FROM messages WHERE id=?"))
            .bind(id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(from_row).transpose()
    }

    async fn between(&self, a: &Identity, b: &Identity) -> anyhow::Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM messages
             WHERE (sender_id=?1 AND receiver_id=?2) OR (sender_id=?2 AND receiver_id=?1)
             ORDER BY created_at ASC"
        ))
        .bind(a.as_str())
        .bind(b.as_str())
        .fetch_all(&self.db_pool)
        .await?;
        from_rows(rows)
    }

    async fn recent(&self, identity: &Identity, limit: u32) -> anyhow::Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM messages
             WHERE sender_id=?1 OR receiver_id=?1
             ORDER BY created_at DESC LIMIT ?2"
        ))
        .bind(identity.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.db_pool)
        .await?;
        from_rows(rows)
    }

    async fn conversations(&self, identity: &Identity) -> anyhow::Result<Vec<ConversationSummary>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM messages
             WHERE (sender_id=?1 OR receiver_id=?1) AND sender_id<>receiver_id
             ORDER BY created_at DESC"
        ))
        .bind(identity.as_str())
        .fetch_all(&self.db_pool)
        .await?;

        let mut seen = HashSet::new();
        let mut summaries = Vec::new();
        for message in from_rows(rows)? {
            if seen.insert(message.participant(identity).clone()) {
                summaries.push(ConversationSummary::from_message(identity, &message));
            }
        }
        Ok(summaries)
    }
}
