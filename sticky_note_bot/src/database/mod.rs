use std::{str::FromStr, sync::atomic::AtomicBool};

use async_trait::async_trait;
use chrono::Utc;
pub use sqlx::Error;
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Executor, Row, Sqlite,
};
use teloxide::types::{ChatId, MessageId};

use crate::types::StickyMessageRecord;

type Pool = sqlx::Pool<Sqlite>;
const DB_PATH: &str = "sqlite:sticky_messages.sqlite";
static WAS_CONSTRUCTED: AtomicBool = AtomicBool::new(false);

/// Persistence operations the sticky message manager needs.
/// [`Database`] is the real implementation over SQLite; tests substitute
/// their own to exercise failure paths.
#[async_trait]
pub trait StickyStore: Send + Sync {
    /// Every persisted sticky message record.
    async fn all(&self) -> Result<Vec<StickyMessageRecord>, Error>;
    /// Insert the record, or overwrite the one its chat already has.
    async fn upsert(&self, record: &StickyMessageRecord) -> Result<(), Error>;
    /// Point this chat's record at a freshly sent message.
    /// Fails with [`Error::RowNotFound`] if the chat has no record.
    async fn set_message_id(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), Error>;
    /// Remove this chat's record, if any.
    async fn delete(&self, chat_id: ChatId) -> Result<(), Error>;
}

pub struct Database {
    pool: Pool,
}

impl Database {
    pub async fn new() -> Result<Database, Error> {
        assert!(
            !WAS_CONSTRUCTED.swap(true, std::sync::atomic::Ordering::SeqCst),
            "Second database was constructed. This is not allowed."
        );

        if !Sqlite::database_exists(DB_PATH).await.unwrap_or(false) {
            Sqlite::create_database(DB_PATH).await?;
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(32)
            .connect_with(
                SqliteConnectOptions::from_str(DB_PATH)
                    .unwrap()
                    .pragma("cache_size", "-32768")
                    .busy_timeout(std::time::Duration::from_secs(600)),
            )
            .await?;

        Self::init_tables(pool).await
    }

    /// An independent in-memory database, for tests.
    #[cfg(test)]
    pub async fn new_in_memory() -> Result<Database, Error> {
        // A single connection, since every `sqlite::memory:` connection
        // would otherwise get a database of its own.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::init_tables(pool).await
    }

    async fn init_tables(pool: Pool) -> Result<Database, Error> {
        // STICKY_MESSAGES:
        // chat_id (unique primary key, i64)
        // message_id (i32 (because telegram bot api is just like that);
        //             id of the currently live copy of the sticky message)
        // message (text content to repost)
        // updated_at (date+time in UTC)
        pool.execute(sqlx::query(
            "
                CREATE TABLE IF NOT EXISTS sticky_messages (
                    chat_id INTEGER PRIMARY KEY NOT NULL,
                    message_id INTEGER NOT NULL,
                    message TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                ) STRICT;",
        ))
        .await?;

        Ok(Database { pool })
    }
}

fn record_from_row(row: SqliteRow) -> StickyMessageRecord {
    StickyMessageRecord {
        chat_id: ChatId(row.get(0)),
        message_id: MessageId(row.get(1)),
        text: row.get(2),
    }
}

#[async_trait]
impl StickyStore for Database {
    async fn all(&self) -> Result<Vec<StickyMessageRecord>, Error> {
        sqlx::query("SELECT chat_id, message_id, message FROM sticky_messages;")
            .map(record_from_row)
            .fetch_all(&self.pool)
            .await
    }

    async fn upsert(&self, record: &StickyMessageRecord) -> Result<(), Error> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO sticky_messages(chat_id, message_id, message, updated_at)
            VALUES (?, ?, ?, ?)
        ON CONFLICT DO
            UPDATE SET message_id=?, message=?, updated_at=?;",
        )
        .bind(record.chat_id.0)
        .bind(record.message_id.0)
        .bind(&record.text)
        .bind(now)
        .bind(record.message_id.0)
        .bind(&record.text)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_message_id(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), Error> {
        let result =
            sqlx::query("UPDATE sticky_messages SET message_id=?, updated_at=? WHERE chat_id=?;")
                .bind(message_id.0)
                .bind(Utc::now())
                .bind(chat_id.0)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(Error::RowNotFound);
        }
        Ok(())
    }

    async fn delete(&self, chat_id: ChatId) -> Result<(), Error> {
        sqlx::query("DELETE FROM sticky_messages WHERE chat_id=?;")
            .bind(chat_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
