//! User persistence
//!
//! Two backends share one trait: MySQL for production, SQLite for local
//! development and tests. The backend is picked from the database URL scheme.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;
use uuid::Uuid;

use ub_config::{ConfigError, DatabaseConfig};

use crate::error::{AppError, Result};
use crate::model::{NewUser, User, UserSource};

pub mod mysql;
pub mod sqlite;

pub use mysql::MySqlUserRepository;
pub use sqlite::SqliteUserRepository;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Backend name for logs
    fn backend(&self) -> &'static str;

    async fn all(&self) -> Result<Vec<User>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    async fn count(&self) -> Result<u64>;

    /// Insert, in a single transaction, every user whose
    /// (email_address, source) pair is not stored yet. Returns the new ids.
    async fn insert_missing(&self, source: UserSource, users: Vec<NewUser>) -> Result<Vec<Uuid>>;

    /// Ids of stored users whose `user.created` event has not been published,
    /// oldest first
    async fn unannounced(&self, source: UserSource) -> Result<Vec<Uuid>>;

    async fn mark_announced(&self, id: Uuid) -> Result<()>;
}

/// Connect to the configured database and make sure the schema exists
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn UserRepository>> {
    let target = redact_url(&config.url);
    let timeout = Duration::from_secs(config.connect_timeout_secs);

    if config.url.starts_with("sqlite:") {
        let in_memory = config.url.contains(":memory:") || config.url.contains("mode=memory");
        // Every connection to an in-memory database is a separate database
        let max_connections = if in_memory { 1 } else { config.max_connections };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(timeout)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::connection(&target, e))?;

        let repository = SqliteUserRepository::new(pool);
        repository.init_schema().await?;
        info!(target = %target, "Using SQLite user repository");
        Ok(Arc::new(repository))
    } else if config.url.starts_with("mysql:") {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(timeout)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::connection(&target, e))?;

        let repository = MySqlUserRepository::new(pool);
        repository.init_schema().await?;
        info!(target = %target, "Using MySQL user repository");
        Ok(Arc::new(repository))
    } else {
        Err(ConfigError::invalid("database.url", format!("unsupported database URL '{}'", target)).into())
    }
}

/// Drop the userinfo part of a URL
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

/// Build a query with the appropriate number of placeholders for IN clause
pub(crate) fn build_in_clause(count: usize) -> String {
    let placeholders: Vec<&str> = (0..count).map(|_| "?").collect();
    placeholders.join(", ")
}

pub(crate) const USER_COLUMNS: &str = "id, name, username, email_address, source, created_at";

/// Assemble a user from raw column values
pub(crate) fn user_from_columns(
    id: String,
    name: String,
    username: String,
    email_address: String,
    source: String,
    created_at: i64,
) -> std::result::Result<User, sqlx::Error> {
    let id = Uuid::parse_str(&id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let source = source.parse::<UserSource>().map_err(|e| sqlx::Error::Decode(e.into()))?;
    let created_at = DateTime::<Utc>::from_timestamp_millis(created_at)
        .ok_or_else(|| sqlx::Error::Decode("invalid created_at timestamp".into()))?;

    Ok(User {
        id,
        name,
        username,
        email_address,
        source,
        created_at,
    })
}
