use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};
use tracing::debug;
use uuid::Uuid;

use super::{build_in_clause, user_from_columns, UserRepository, USER_COLUMNS};
use crate::error::Result;
use crate::model::{NewUser, User, UserSource};

pub struct MySqlUserRepository {
    pool: MySqlPool,
}

impl MySqlUserRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id CHAR(36) PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                username VARCHAR(255) NOT NULL,
                email_address VARCHAR(255) NOT NULL,
                source VARCHAR(50) NOT NULL,
                created_at BIGINT NOT NULL,
                announced_at BIGINT NULL,
                UNIQUE KEY uq_users_email_source (email_address, source)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn map_row(row: &MySqlRow) -> std::result::Result<User, sqlx::Error> {
    user_from_columns(
        row.try_get("id")?,
        row.try_get("name")?,
        row.try_get("username")?,
        row.try_get("email_address")?,
        row.try_get("source")?,
        row.try_get("created_at")?,
    )
}

#[async_trait]
impl UserRepository for MySqlUserRepository {
    fn backend(&self) -> &'static str {
        "mysql"
    }

    async fn all(&self) -> Result<Vec<User>> {
        let query = format!(
            "SELECT {} FROM users ORDER BY created_at, username",
            USER_COLUMNS
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        let users = rows.iter().map(map_row).collect::<std::result::Result<_, _>>()?;
        Ok(users)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let query = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(map_row).transpose()?)
    }

    async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM users")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count.max(0) as u64)
    }

    async fn insert_missing(&self, source: UserSource, users: Vec<NewUser>) -> Result<Vec<Uuid>> {
        if users.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;

        // MySQL doesn't support ANY(), so we build the IN clause manually
        let query = format!(
            "SELECT email_address FROM users WHERE source = ? AND email_address IN ({}) FOR UPDATE",
            build_in_clause(users.len())
        );
        let mut q = sqlx::query(&query).bind(source.as_str());
        for user in &users {
            q = q.bind(user.email_address.as_str());
        }
        let mut known: HashSet<String> = q
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| row.try_get("email_address"))
            .collect::<std::result::Result<_, _>>()?;

        let now = Utc::now().timestamp_millis();
        let mut inserted = Vec::new();
        for user in users {
            if !known.insert(user.email_address.clone()) {
                continue;
            }
            let id = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO users (id, name, username, email_address, source, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(id.to_string())
            .bind(&user.name)
            .bind(&user.username)
            .bind(&user.email_address)
            .bind(source.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
            inserted.push(id);
        }

        tx.commit().await?;
        debug!(inserted = inserted.len(), source = %source, "Users synchronized (MySQL)");
        Ok(inserted)
    }

    async fn unannounced(&self, source: UserSource) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT id FROM users WHERE source = ? AND announced_at IS NULL ORDER BY created_at, username",
        )
        .bind(source.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Uuid> {
                let id: String = row.try_get("id")?;
                Uuid::parse_str(&id).map_err(|e| sqlx::Error::Decode(Box::new(e)).into())
            })
            .collect()
    }

    async fn mark_announced(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE users SET announced_at = ? WHERE id = ?")
            .bind(Utc::now().timestamp_millis())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
