use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::{build_in_clause, user_from_columns, UserRepository, USER_COLUMNS};
use crate::error::Result;
use crate::model::{NewUser, User, UserSource};

pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                username TEXT NOT NULL,
                email_address TEXT NOT NULL,
                source TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                announced_at INTEGER,
                UNIQUE (email_address, source)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn map_row(row: &SqliteRow) -> std::result::Result<User, sqlx::Error> {
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
impl UserRepository for SqliteUserRepository {
    fn backend(&self) -> &'static str {
        "sqlite"
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

        let query = format!(
            "SELECT email_address FROM users WHERE source = ? AND email_address IN ({})",
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
        debug!(inserted = inserted.len(), source = %source, "Users synchronized (SQLite)");
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

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn repository() -> SqliteUserRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repository = SqliteUserRepository::new(pool);
        repository.init_schema().await.unwrap();
        repository
    }

    #[tokio::test]
    async fn test_insert_missing_skips_known_emails() {
        let repo = repository().await;

        let first = repo
            .insert_missing(
                UserSource::JsonPlaceholder,
                vec![
                    NewUser::new("Leanne Graham", "Bret", "Sincere@april.biz"),
                    NewUser::new("Ervin Howell", "Antonette", "Shanna@melissa.tv"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        let second = repo
            .insert_missing(
                UserSource::JsonPlaceholder,
                vec![
                    NewUser::new("Leanne Graham", "Bret", "SINCERE@april.biz"),
                    NewUser::new("Clementine Bauch", "Samantha", "Nathan@yesenia.net"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(repo.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_duplicates_within_one_batch_inserted_once() {
        let repo = repository().await;
        let ids = repo
            .insert_missing(
                UserSource::JsonPlaceholder,
                vec![
                    NewUser::new("A", "a", "same@example.com"),
                    NewUser::new("B", "b", "Same@Example.com"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn test_find_by_id_and_all() {
        let repo = repository().await;
        let ids = repo
            .insert_missing(
                UserSource::JsonPlaceholder,
                vec![NewUser::new("Leanne Graham", "Bret", "Sincere@april.biz")],
            )
            .await
            .unwrap();

        let user = repo.find_by_id(ids[0]).await.unwrap().unwrap();
        assert_eq!(user.username, "Bret");
        assert_eq!(user.email_address, "sincere@april.biz");
        assert_eq!(user.source, UserSource::JsonPlaceholder);

        assert!(repo.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
        assert_eq!(repo.all().await.unwrap(), vec![user]);
    }

    #[tokio::test]
    async fn test_unannounced_until_marked() {
        let repo = repository().await;
        let ids = repo
            .insert_missing(
                UserSource::JsonPlaceholder,
                vec![
                    NewUser::new("Leanne Graham", "Bret", "Sincere@april.biz"),
                    NewUser::new("Ervin Howell", "Antonette", "Shanna@melissa.tv"),
                ],
            )
            .await
            .unwrap();

        let pending = repo.unannounced(UserSource::JsonPlaceholder).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|id| ids.contains(id)));

        repo.mark_announced(ids[0]).await.unwrap();
        assert_eq!(
            repo.unannounced(UserSource::JsonPlaceholder).await.unwrap(),
            vec![ids[1]]
        );
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let repo = repository().await;
        assert!(repo
            .insert_missing(UserSource::JsonPlaceholder, Vec::new())
            .await
            .unwrap()
            .is_empty());
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
