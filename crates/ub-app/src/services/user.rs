use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::amqp::Producers;
use crate::error::{AppError, Result};
use crate::integrations::JsonPlaceholderClient;
use crate::model::{NewUser, User, UserSource};
use crate::repository::UserRepository;

pub struct UserService {
    repository: Arc<dyn UserRepository>,
    json_placeholder: Arc<JsonPlaceholderClient>,
    producers: Producers,
}

impl UserService {
    pub fn new(
        repository: Arc<dyn UserRepository>,
        json_placeholder: Arc<JsonPlaceholderClient>,
        producers: Producers,
    ) -> Self {
        Self {
            repository,
            json_placeholder,
            producers,
        }
    }

    pub async fn all(&self) -> Result<Vec<User>> {
        self.repository.all().await
    }

    /// Ids that are not valid UUIDs cannot exist, so they are reported as not found
    pub async fn find_by_id(&self, id: &str) -> Result<User> {
        let uuid = Uuid::parse_str(id).map_err(|_| AppError::not_found("User", id))?;
        self.repository
            .find_by_id(uuid)
            .await?
            .ok_or_else(|| AppError::not_found("User", id))
    }

    pub async fn count(&self) -> Result<u64> {
        self.repository.count().await
    }

    /// Import every JSONPlaceholder user not stored yet; returns the new ids
    pub async fn fetch_from_json_placeholder(&self) -> Result<Vec<Uuid>> {
        let fetched = self.json_placeholder.get_users().await?;
        let total = fetched.len();

        let users: Vec<NewUser> = fetched
            .into_iter()
            .map(|u| NewUser::new(u.name, u.username, &u.email))
            .collect();

        let ids = self
            .repository
            .insert_missing(UserSource::JsonPlaceholder, users)
            .await?;

        info!(
            fetched = total,
            inserted = ids.len(),
            backend = self.repository.backend(),
            "Users imported from JSONPlaceholder"
        );
        Ok(ids)
    }

    /// Publish `user.created` for every stored user not announced yet.
    ///
    /// A user is marked only after its event is published, so a failed run
    /// leaves the rest pending for the next call.
    pub async fn announce_pending(&self) -> Result<Vec<Uuid>> {
        let pending = self.repository.unannounced(UserSource::JsonPlaceholder).await?;
        for id in &pending {
            self.producers.user_created(*id).await?;
            self.repository.mark_announced(*id).await?;
        }
        if !pending.is_empty() {
            info!(announced = pending.len(), "User creations announced");
        }
        Ok(pending)
    }

    /// Ask the worker side to run an import
    pub async fn request_fetch(&self, origin: &str) -> Result<()> {
        self.producers.fetch_requested(origin).await?;
        info!(origin = %origin, "User fetch requested");
        Ok(())
    }
}
