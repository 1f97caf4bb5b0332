use async_trait::async_trait;
use tracing::info;

use ub_broker::{decode_json, Consumer, HandlerError};

use super::messages::{FetchUsersRequested, UserCreated, USER_CREATED, USER_FETCH_REQUESTED};
use crate::container::Container;
use crate::error::AppError;

fn classify(err: AppError) -> HandlerError {
    if err.is_transient() {
        HandlerError::recoverable(err)
    } else {
        HandlerError::unrecoverable(err)
    }
}

/// Runs a JSONPlaceholder import and announces every new user
pub struct FetchUsersConsumer {
    vhost: String,
}

impl FetchUsersConsumer {
    pub fn new(work_vhost: impl Into<String>) -> Self {
        Self {
            vhost: work_vhost.into(),
        }
    }
}

#[async_trait]
impl Consumer<Container> for FetchUsersConsumer {
    fn name(&self) -> &str {
        "fetch-users"
    }

    fn vhost(&self) -> &str {
        &self.vhost
    }

    fn source(&self) -> &str {
        USER_FETCH_REQUESTED
    }

    async fn handle(&self, body: &[u8], container: &Container) -> Result<(), HandlerError> {
        let request: FetchUsersRequested = decode_json(body)?;

        let ids = container
            .user_service
            .fetch_from_json_placeholder()
            .await
            .map_err(classify)?;

        let announced = container
            .user_service
            .announce_pending()
            .await
            .map_err(classify)?;

        info!(
            origin = %request.origin,
            created = ids.len(),
            announced = announced.len(),
            "Fetch request handled"
        );
        Ok(())
    }
}

/// Logs every imported user
pub struct UserCreatedConsumer {
    vhost: String,
}

impl UserCreatedConsumer {
    pub fn new(home_vhost: impl Into<String>) -> Self {
        Self {
            vhost: home_vhost.into(),
        }
    }
}

#[async_trait]
impl Consumer<Container> for UserCreatedConsumer {
    fn name(&self) -> &str {
        "user-created"
    }

    fn vhost(&self) -> &str {
        &self.vhost
    }

    fn source(&self) -> &str {
        USER_CREATED
    }

    async fn handle(&self, body: &[u8], container: &Container) -> Result<(), HandlerError> {
        let event: UserCreated = decode_json(body)?;

        let user = container
            .user_service
            .find_by_id(&event.user_id.to_string())
            .await
            .map_err(classify)?;

        info!(
            user_id = %user.id,
            username = %user.username,
            source = %user.source,
            "User imported"
        );
        Ok(())
    }
}
