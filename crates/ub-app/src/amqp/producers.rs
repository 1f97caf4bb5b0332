use std::sync::Arc;

use uuid::Uuid;

use ub_broker::{Payload, Producer, VirtualHost};

use super::messages::{FetchUsersRequested, UserCreated, USER_CREATED, USER_FETCH_REQUESTED};
use crate::error::Result;

/// Typed producers for every queue the application publishes to
#[derive(Debug, Clone)]
pub struct Producers {
    fetch_requested: Producer,
    user_created: Producer,
}

impl Producers {
    pub fn new(home: Arc<VirtualHost>, work: Arc<VirtualHost>) -> Self {
        Self {
            fetch_requested: Producer::new(work, USER_FETCH_REQUESTED),
            user_created: Producer::new(home, USER_CREATED),
        }
    }

    pub async fn fetch_requested(&self, origin: &str) -> Result<()> {
        let message = FetchUsersRequested::new(origin);
        self.fetch_requested
            .publish(Payload::structured(&message))
            .await?;
        Ok(())
    }

    pub async fn user_created(&self, user_id: Uuid) -> Result<()> {
        self.user_created
            .publish(Payload::structured(&UserCreated { user_id }))
            .await?;
        Ok(())
    }
}
