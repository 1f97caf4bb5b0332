//! JSONPlaceholder HTTP client
//!
//! Reads the public `/users` resource and returns typed records.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use ub_config::JsonPlaceholderConfig;

use crate::error::Result;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A user as returned by JSONPlaceholder (extra fields are ignored)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JsonPlaceholderUser {
    pub id: u64,
    pub name: String,
    pub username: String,
    pub email: String,
}

pub struct JsonPlaceholderClient {
    base_url: String,
    client: reqwest::Client,
}

impl JsonPlaceholderClient {
    pub fn new(config: &JsonPlaceholderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get_users(&self) -> Result<Vec<JsonPlaceholderUser>> {
        let url = format!("{}/users", self.base_url);
        debug!(url = %url, "Fetching users from JSONPlaceholder");

        let users = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<JsonPlaceholderUser>>()
            .await?;

        debug!(count = users.len(), "Fetched users from JSONPlaceholder");
        Ok(users)
    }
}
