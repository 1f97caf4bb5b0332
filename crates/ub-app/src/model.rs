use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a user record was imported from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSource {
    JsonPlaceholder,
}

impl UserSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserSource::JsonPlaceholder => "json_placeholder",
        }
    }
}

impl fmt::Display for UserSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json_placeholder" => Ok(UserSource::JsonPlaceholder),
            other => Err(format!("unknown user source '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    /// Always lower-cased
    pub email_address: String,
    pub source: UserSource,
    pub created_at: DateTime<Utc>,
}

/// A user to insert; the repository assigns id and timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub username: String,
    pub email_address: String,
}

impl NewUser {
    pub fn new(name: impl Into<String>, username: impl Into<String>, email_address: &str) -> Self {
        Self {
            name: name.into(),
            username: username.into(),
            email_address: normalize_email(email_address),
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
