use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Work vhost: ask for a JSONPlaceholder import
pub const USER_FETCH_REQUESTED: &str = "user.fetch-requested";

/// Home vhost: a user was imported
pub const USER_CREATED: &str = "user.created";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchUsersRequested {
    /// Who asked (`http`, `user-sync`, `admin`)
    pub origin: String,
    pub requested_at: DateTime<Utc>,
}

impl FetchUsersRequested {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            requested_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreated {
    pub user_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_created_wire_format() {
        let id = Uuid::new_v4();
        let value = serde_json::to_value(UserCreated { user_id: id }).unwrap();
        assert_eq!(value, serde_json::json!({ "userId": id.to_string() }));
    }

    #[test]
    fn test_fetch_requested_wire_format() {
        let message: FetchUsersRequested =
            serde_json::from_str(r#"{"origin":"user-sync","requestedAt":"2024-03-01T10:00:00Z"}"#).unwrap();
        assert_eq!(message.origin, "user-sync");
        assert!(serde_json::to_string(&message).unwrap().contains("requestedAt"));
    }
}
