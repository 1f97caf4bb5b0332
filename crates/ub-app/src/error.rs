//! Application Error Types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use ub_broker::BrokerError;
use ub_config::ConfigError;
use ub_worker::WorkerError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Cannot connect to {target}: {message}")]
    Connection { target: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn connection(target: impl Into<String>, message: impl ToString) -> Self {
        Self::Connection {
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Io(_) => true,
            // Bodies that fail to decode and 4xx replies repeat on every retry
            Self::Upstream(e) => {
                !e.is_decode()
                    && !e.status().is_some_and(|status| {
                        status.is_client_error()
                            && status != reqwest::StatusCode::REQUEST_TIMEOUT
                            && status != reqwest::StatusCode::TOO_MANY_REQUESTS
                    })
            }
            Self::Database(e) => !matches!(
                e,
                sqlx::Error::RowNotFound
                    | sqlx::Error::ColumnDecode { .. }
                    | sqlx::Error::ColumnNotFound(_)
                    | sqlx::Error::Decode(_)
                    | sqlx::Error::TypeNotFound { .. }
            ),
            Self::Broker(e) => matches!(e, BrokerError::Connection { .. } | BrokerError::Publish { .. }),
            Self::NotFound { .. }
            | Self::Worker(_)
            | Self::UnknownCommand(_)
            | Self::InvalidRequest { .. }
            | Self::Config(_) => false,
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::InvalidRequest { .. } | Self::UnknownCommand(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Upstream(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            Self::Broker(_) | Self::Connection { .. } => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Standard API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if status.is_server_error() {
            error!(error = %self, "Request failed");
            // Internal details stay in the logs
            status
                .canonical_reason()
                .unwrap_or("Internal error")
                .to_string()
        } else {
            self.to_string()
        };

        let body = ApiError {
            error: code.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
