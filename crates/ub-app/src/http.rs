//! HTTP API
//!
//! - `GET  /health`       liveness plus broker channel state
//! - `GET  /users`        every stored user
//! - `GET  /users/:id`    one user, 404 when unknown
//! - `POST /users/fetch`  queue a JSONPlaceholder import (202)

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use ub_config::HttpConfig;

use crate::container::Container;
use crate::error::{AppError, Result};
use crate::model::User;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub home_vhost: bool,
    pub work_vhost: bool,
}

#[derive(Debug, Default, Deserialize)]
struct FetchRequest {
    origin: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchAccepted {
    pub status: String,
    pub origin: String,
}

pub fn router(container: Arc<Container>, body_limit: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/users", get(list_users))
        .route("/users/fetch", post(request_fetch))
        .route("/users/:id", get(get_user))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(container)
}

async fn health(State(container): State<Arc<Container>>) -> (StatusCode, Json<HealthResponse>) {
    let home = container.home_vhost.is_open();
    let work = container.work_vhost.is_open();
    let (status, label) = if home && work {
        (StatusCode::OK, "UP")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "DEGRADED")
    };

    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
            home_vhost: home,
            work_vhost: work,
        }),
    )
}

async fn list_users(State(container): State<Arc<Container>>) -> Result<Json<Vec<User>>> {
    Ok(Json(container.user_service.all().await?))
}

async fn get_user(
    State(container): State<Arc<Container>>,
    Path(id): Path<String>,
) -> Result<Json<User>> {
    Ok(Json(container.user_service.find_by_id(&id).await?))
}

async fn request_fetch(
    State(container): State<Arc<Container>>,
    body: Bytes,
) -> Result<(StatusCode, Json<FetchAccepted>)> {
    let request = if body.is_empty() {
        FetchRequest::default()
    } else {
        serde_json::from_slice::<FetchRequest>(&body)
            .map_err(|e| AppError::invalid_request(format!("invalid JSON body: {}", e)))?
    };
    let origin = request.origin.unwrap_or_else(|| "http".to_string());

    container.user_service.request_fetch(&origin).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(FetchAccepted {
            status: "accepted".to_string(),
            origin,
        }),
    ))
}

/// A running HTTP listener
pub struct HttpServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl HttpServer {
    /// Bind `0.0.0.0:<port>` (port 0 picks a free one) and start serving
    pub async fn start(container: Arc<Container>, config: &HttpConfig) -> Result<Self> {
        let app = router(container, config.body_limit_bytes()?);

        let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
                error!(error = %e, "HTTP server error");
            }
        });

        info!(addr = %addr, "HTTP server listening");
        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for in-flight requests
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            error!(error = %e, "HTTP server task failed");
        }
        info!("HTTP server stopped");
    }
}
