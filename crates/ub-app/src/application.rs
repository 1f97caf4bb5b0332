//! Application bootstrap
//!
//! Startup order is strict: broker → database and container → consumers →
//! worker → HTTP. One-shot mode stops after the container and runs admin
//! commands instead.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use ub_broker::BrokerDriver;
use ub_config::AppConfig;
use ub_worker::{Worker, WorkerState};

use crate::amqp::AmqpServer;
use crate::commands::{self, CommandReport};
use crate::container::Container;
use crate::error::Result;
use crate::http::HttpServer;
use crate::integrations::JsonPlaceholderClient;
use crate::jobs::build_jobs;
use crate::repository;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Long-running: consumers, worker and HTTP
    Service,
    /// Run the given admin commands and exit
    OneShot { signatures: Vec<String> },
}

impl RunMode {
    /// `None` when `--bash` was not given; otherwise the signatures after it
    pub fn from_bash(signatures: Option<Vec<String>>) -> Self {
        match signatures {
            Some(signatures) => RunMode::OneShot { signatures },
            None => RunMode::Service,
        }
    }
}

pub struct Application {
    config: AppConfig,
    driver: Arc<dyn BrokerDriver>,
    mode: RunMode,
}

/// What `start` produced
pub enum Started {
    Service(RunningApplication),
    OneShot(Vec<CommandReport>),
}

impl Application {
    pub fn new(config: AppConfig, driver: Arc<dyn BrokerDriver>) -> Self {
        Self {
            config,
            driver,
            mode: RunMode::Service,
        }
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> &RunMode {
        &self.mode
    }

    pub async fn start(self) -> Result<Started> {
        // Unknown signatures fail before any resource is acquired
        let admin = match &self.mode {
            RunMode::Service => None,
            RunMode::OneShot { signatures } => Some(commands::parse_signatures(signatures)?),
        };

        let amqp = AmqpServer::new(self.driver.clone(), &self.config.broker);
        amqp.start().await?;
        info!(driver = self.driver.name(), "AMQP server started");

        let container = match self.build_container(&amqp).await {
            Ok(container) => Arc::new(container),
            Err(e) => {
                amqp.stop().await;
                return Err(e);
            }
        };

        match admin {
            Some(admin) => {
                let result = commands::execute(&container, &admin).await;
                amqp.stop().await;
                result.map(Started::OneShot)
            }
            None => self.start_service(amqp, container).await.map(Started::Service),
        }
    }

    async fn build_container(&self, amqp: &AmqpServer) -> Result<Container> {
        let repository = repository::connect(&self.config.database).await?;
        let json_placeholder = JsonPlaceholderClient::new(&self.config.json_placeholder)?;
        Ok(Container::new(
            repository,
            json_placeholder,
            amqp.home_vhost()?,
            amqp.work_vhost()?,
        ))
    }

    async fn start_service(self, amqp: AmqpServer, container: Arc<Container>) -> Result<RunningApplication> {
        let consumers = match amqp.start_all_consumers(container.clone()).await {
            Ok(started) => started,
            Err(e) => {
                amqp.stop().await;
                return Err(e);
            }
        };
        info!(consumers, "Consumers started");

        let worker = match build_jobs(&self.config.worker) {
            Ok(jobs) => Worker::new(container.clone(), jobs)
                .with_shutdown_grace(Duration::from_secs(self.config.worker.shutdown_grace_secs)),
            Err(e) => {
                amqp.stop().await;
                return Err(e);
            }
        };
        if let Err(e) = worker.start() {
            amqp.stop().await;
            return Err(e.into());
        }
        info!("Worker started with {} job(s)", worker.jobs_count());

        let http = match HttpServer::start(container.clone(), &self.config.http).await {
            Ok(http) => http,
            Err(e) => {
                error!(error = %e, "HTTP server failed to start");
                worker.stop().await;
                amqp.stop().await;
                return Err(e);
            }
        };
        info!("Http server started in port {}", http.port());

        Ok(RunningApplication {
            amqp,
            worker,
            http,
            container,
        })
    }
}

/// Handles of a started service
pub struct RunningApplication {
    amqp: AmqpServer,
    worker: Worker<Container>,
    http: HttpServer,
    container: Arc<Container>,
}

impl RunningApplication {
    pub fn http_port(&self) -> u16 {
        self.http.port()
    }

    pub fn jobs_count(&self) -> usize {
        self.worker.jobs_count()
    }

    pub fn worker_state(&self) -> WorkerState {
        self.worker.state()
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn amqp(&self) -> &AmqpServer {
        &self.amqp
    }

    /// Reverse of startup: HTTP, worker, then broker
    pub async fn shutdown(self) {
        info!("Shutting down");
        self.http.shutdown().await;
        self.worker.stop().await;
        self.amqp.stop().await;
        info!("Shutdown complete");
    }
}
