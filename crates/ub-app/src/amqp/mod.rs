//! Application broker topology
//!
//! Two virtual hosts: `home` carries domain events, `work` carries requests
//! for background work. Names come from configuration.

use std::sync::Arc;
use std::time::Duration;

use ub_broker::{BrokerConfig, BrokerDriver, BrokerServer, VirtualHost};
use ub_config::BrokerSettings;

use crate::container::Container;
use crate::error::Result;

pub mod consumers;
pub mod messages;
pub mod producers;

pub use consumers::{FetchUsersConsumer, UserCreatedConsumer};
pub use messages::{FetchUsersRequested, UserCreated, USER_CREATED, USER_FETCH_REQUESTED};
pub use producers::Producers;

pub struct AmqpServer {
    server: BrokerServer<Container>,
    home: String,
    work: String,
}

impl AmqpServer {
    pub fn new(driver: Arc<dyn BrokerDriver>, settings: &BrokerSettings) -> Self {
        let config = BrokerConfig::new(
            &settings.protocol,
            &settings.host,
            settings.port,
            &settings.username,
            &settings.password,
        );

        let mut server = BrokerServer::new(driver, config)
            .with_prefetch(settings.prefetch)
            .with_shutdown_grace(Duration::from_secs(settings.shutdown_grace_secs));

        server
            .add_vhost(&settings.home_vhost)
            .add_vhost(&settings.work_vhost)
            .declare_queue(&settings.home_vhost, USER_CREATED)
            .declare_queue(&settings.work_vhost, USER_FETCH_REQUESTED)
            .register_consumer(Arc::new(FetchUsersConsumer::new(&settings.work_vhost)))
            .register_consumer(Arc::new(UserCreatedConsumer::new(&settings.home_vhost)));

        Self {
            server,
            home: settings.home_vhost.clone(),
            work: settings.work_vhost.clone(),
        }
    }

    pub async fn start(&self) -> Result<()> {
        self.server.start().await?;
        Ok(())
    }

    pub fn home_vhost(&self) -> Result<Arc<VirtualHost>> {
        Ok(self.server.vhost(&self.home)?)
    }

    pub fn work_vhost(&self) -> Result<Arc<VirtualHost>> {
        Ok(self.server.vhost(&self.work)?)
    }

    pub async fn start_all_consumers(&self, container: Arc<Container>) -> Result<usize> {
        Ok(self.server.start_all_consumers(container).await?)
    }

    pub async fn stop(&self) {
        self.server.stop().await;
    }

    pub fn server(&self) -> &BrokerServer<Container> {
        &self.server
    }
}
