//! UserBridge broker layer
//!
//! Virtual hosts, producers and consumers on top of a pluggable driver:
//! - [`AmqpDriver`]: RabbitMQ over AMQP 0.9.1 (feature `amqp`)
//! - [`MemoryBroker`]: in-process broker for development and tests

pub mod codec;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod driver;
pub mod error;
pub mod memory;
pub mod producer;
pub mod registry;
pub mod server;
pub mod vhost;

#[cfg(feature = "amqp")]
pub mod amqp;

pub use codec::{encode, Payload};
pub use config::{BrokerConfig, Credentials};
pub use connection::{ConnectionManager, Topology};
pub use consumer::{decode_json, Consumer, ConsumerStats, HandlerError};
pub use driver::{Acknowledger, BrokerDriver, Delivery, DeliveryStream, VHostChannel};
pub use error::{BrokerError, Result};
pub use memory::{MemoryBroker, QueueStats};
pub use producer::Producer;
pub use registry::VirtualHostRegistry;
pub use server::{BrokerServer, DEFAULT_PREFETCH, DEFAULT_SHUTDOWN_GRACE};
pub use vhost::VirtualHost;

#[cfg(feature = "amqp")]
pub use amqp::AmqpDriver;
