//! Shared fixtures: a mocked JSONPlaceholder, an in-memory database and an
//! in-process broker.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ub_app::integrations::JsonPlaceholderClient;
use ub_app::{repository, AmqpServer, Container};
use ub_broker::MemoryBroker;
use ub_config::{AppConfig, BrokerDriverKind};

pub fn jsonplaceholder_users() -> Value {
    json!([
        {
            "id": 1,
            "name": "Leanne Graham",
            "username": "Bret",
            "email": "Sincere@april.biz",
            "phone": "1-770-736-8031 x56442"
        },
        {
            "id": 2,
            "name": "Ervin Howell",
            "username": "Antonette",
            "email": "Shanna@melissa.tv"
        },
        {
            "id": 3,
            "name": "Clementine Bauch",
            "username": "Samantha",
            "email": "nathan@yesenia.net"
        }
    ])
}

/// JSONPlaceholder stand-in serving `/users`; `expected` calls are verified on drop
pub async fn mock_json_placeholder(expected: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jsonplaceholder_users()))
        .expect(expected)
        .mount(&server)
        .await;
    server
}

pub fn test_config(json_placeholder_url: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = "sqlite::memory:".to_string();
    config.json_placeholder.base_url = json_placeholder_url.to_string();
    config.json_placeholder.timeout_secs = 5;
    config.http.port = 0;
    config.broker.driver = BrokerDriverKind::Memory;
    config.broker.shutdown_grace_secs = 5;
    config.worker.user_sync_enabled = false;
    config.worker.user_report_enabled = false;
    config.worker.shutdown_grace_secs = 5;
    config
}

/// Started broker topology plus a container built on it
pub async fn build_container(broker: &MemoryBroker, config: &AppConfig) -> (AmqpServer, Arc<Container>) {
    let amqp = AmqpServer::new(Arc::new(broker.clone()), &config.broker);
    amqp.start().await.unwrap();

    let repository = repository::connect(&config.database).await.unwrap();
    let client = JsonPlaceholderClient::new(&config.json_placeholder).unwrap();
    let container = Container::new(
        repository,
        client,
        amqp.home_vhost().unwrap(),
        amqp.work_vhost().unwrap(),
    );
    (amqp, Arc::new(container))
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A port nothing listens on right now
pub fn free_port() -> u16 {
    std::net::TcpListener::bind(("0.0.0.0", 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub fn port_is_free(port: u16) -> bool {
    std::net::TcpListener::bind(("0.0.0.0", port)).is_ok()
}
