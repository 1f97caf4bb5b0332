//! Bootstrap in both run modes against the in-process broker

mod common;

use std::sync::Arc;

use ub_app::amqp::USER_CREATED;
use ub_app::{AppError, Application, RunMode, Started};
use ub_broker::{BrokerError, MemoryBroker};
use ub_worker::WorkerState;

use common::{free_port, mock_json_placeholder, port_is_free, test_config, wait_until};
use ub_app::amqp::USER_FETCH_REQUESTED;

fn one_shot(signatures: &[&str]) -> RunMode {
    RunMode::OneShot {
        signatures: signatures.iter().map(|s| s.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_one_shot_sync_users() {
    let upstream = mock_json_placeholder(1).await;
    let broker = MemoryBroker::new();

    let started = Application::new(test_config(&upstream.uri()), Arc::new(broker.clone()))
        .with_mode(one_shot(&["sync-users", "list-users"]))
        .start()
        .await
        .unwrap();

    let Started::OneShot(reports) = started else {
        panic!("expected one-shot result");
    };
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].signature, "sync-users");
    assert_eq!(reports[0].summary, "3 user(s) imported");
    assert_eq!(reports[1].summary, "3 user(s) stored");

    // Consumers never ran, so announcements stay queued
    assert_eq!(broker.queue_stats("home", USER_CREATED).unwrap().ready, 3);
    assert_eq!(broker.open_channels(), 0);
}

#[tokio::test]
async fn test_one_shot_never_serves_http_or_runs_jobs() {
    let upstream = mock_json_placeholder(0).await;
    let broker = MemoryBroker::new();
    let port = free_port();
    let mut config = test_config(&upstream.uri());
    config.http.port = port;
    config.worker.user_sync_enabled = true;
    config.worker.user_sync_cron = "* * * * * *".to_string();

    let started = Application::new(config, Arc::new(broker.clone()))
        .with_mode(one_shot(&["list-users"]))
        .start()
        .await
        .unwrap();
    assert!(matches!(started, Started::OneShot(_)));
    assert!(port_is_free(port));

    // An every-second sync job would have queued a fetch request by now
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    assert_eq!(broker.queue_stats("work", USER_FETCH_REQUESTED).unwrap().published, 0);
    assert_eq!(broker.open_channels(), 0);
}

#[tokio::test]
async fn test_one_shot_unknown_command_acquires_nothing() {
    let upstream = mock_json_placeholder(0).await;
    let broker = MemoryBroker::new();

    let err = Application::new(test_config(&upstream.uri()), Arc::new(broker.clone()))
        .with_mode(one_shot(&["sync-users", "drop-everything"]))
        .start()
        .await
        .err()
        .unwrap();

    assert!(matches!(err, AppError::UnknownCommand(ref s) if s == "drop-everything"));
    assert_eq!(broker.open_channels(), 0);
    assert!(broker.queue_stats("home", USER_CREATED).is_none());
}

#[tokio::test]
async fn test_one_shot_without_commands() {
    let upstream = mock_json_placeholder(0).await;
    let broker = MemoryBroker::new();

    let started = Application::new(test_config(&upstream.uri()), Arc::new(broker.clone()))
        .with_mode(RunMode::from_bash(Some(vec![])))
        .start()
        .await
        .unwrap();

    assert!(matches!(started, Started::OneShot(ref reports) if reports.is_empty()));
    assert_eq!(broker.open_channels(), 0);
}

#[tokio::test]
async fn test_unreachable_broker_fails_startup() {
    let upstream = mock_json_placeholder(0).await;
    let broker = MemoryBroker::new().unreachable();
    let port = free_port();
    let mut config = test_config(&upstream.uri());
    config.http.port = port;

    let err = Application::new(config, Arc::new(broker.clone()))
        .start()
        .await
        .err()
        .unwrap();

    assert!(matches!(err, AppError::Broker(BrokerError::Connection { .. })));
    assert!(port_is_free(port));
    assert_eq!(broker.open_channels(), 0);
}

#[tokio::test]
async fn test_refused_vhost_fails_startup() {
    let upstream = mock_json_placeholder(0).await;
    let broker = MemoryBroker::new().refuse_vhost("work");

    let err = Application::new(test_config(&upstream.uri()), Arc::new(broker.clone()))
        .start()
        .await
        .err()
        .unwrap();

    assert!(matches!(err, AppError::Broker(BrokerError::Topology { ref vhost, .. }) if vhost == "work"));
    assert_eq!(broker.open_channels(), 0);
}

#[tokio::test]
async fn test_database_failure_releases_broker() {
    let upstream = mock_json_placeholder(0).await;
    let broker = MemoryBroker::new();
    let mut config = test_config(&upstream.uri());
    config.database.url = "sqlite:/nonexistent-userbridge-dir/users.db".to_string();

    let err = Application::new(config, Arc::new(broker.clone()))
        .start()
        .await
        .err()
        .unwrap();

    assert!(matches!(err, AppError::Connection { .. }));
    assert_eq!(broker.open_channels(), 0);
}

#[tokio::test]
async fn test_service_imports_users_end_to_end() {
    let upstream = mock_json_placeholder(1).await;
    let broker = MemoryBroker::new();

    let started = Application::new(test_config(&upstream.uri()), Arc::new(broker.clone()))
        .start()
        .await
        .unwrap();
    let Started::Service(running) = started else {
        panic!("expected service mode");
    };
    assert_eq!(running.jobs_count(), 0);
    assert_eq!(running.worker_state(), WorkerState::Running);

    let response = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/users/fetch", running.http_port()))
        .json(&serde_json::json!({ "origin": "test" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    wait_until(|| {
        broker
            .queue_stats("home", USER_CREATED)
            .map(|stats| stats.acked == 3)
            .unwrap_or(false)
    })
    .await;
    assert_eq!(running.container().user_service.count().await.unwrap(), 3);

    let users: Vec<serde_json::Value> = reqwest::get(format!("http://127.0.0.1:{}/users", running.http_port()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(users.len(), 3);

    running.shutdown().await;
    assert_eq!(broker.open_channels(), 0);
}

#[tokio::test]
async fn test_service_schedules_enabled_jobs() {
    let upstream = mock_json_placeholder(0).await;
    let broker = MemoryBroker::new();
    let mut config = test_config(&upstream.uri());
    config.worker.user_sync_enabled = true;
    config.worker.user_report_enabled = true;

    let started = Application::new(config, Arc::new(broker.clone())).start().await.unwrap();
    let Started::Service(running) = started else {
        panic!("expected service mode");
    };

    assert_eq!(running.jobs_count(), 2);
    assert_eq!(running.worker_state(), WorkerState::Running);

    running.shutdown().await;
    assert_eq!(broker.open_channels(), 0);
}
