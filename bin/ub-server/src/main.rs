//! UserBridge server
//!
//! Without arguments it runs as a service: broker consumers, scheduled jobs
//! and the HTTP API until Ctrl+C or SIGTERM.
//!
//! `ub-server --bash <signature>...` starts the broker and database only,
//! runs the named admin commands in order and exits.
//!
//! ## Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `UB_CONFIG` | Path to a TOML config file |
//! | `UB_HTTP_PORT` | HTTP listen port |
//! | `UB_DATABASE_URL` | `mysql://...` or `sqlite:...` |
//! | `UB_BROKER_DRIVER` | `amqp` or `memory` |
//! | `UB_RABBITMQ_HOST` / `UB_RABBITMQ_PORT` | Broker address |
//! | `UB_LOG_LEVEL` / `UB_LOG_FORMAT` | Tracing filter and `pretty`/`json` |
//! | `RUST_LOG` | Overrides the configured log level |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use ub_app::{Application, RunMode, Started};
use ub_broker::{AmqpDriver, BrokerDriver, MemoryBroker};
use ub_common::shutdown_signal;
use ub_config::{AppConfig, BrokerDriverKind};

#[derive(Parser, Debug)]
#[command(name = "ub-server", version, about = "UserBridge server")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "UB_CONFIG")]
    config: Option<PathBuf>,

    /// Run admin commands and exit instead of serving
    #[arg(long = "bash", num_args = 0.., value_name = "SIGNATURE")]
    bash: Option<Vec<String>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref())?;
    ub_common::init_tracing(&config.logging.level, config.logging.format)
        .map_err(|e| anyhow::anyhow!("failed to initialise tracing: {}", e))?;

    let mode = RunMode::from_bash(args.bash);

    let driver: Arc<dyn BrokerDriver> = match config.broker.driver {
        BrokerDriverKind::Amqp => Arc::new(AmqpDriver::new().with_connection_name("ub-server")),
        BrokerDriverKind::Memory => Arc::new(MemoryBroker::new()),
    };

    info!(
        driver = driver.name(),
        home_vhost = %config.broker.home_vhost,
        work_vhost = %config.broker.work_vhost,
        one_shot = matches!(mode, RunMode::OneShot { .. }),
        "Starting UserBridge"
    );

    let started = match Application::new(config, driver).with_mode(mode).start().await {
        Ok(started) => started,
        Err(e) => {
            error!(error = %e, "Startup failed");
            return Err(e.into());
        }
    };

    match started {
        Started::OneShot(reports) => {
            for report in &reports {
                info!(command = report.signature, "{}", report.summary);
            }
            info!(commands = reports.len(), "Admin commands finished");
        }
        Started::Service(running) => {
            info!(port = running.http_port(), "UserBridge running");
            shutdown_signal().await;
            running.shutdown().await;
        }
    }

    Ok(())
}
