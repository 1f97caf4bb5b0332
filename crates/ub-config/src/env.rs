//! `UB_*` environment overrides

use std::str::FromStr;

use tracing::debug;

use crate::{AppConfig, BrokerDriverKind, ConfigError, Result};
use ub_common::LogFormat;

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("cannot parse '{}'", raw)))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, format!("'{}' is not a boolean", raw))),
    }
}

impl AppConfig {
    /// Apply overrides using `lookup` to resolve variable names
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            let value = lookup(key);
            if value.is_some() {
                debug!(key = key, "Applying environment override");
            }
            value
        };

        if let Some(v) = get("UB_HTTP_PORT") {
            self.http.port = parse("UB_HTTP_PORT", &v)?;
        }
        if let Some(v) = get("UB_HTTP_BODY_LIMIT") {
            self.http.body_limit = v;
        }

        if let Some(v) = get("UB_DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = get("UB_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse("UB_DATABASE_MAX_CONNECTIONS", &v)?;
        }

        if let Some(v) = get("UB_JSON_PLACEHOLDER_URL") {
            self.json_placeholder.base_url = v;
        }

        if let Some(v) = get("UB_BROKER_DRIVER") {
            self.broker.driver = match v.trim().to_ascii_lowercase().as_str() {
                "amqp" => BrokerDriverKind::Amqp,
                "memory" => BrokerDriverKind::Memory,
                _ => {
                    return Err(ConfigError::invalid(
                        "UB_BROKER_DRIVER",
                        format!("'{}' is not amqp or memory", v),
                    ))
                }
            };
        }
        if let Some(v) = get("UB_RABBITMQ_PROTOCOL") {
            self.broker.protocol = v;
        }
        if let Some(v) = get("UB_RABBITMQ_HOST") {
            self.broker.host = v;
        }
        if let Some(v) = get("UB_RABBITMQ_PORT") {
            self.broker.port = parse("UB_RABBITMQ_PORT", &v)?;
        }
        if let Some(v) = get("UB_RABBITMQ_USERNAME") {
            self.broker.username = v;
        }
        if let Some(v) = get("UB_RABBITMQ_PASSWORD") {
            self.broker.password = v;
        }
        if let Some(v) = get("UB_RABBITMQ_HOME_VHOST") {
            self.broker.home_vhost = v;
        }
        if let Some(v) = get("UB_RABBITMQ_WORK_VHOST") {
            self.broker.work_vhost = v;
        }

        if let Some(v) = get("UB_USER_SYNC_ENABLED") {
            self.worker.user_sync_enabled = parse_bool("UB_USER_SYNC_ENABLED", &v)?;
        }
        if let Some(v) = get("UB_USER_SYNC_CRON") {
            self.worker.user_sync_cron = v;
        }
        if let Some(v) = get("UB_USER_REPORT_ENABLED") {
            self.worker.user_report_enabled = parse_bool("UB_USER_REPORT_ENABLED", &v)?;
        }
        if let Some(v) = get("UB_USER_REPORT_INTERVAL_SECS") {
            self.worker.user_report_interval_secs = parse("UB_USER_REPORT_INTERVAL_SECS", &v)?;
        }

        if let Some(v) = get("UB_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = get("UB_LOG_FORMAT") {
            self.logging.format = match v.trim().to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" | "text" => LogFormat::Pretty,
                _ => {
                    return Err(ConfigError::invalid(
                        "UB_LOG_FORMAT",
                        format!("'{}' is not json or pretty", v),
                    ))
                }
            };
        }

        Ok(())
    }
}
