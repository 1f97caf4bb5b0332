use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// Broker unreachable or credentials rejected
    #[error("Connection error on vhost '{vhost}': {message}")]
    Connection { vhost: String, message: String },

    /// A virtual host or queue could not be declared
    #[error("Topology error on vhost '{vhost}': {message}")]
    Topology { vhost: String, message: String },

    #[error("Publish to '{destination}' on vhost '{vhost}' failed: {message}")]
    Publish {
        vhost: String,
        destination: String,
        message: String,
    },

    #[error("Virtual host not found: {name}")]
    NotFound { name: String },

    #[error("Broker already started")]
    AlreadyStarted,
}

impl BrokerError {
    pub fn connection(vhost: impl Into<String>, message: impl ToString) -> Self {
        Self::Connection {
            vhost: vhost.into(),
            message: message.to_string(),
        }
    }

    pub fn topology(vhost: impl Into<String>, message: impl ToString) -> Self {
        Self::Topology {
            vhost: vhost.into(),
            message: message.to_string(),
        }
    }

    pub fn publish(
        vhost: impl Into<String>,
        destination: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        Self::Publish {
            vhost: vhost.into(),
            destination: destination.into(),
            message: message.to_string(),
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Errors that must abort application startup
    pub fn is_startup_fatal(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Topology { .. })
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
