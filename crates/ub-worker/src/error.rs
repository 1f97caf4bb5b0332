use thiserror::Error;

use crate::worker::WorkerState;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("Invalid cron expression '{expr}': {message}")]
    InvalidCron { expr: String, message: String },

    #[error("Cannot {action} worker in state {state}")]
    InvalidState {
        action: &'static str,
        state: WorkerState,
    },
}

pub type Result<T> = std::result::Result<T, WorkerError>;
