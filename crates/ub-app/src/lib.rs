//! UserBridge application
//!
//! Imports users from JSONPlaceholder into a relational store and exposes
//! them over HTTP. Work is coordinated through two broker virtual hosts and a
//! background worker, all sharing one [`Container`].

pub mod amqp;
pub mod application;
pub mod commands;
pub mod container;
pub mod error;
pub mod http;
pub mod integrations;
pub mod jobs;
pub mod model;
pub mod repository;
pub mod services;

pub use amqp::AmqpServer;
pub use application::{Application, RunMode, RunningApplication, Started};
pub use commands::{AdminCommand, CommandReport};
pub use container::Container;
pub use error::{ApiError, AppError, Result};
pub use model::{NewUser, User, UserSource};
pub use repository::UserRepository;
pub use services::UserService;
