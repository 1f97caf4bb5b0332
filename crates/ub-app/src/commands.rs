//! Administrative one-shot commands (`--bash <signature>...`)

use std::fmt;
use std::str::FromStr;

use tracing::info;

use crate::container::Container;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    /// Import users from JSONPlaceholder in-process
    SyncUsers,
    /// Publish a fetch request for the consumers to handle
    RequestSync,
    /// Print every stored user
    ListUsers,
}

impl AdminCommand {
    pub const ALL: [AdminCommand; 3] = [
        AdminCommand::SyncUsers,
        AdminCommand::RequestSync,
        AdminCommand::ListUsers,
    ];

    pub fn signature(&self) -> &'static str {
        match self {
            AdminCommand::SyncUsers => "sync-users",
            AdminCommand::RequestSync => "request-sync",
            AdminCommand::ListUsers => "list-users",
        }
    }

    pub async fn run(&self, container: &Container) -> Result<CommandReport> {
        let summary = match self {
            AdminCommand::SyncUsers => {
                let ids = container.user_service.fetch_from_json_placeholder().await?;
                container.user_service.announce_pending().await?;
                format!("{} user(s) imported", ids.len())
            }
            AdminCommand::RequestSync => {
                container.user_service.request_fetch("admin").await?;
                "fetch request published".to_string()
            }
            AdminCommand::ListUsers => {
                let users = container.user_service.all().await?;
                for user in &users {
                    info!(
                        id = %user.id,
                        username = %user.username,
                        email = %user.email_address,
                        "User"
                    );
                }
                format!("{} user(s) stored", users.len())
            }
        };

        Ok(CommandReport {
            signature: self.signature(),
            summary,
        })
    }
}

impl fmt::Display for AdminCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.signature())
    }
}

impl FromStr for AdminCommand {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        AdminCommand::ALL
            .into_iter()
            .find(|command| command.signature() == s)
            .ok_or_else(|| AppError::UnknownCommand(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReport {
    pub signature: &'static str,
    pub summary: String,
}

/// Resolve every signature; fails on the first unknown one
pub fn parse_signatures<S: AsRef<str>>(signatures: &[S]) -> Result<Vec<AdminCommand>> {
    signatures.iter().map(|s| s.as_ref().parse()).collect()
}

/// Run commands in order, stopping at the first failure
pub async fn execute(container: &Container, commands: &[AdminCommand]) -> Result<Vec<CommandReport>> {
    let mut reports = Vec::with_capacity(commands.len());
    for command in commands {
        info!(command = %command, "Running admin command");
        let report = command.run(container).await?;
        info!(command = %command, summary = %report.summary, "Admin command finished");
        reports.push(report);
    }
    Ok(reports)
}
