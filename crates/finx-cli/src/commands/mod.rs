mod backoff;
mod classify;
mod fetch;

use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// Rendered payload of one command. `failed` maps to exit code 3.
pub struct CommandResult {
    pub data: Value,
    pub failed: bool,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            failed: false,
        }
    }

    pub fn failed(data: Value) -> Self {
        Self { data, failed: true }
    }
}

pub async fn run(cli: &Cli) -> Result<CommandResult, CliError> {
    match &cli.command {
        Command::Fetch(args) => fetch::run(args).await,
        Command::Classify(args) => classify::run(args),
        Command::Backoff(args) => backoff::run(args),
    }
}
