use std::time::Duration;

use finx_http::Backoff;
use serde::Serialize;

use crate::cli::BackoffArgs;
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct BackoffStep {
    after_attempt: u32,
    /// Delay with the multiplier at its midpoint.
    delay_ms: u64,
    min_ms: u64,
    max_ms: u64,
}

#[derive(Debug, Serialize)]
struct BackoffSchedule {
    base_ms: u64,
    max_ms: u64,
    jitter: f64,
    steps: Vec<BackoffStep>,
}

pub fn run(args: &BackoffArgs) -> Result<CommandResult, CliError> {
    if args.attempts == 0 {
        return Err(CliError::Usage(String::from("--attempts must be at least 1")));
    }
    if !(0.0..=1.0).contains(&args.jitter) {
        return Err(CliError::Usage(format!(
            "--jitter must be within [0, 1], got {}",
            args.jitter
        )));
    }

    let schedule = schedule(args);
    Ok(CommandResult::ok(serde_json::to_value(schedule)?))
}

fn schedule(args: &BackoffArgs) -> BackoffSchedule {
    let backoff = Backoff {
        base: Duration::from_millis(args.base_ms),
        max: Duration::from_millis(args.max_ms),
        jitter_factor: args.jitter,
    };

    // No delay follows the final attempt.
    let steps = (1..args.attempts)
        .map(|attempt| BackoffStep {
            after_attempt: attempt,
            delay_ms: millis(backoff.delay_with_sample(attempt, 0.5)),
            min_ms: millis(backoff.delay_with_sample(attempt, 0.0)),
            max_ms: millis(backoff.delay_with_sample(attempt, 1.0)),
        })
        .collect();

    BackoffSchedule {
        base_ms: args.base_ms,
        max_ms: args.max_ms,
        jitter: args.jitter,
        steps,
    }
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}
