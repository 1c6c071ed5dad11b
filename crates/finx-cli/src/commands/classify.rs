use std::collections::BTreeMap;

use finx_http::{classify_status, ClassifiedError, ErrorCategory, HttpMethod, ResilienceProfile};
use serde::Serialize;

use crate::cli::ClassifyArgs;
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct Classification {
    status: u16,
    method: HttpMethod,
    ok: bool,
    category: ErrorCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
    /// Whether a retry would follow if attempts remained.
    retry_allowed: bool,
}

pub fn run(args: &ClassifyArgs) -> Result<CommandResult, CliError> {
    if !(100..=599).contains(&args.status) {
        return Err(CliError::Usage(format!(
            "--status must be an HTTP status code, got {}",
            args.status
        )));
    }

    let headers: BTreeMap<String, String> = args
        .headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
        .collect();

    let classification = match classify_status(args.status, &headers) {
        Some(classified) => failure(args, &classified),
        None => Classification {
            status: args.status,
            method: args.method,
            ok: true,
            category: ErrorCategory::None,
            code: None,
            reason: None,
            retry_after_ms: None,
            retry_allowed: false,
        },
    };

    Ok(CommandResult::ok(serde_json::to_value(classification)?))
}

fn failure(args: &ClassifyArgs, classified: &ClassifiedError) -> Classification {
    let profile = ResilienceProfile {
        max_attempts: 2,
        ..ResilienceProfile::fallback()
    };

    Classification {
        status: args.status,
        method: args.method,
        ok: false,
        category: classified.category,
        code: Some(classified.category.code()),
        reason: Some(classified.reason.clone()),
        retry_after_ms: classified
            .retry_after()
            .map(|delay| u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
        retry_allowed: profile.allows_retry(args.method, false, classified, 1),
    }
}
