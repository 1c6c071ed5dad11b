use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use finx_http::{
    CacheDirective, EngineConfig, LogMetricsSink, MemoryCache, NoopTransport, QueryValue,
    RequestEngine, RequestError, RequestErrorKind, RequestSpec, ReqwestTransport,
    ResilienceOverride, TracingSpans, Transport,
};
use serde_json::{json, Value};
use tracing::debug;

use crate::cli::FetchArgs;
use crate::error::CliError;

use super::CommandResult;

const CONFIG_ENV: &str = "FINX_CONFIG";

pub async fn run(args: &FetchArgs) -> Result<CommandResult, CliError> {
    let config_path = config_path(args.config.as_deref(), std::env::var_os(CONFIG_ENV));
    let config = match &config_path {
        Some(path) => {
            debug!(path = %path.display(), "loading engine config");
            EngineConfig::from_path(path)?
        }
        None => EngineConfig::default(),
    };

    let engine = build_engine(config, args)?;
    let result = engine.execute(build_spec(args)).await;
    engine.shutdown();

    match result {
        Ok(response) => {
            let body = serde_json::from_str::<Value>(&response.body)
                .unwrap_or_else(|_| Value::String(response.body.clone()));
            let data = json!({
                "status": response.status,
                "body": body,
                "outcome": serde_json::to_value(&response.outcome)?,
            });
            Ok(CommandResult::ok(data))
        }
        Err(error) if error.kind() == RequestErrorKind::Configuration => Err(CliError::Request(error)),
        Err(error) => Ok(CommandResult::failed(failure_payload(&error)?)),
    }
}

/// `--config` wins over the environment; an empty variable counts as unset.
fn config_path(explicit: Option<&Path>, env: Option<OsString>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| env.filter(|value| !value.is_empty()).map(PathBuf::from))
}

fn build_engine(config: EngineConfig, args: &FetchArgs) -> Result<RequestEngine, CliError> {
    let transport: Arc<dyn Transport> = if args.mock {
        Arc::new(NoopTransport)
    } else {
        Arc::new(ReqwestTransport::new())
    };

    let mut builder = RequestEngine::builder()
        .config(config)
        .transport(transport)
        .metrics(Arc::new(LogMetricsSink))
        .tracing(Arc::new(TracingSpans));
    if args.cache_key.is_some() {
        builder = builder.cache(Arc::new(MemoryCache::new()));
    }

    Ok(builder.build()?)
}

fn build_spec(args: &FetchArgs) -> RequestSpec {
    let mut spec = RequestSpec::new(args.method, args.operation.as_str());
    spec = if is_absolute(&args.target) {
        spec.with_url(args.target.as_str())
    } else {
        spec.with_path(args.target.as_str())
    };

    for (name, value) in &args.headers {
        spec = spec.with_header(name.as_str(), value.as_str());
    }
    for (key, value) in group_query(&args.query) {
        spec = spec.with_query(key, value);
    }
    if let Some(body) = &args.body {
        spec = spec.with_json(body.clone());
    }
    if let Some(key) = &args.idempotency_key {
        spec = spec.with_idempotency_key(key.as_str());
    }
    if let Some(key) = &args.cache_key {
        let mut directive = CacheDirective::new(key.as_str());
        if let Some(mode) = args.cache_mode {
            directive = directive.with_mode(mode);
        }
        spec = spec.with_cache(directive);
    }

    let resilience = resilience_override(args);
    if resilience != ResilienceOverride::default() {
        spec = spec.with_resilience(resilience);
    }
    spec
}

fn resilience_override(args: &FetchArgs) -> ResilienceOverride {
    let mut resilience = ResilienceOverride::default();
    if let Some(max_attempts) = args.max_attempts {
        resilience = resilience.max_attempts(max_attempts);
    }
    if let Some(timeout_ms) = args.timeout_ms {
        resilience = resilience.overall_timeout(Duration::from_millis(timeout_ms));
    }
    if let Some(timeout_ms) = args.attempt_timeout_ms {
        resilience = resilience.per_attempt_timeout(Duration::from_millis(timeout_ms));
    }
    resilience
}

fn is_absolute(target: &str) -> bool {
    let lower = target.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Repeated keys collapse into one list value, keeping first-seen key order.
fn group_query(pairs: &[(String, String)]) -> Vec<(String, QueryValue)> {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (key, value) in pairs {
        match grouped.iter_mut().find(|(existing, _)| existing == key) {
            Some((_, values)) => values.push(value.clone()),
            None => grouped.push((key.clone(), vec![value.clone()])),
        }
    }

    grouped
        .into_iter()
        .map(|(key, mut values)| {
            let value = if values.len() == 1 {
                QueryValue::One(values.remove(0))
            } else {
                QueryValue::Many(values)
            };
            (key, value)
        })
        .collect()
}

fn failure_payload(error: &RequestError) -> Result<Value, CliError> {
    let outcome = error.outcome().map(serde_json::to_value).transpose()?;
    let correlation = error.correlation().map(serde_json::to_value).transpose()?;

    Ok(json!({
        "status": error.status(),
        "error": {
            "code": error.code(),
            "category": error.category(),
            "message": error.message(),
            "operation": error.operation(),
            "attempts": error.attempts(),
            "correlation": correlation,
        },
        "outcome": outcome,
    }))
}
