use finx_http::RequestErrorKind;
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] finx_http::ConfigError),

    #[error("usage error: {0}")]
    Usage(String),

    #[error(transparent)]
    Request(#[from] finx_http::RequestError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Usage(_) => 2,
            Self::Request(error) if error.kind() == RequestErrorKind::Configuration => 2,
            Self::Request(_) => 3,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}
