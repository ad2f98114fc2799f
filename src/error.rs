use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowLensError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Errors on the caller-visible forwarding path. Everything else in the
/// capture pipeline degrades silently instead of failing the exchange.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// Connection to the target could not be established. Surfaced to the
    /// caller as a 502; the capture record stays request-only.
    #[error("Upstream unreachable: {0}")]
    Unreachable(String),

    /// Connection dropped mid-response after headers were already relayed.
    /// The caller's stream is simply terminated.
    #[error("Upstream stream error: {0}")]
    Stream(String),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Exporter request failed: {0}")]
    Http(String),

    #[error("Exporter rejected payload with status {0}")]
    Rejected(u16),
}

pub type Result<T> = std::result::Result<T, FlowLensError>;
