use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GateError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(eventgate::io))]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(eventgate::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Security event sink unavailable: {0}")]
    #[diagnostic(
        code(eventgate::sink_unavailable),
        help("Denials are still enforced; only the audit record was lost")
    )]
    SinkUnavailable(String),
}
