use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Remote returned HTTP status {0}")]
    Status(u16),

    #[error("Malformed response body: {0}")]
    MalformedBody(String),

    #[error("Remote reported an error: {0}")]
    Remote(String),

    #[error("Authentication rejected by remote: {0}")]
    Auth(String),

    #[error("Roster is empty: no membership cards could be fetched")]
    EmptyRoster,

    #[error("Member {entity_id} not found, but the card listing stopped early ({reason})")]
    IncompleteListing { entity_id: String, reason: String },

    #[error("Run cancelled by operator")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReconcileError {
    /// Network-class failures: a page walk truncates on these instead of aborting.
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcileError::Http(_)
            | ReconcileError::Timeout(_)
            | ReconcileError::MalformedBody(_)
            | ReconcileError::Remote(_) => true,
            ReconcileError::Status(code) => *code >= 500 || *code == 429,
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ReconcileError::Auth(_))
    }
}

impl From<config::ConfigError> for ReconcileError {
    fn from(e: config::ConfigError) -> Self {
        ReconcileError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
