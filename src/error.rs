use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error, Diagnostic)]
pub enum UsiError {
    #[error("incorrectly formatted USI: {0}")]
    MalformedUsi(String),

    #[error("incorrectly formatted legacy USI: {0}")]
    UnknownLegacyForm(String),

    #[error("currently supported {backend} index flags: {supported}")]
    UnsupportedIndexFlag {
        backend: String,
        supported: String,
    },

    #[error("unknown USI collection: {0}")]
    UnknownCollection(String),

    #[error("{0}")]
    NotFound(String),

    #[error("timeout while retrieving the USI from an external resource: {0}")]
    Timeout(String),

    #[error("task exceeded its time limit of {millis}ms: {key}")]
    TaskTimeout { key: String, millis: u64 },

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("invalid peak input: {0}")]
    InvalidPeaks(String),

    #[error("invalid built-in pattern: {0}")]
    InvalidPattern(String),

    #[error("cache entry could not be encoded: {0}")]
    Cache(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("worker task failed: {0}")]
    WorkerFailed(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),
}

impl UsiError {
    /// HTTP-style status code the API layer reports for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            UsiError::MalformedUsi(_)
            | UsiError::UnknownLegacyForm(_)
            | UsiError::UnsupportedIndexFlag { .. }
            | UsiError::UnknownCollection(_)
            | UsiError::InvalidPeaks(_) => 400,
            UsiError::NotFound(_) => 404,
            UsiError::Upstream(_) => 502,
            UsiError::Timeout(_) | UsiError::TaskTimeout { .. } => 504,
            UsiError::InvalidPattern(_)
            | UsiError::Cache(_)
            | UsiError::Filesystem(_)
            | UsiError::WorkerFailed(_)
            | UsiError::ConfigRead(_)
            | UsiError::ConfigParse(_) => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UsiError::MalformedUsi(_) => "malformed_usi",
            UsiError::UnknownLegacyForm(_) => "unknown_legacy_form",
            UsiError::UnsupportedIndexFlag { .. } => "unsupported_index_flag",
            UsiError::UnknownCollection(_) => "unknown_collection",
            UsiError::NotFound(_) => "not_found",
            UsiError::Timeout(_) => "timeout",
            UsiError::TaskTimeout { .. } => "task_timeout",
            UsiError::Upstream(_) => "upstream",
            UsiError::InvalidPeaks(_) => "invalid_peaks",
            UsiError::InvalidPattern(_) => "invalid_pattern",
            UsiError::Cache(_) => "cache",
            UsiError::Filesystem(_) => "filesystem",
            UsiError::WorkerFailed(_) => "worker_failed",
            UsiError::ConfigRead(_) => "config_read",
            UsiError::ConfigParse(_) => "config_parse",
        }
    }

    pub(crate) fn unsupported_flag(backend: &str, supported: &str) -> Self {
        UsiError::UnsupportedIndexFlag {
            backend: backend.to_string(),
            supported: supported.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_transport_convention() {
        assert_eq!(UsiError::MalformedUsi("x".to_string()).status_code(), 400);
        assert_eq!(
            UsiError::unsupported_flag("MassBank", "accession").status_code(),
            400
        );
        assert_eq!(UsiError::NotFound("x".to_string()).status_code(), 404);
        assert_eq!(UsiError::Timeout("x".to_string()).status_code(), 504);
        assert_eq!(
            UsiError::TaskTimeout {
                key: "k".to_string(),
                millis: 60_000
            }
            .status_code(),
            504
        );
    }

    #[test]
    fn task_timeout_keeps_sub_second_budgets() {
        let err = UsiError::TaskTimeout {
            key: "k".to_string(),
            millis: 250,
        };
        assert_eq!(err.to_string(), "task exceeded its time limit of 250ms: k");
    }

    #[test]
    fn unsupported_flag_message_names_backend() {
        let err = UsiError::unsupported_flag("MassIVE", "scan");
        assert_eq!(
            err.to_string(),
            "currently supported MassIVE index flags: scan"
        );
    }
}
