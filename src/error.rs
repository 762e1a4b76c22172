use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashboardError {
    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Request to {url} timed out after {seconds}s")]
    Timeout { url: String, seconds: u64 },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("File error: {0}")]
    FileError(String),
}

/// Coarse error class recorded on a failed widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    HttpStatus,
    Timeout,
    Network,
    Parse,
    File,
}

impl DashboardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DashboardError::HttpStatus { .. } => ErrorKind::HttpStatus,
            DashboardError::Timeout { .. } => ErrorKind::Timeout,
            DashboardError::NetworkError(_) => ErrorKind::Network,
            DashboardError::ParseError(_) => ErrorKind::Parse,
            DashboardError::FileError(_) => ErrorKind::File,
        }
    }

    /// Only transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DashboardError::HttpStatus { .. }
                | DashboardError::Timeout { .. }
                | DashboardError::NetworkError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_are_not_retryable() {
        assert!(!DashboardError::ParseError("bad json".into()).is_retryable());
        assert!(!DashboardError::FileError("missing".into()).is_retryable());
        assert!(DashboardError::Timeout { url: "u".into(), seconds: 3 }.is_retryable());
        assert!(DashboardError::HttpStatus { url: "u".into(), status: 502 }.is_retryable());
    }

    #[test]
    fn kind_matches_variant() {
        let err = DashboardError::HttpStatus { url: "https://x".into(), status: 404 };
        assert_eq!(err.kind(), ErrorKind::HttpStatus);
        assert_eq!(err.to_string(), "HTTP 404 from https://x");
    }
}
