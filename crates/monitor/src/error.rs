/// Failure to obtain an execution snapshot from the transport boundary.
///
/// Fetch failures never change a coordinator's state; the next tick simply
/// tries again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected HTTP status {status}")]
    Status { status: u16 },

    #[error("Failed to decode snapshot: {0}")]
    Decode(String),

    #[error("Fetch timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Invalid configuration: {key}={value}: {reason}")]
    InvalidConfig {
        key: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_fetch_errors() {
        assert_eq!(
            FetchError::Status { status: 503 }.to_string(),
            "Unexpected HTTP status 503"
        );
        assert_eq!(
            FetchError::Timeout { elapsed_ms: 10_000 }.to_string(),
            "Fetch timed out after 10000ms"
        );
    }

    #[test]
    fn display_invalid_config() {
        let err = MonitorError::InvalidConfig {
            key: "POLL_INTERVAL_SECS",
            value: "abc".into(),
            reason: "must be a positive integer",
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration: POLL_INTERVAL_SECS=abc: must be a positive integer"
        );
    }
}
