use thiserror::Error;

/// Failure of a Kaspa RPC call, at endpoint or pool level.
///
/// Every variant maps to an HTTP-style status for callers that surface it,
/// and says whether retrying against another endpoint may help.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// Transport or node-side stream failure.
    #[error("{0}")]
    Stream(String),

    #[error("Kaspa RPC stream ended before response")]
    StreamEnded,

    #[error("Kaspa RPC response missing {0}")]
    MissingField(&'static str),

    /// Error message embedded in an otherwise well-formed response.
    #[error("{0}")]
    Node(String),

    #[error("Kaspa node returned malformed balance")]
    MalformedBalance,

    #[error("Timed out while waiting for Kaspa RPC response")]
    Timeout,

    #[error("No Kaspa RPC endpoints configured")]
    NoEndpoints,

    #[error("invalid Kaspa RPC endpoint {target}: {reason}")]
    InvalidEndpoint { target: String, reason: String },
}

impl RpcError {
    pub fn status(&self) -> u16 {
        match self {
            Self::Timeout => 504,
            Self::NoEndpoints => 503,
            Self::InvalidEndpoint { .. } => 500,
            _ => 502,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NoEndpoints | Self::InvalidEndpoint { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_failure_class() {
        assert_eq!(RpcError::Timeout.status(), 504);
        assert_eq!(RpcError::NoEndpoints.status(), 503);
        assert_eq!(RpcError::StreamEnded.status(), 502);
        assert_eq!(RpcError::Node("utxo index disabled".into()).status(), 502);
        assert_eq!(RpcError::MissingField("getServerInfoResponse").status(), 502);
    }

    #[test]
    fn only_configuration_failures_are_terminal() {
        assert!(RpcError::Timeout.is_retryable());
        assert!(RpcError::MalformedBalance.is_retryable());
        assert!(!RpcError::NoEndpoints.is_retryable());
    }
}
