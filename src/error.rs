//! Error types for database instance management.

/// Errors produced by the instance lifecycle coordinator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or missing option supplied by the caller
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// The container runtime daemon is not reachable
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Every port in the configured range is held or bound
    #[error("no available ports in range {lo}-{hi}")]
    PortExhausted {
        /// Inclusive lower bound of the range
        lo: u16,
        /// Inclusive upper bound of the range
        hi: u16,
    },

    /// The database image could not be found or pulled
    #[error("image {image} unavailable: {reason}")]
    ImageUnavailable { image: String, reason: String },

    /// Container creation failed before the container existed
    #[error("failed to create container for instance {id}: {reason}")]
    ContainerCreateFailed { id: String, reason: String },

    /// Container start failed after creation
    #[error("failed to start container for instance {id}: {reason}")]
    ContainerStartFailed { id: String, reason: String },

    /// The readiness probe never turned healthy within the budget
    #[error("instance {id} did not become ready within {waited_secs}s")]
    ReadinessTimeout { id: String, waited_secs: u64 },

    /// The readiness probe reported a terminal failure
    #[error("instance {id} failed its readiness probe: {log_tail}")]
    ReadinessFailed { id: String, log_tail: String },

    /// No instance matches the given id or prefix
    #[error("instance {0} not found")]
    NotFound(String),

    /// More than one instance matches the given prefix
    #[error("instance id {id} is ambiguous: matches {}", .candidates.join(", "))]
    Ambiguous {
        id: String,
        /// First 12 characters of each matching instance id
        candidates: Vec<String>,
    },

    /// Container removal failed; the instance remains registered for retry
    #[error("failed to remove container for instance {id}: {reason}")]
    RemoveFailed { id: String, reason: String },

    /// The operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// One or more instances could not be cleaned up at shutdown
    #[error("cleanup failed for {} instance(s): {}", .errors.len(), format_error_list(.errors))]
    Cleanup { errors: Vec<Error> },

    /// Container runtime API error
    #[error("container runtime API error: {0}")]
    Api(#[from] bollard::errors::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_error_list(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for instance management operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambiguous_message_lists_candidates() {
        let err = Error::Ambiguous {
            id: "abcd".to_string(),
            candidates: vec!["abcd11111111".to_string(), "abcd22222222".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("abcd11111111"));
        assert!(msg.contains("abcd22222222"));
    }

    #[test]
    fn cleanup_message_aggregates() {
        let err = Error::Cleanup {
            errors: vec![
                Error::NotFound("aaaa".to_string()),
                Error::RemoveFailed {
                    id: "bbbb".to_string(),
                    reason: "boom".to_string(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 instance(s)"));
        assert!(msg.contains("aaaa"));
        assert!(msg.contains("bbbb"));
    }

    #[test]
    fn port_exhausted_names_the_range() {
        let err = Error::PortExhausted { lo: 20000, hi: 20010 };
        assert!(err.to_string().contains("20000-20010"));
    }
}
