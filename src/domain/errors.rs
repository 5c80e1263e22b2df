use uuid::Uuid;

// ============================================================================
// Tabulation Business Rule Errors
// ============================================================================
//
// Shared by the result and the bundle aggregate. Every variant is raised
// before any event is produced.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TallyError {
    #[error("Operation {operation} is not permitted in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Contest {0} is locked")]
    ContestLocked(Uuid),

    #[error("Number space exhausted: {0}")]
    NumericOverflow(&'static str),

    #[error("Aggregate not initialized")]
    NotInitialized,
}

impl TallyError {
    pub fn invalid_state(operation: &'static str, state: impl std::fmt::Debug) -> Self {
        TallyError::InvalidState {
            operation,
            state: format!("{state:?}"),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        TallyError::InvalidArgument(message.into())
    }

    /// Stable label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            TallyError::InvalidState { .. } => "invalid_state",
            TallyError::InvalidArgument(_) => "invalid_argument",
            TallyError::Permission(_) => "permission",
            TallyError::ContestLocked(_) => "contest_locked",
            TallyError::NumericOverflow(_) => "numeric_overflow",
            TallyError::NotInitialized => "not_initialized",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum Sample {
        SubmissionDone,
    }

    #[test]
    fn test_invalid_state_carries_state_name() {
        let err = TallyError::invalid_state("Plausibilise", Sample::SubmissionDone);
        assert_eq!(
            err.to_string(),
            "Operation Plausibilise is not permitted in state SubmissionDone"
        );
        assert_eq!(err.kind(), "invalid_state");
    }
}
