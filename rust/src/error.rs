use quad_storage_traits::{BackendError, OfflineQueueError};

/// Failures the messaging core reports to its host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuadError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("channel unavailable for {conversation_id} after {attempts} attempts")]
    ChannelUnavailable {
        conversation_id: String,
        attempts: u32,
    },
    #[error("send failed for {local_id}: {reason}")]
    SendFailed { local_id: String, reason: String },
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl From<BackendError> for QuadError {
    fn from(e: BackendError) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<OfflineQueueError> for QuadError {
    fn from(e: OfflineQueueError) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<quad_sqlite_storage::error::Error> for QuadError {
    fn from(e: quad_sqlite_storage::error::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_become_persistence_errors() {
        let err: QuadError = BackendError::Unreachable("timeout".to_string()).into();
        assert_eq!(
            err,
            QuadError::Persistence("Backend unreachable: timeout".to_string())
        );
    }

    #[test]
    fn channel_unavailable_names_the_conversation() {
        let err = QuadError::ChannelUnavailable {
            conversation_id: "conv-1".to_string(),
            attempts: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("conv-1"));
        assert!(msg.contains('5'));
    }
}
