use feedback_protocol::rpc::ErrorCode;
use feedback_protocol::{SessionId, SessionStatus};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("session {session_id} is already {status}")]
    AlreadyTerminal {
        session_id: SessionId,
        status: SessionStatus,
    },

    #[error("access denied for session {0}")]
    AccessDenied(SessionId),

    #[error("invalid timeout: must be at least one second")]
    InvalidTimeout,

    #[error("internal fault: {0}")]
    Internal(String),
}

impl SessionError {
    /// Convert to protocol error code and sanitized message.
    pub fn to_error_code(&self) -> (ErrorCode, String) {
        match self {
            SessionError::SessionNotFound(_) => (ErrorCode::SessionNotFound, self.to_string()),
            SessionError::AlreadyTerminal { .. } => (ErrorCode::SessionTerminal, self.to_string()),
            SessionError::AccessDenied(_) => (ErrorCode::AccessDenied, "access denied".to_string()),
            SessionError::InvalidTimeout => (ErrorCode::InvalidParams, self.to_string()),
            SessionError::Internal(_) => (ErrorCode::InternalError, "internal error".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_faults_are_sanitized() {
        let err = SessionError::Internal("id space exhausted after 8 attempts".to_string());
        let (code, message) = err.to_error_code();
        assert_eq!(code, ErrorCode::InternalError);
        assert_eq!(message, "internal error");
    }

    #[test]
    fn access_denied_does_not_echo_session() {
        let err = SessionError::AccessDenied("session_secret".to_string());
        let (code, message) = err.to_error_code();
        assert_eq!(code, ErrorCode::AccessDenied);
        assert!(!message.contains("session_secret"));
    }

    #[test]
    fn terminal_message_names_state() {
        let err = SessionError::AlreadyTerminal {
            session_id: "session_1".to_string(),
            status: SessionStatus::Completed,
        };
        assert_eq!(err.to_string(), "session session_1 is already completed");
    }
}
