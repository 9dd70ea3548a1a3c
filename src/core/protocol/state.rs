use serde::{Deserialize, Serialize};

/// Lifecycle of the client side of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, no handshake attempted
    Unstarted,
    /// Initialize request in flight
    Starting,
    /// Server accepted initialize, confirmation not yet sent
    Handshaking,
    /// Tool calls may be sent
    Ready,
    /// Connection lost or closed by the caller
    Closed,
    /// Handshake failed
    Failed,
}

impl SessionState {
    /// Whether the session can still carry messages
    pub fn is_open(&self) -> bool {
        !matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Unstarted => write!(f, "Unstarted"),
            SessionState::Starting => write!(f, "Starting"),
            SessionState::Handshaking => write!(f, "Handshaking"),
            SessionState::Ready => write!(f, "Ready"),
            SessionState::Closed => write!(f, "Closed"),
            SessionState::Failed => write!(f, "Failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Unstarted.to_string(), "Unstarted");
        assert_eq!(SessionState::Ready.to_string(), "Ready");
        assert_eq!(SessionState::Failed.to_string(), "Failed");
    }

    #[test]
    fn test_open_states() {
        assert!(SessionState::Unstarted.is_open());
        assert!(SessionState::Ready.is_open());
        assert!(!SessionState::Closed.is_open());
        assert!(!SessionState::Failed.is_open());
    }
}
