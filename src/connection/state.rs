//! Connection state machine

use crate::{Error, Result};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial state (not connected)
    Initial,

    /// Version handshake in progress (magic sent, awaiting server pick)
    Handshaking,

    /// HELLO sent, awaiting authentication outcome
    Authenticating,

    /// Authenticated and idle
    Ready,

    /// Explicit transaction open
    InTransaction,

    /// Records pending for a running query
    Streaming,

    /// Server reported a failure, RESET required before reuse
    Failed,

    /// Closed
    Closed,
}

impl ConnectionState {
    /// Check if transition is valid
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Initial, Handshaking)
                | (Handshaking, Authenticating)
                | (Authenticating, Ready)
                | (Ready, InTransaction)
                | (InTransaction, Streaming)
                | (Streaming, InTransaction)
                | (InTransaction, Ready)
                | (Streaming, Ready)
                | (Authenticating, Failed)
                | (Ready, Failed)
                | (InTransaction, Failed)
                | (Streaming, Failed)
                | (Failed, Ready)
                | (_, Closed)
        )
    }

    /// Transition to new state
    pub fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("valid transition from {:?}", self),
                actual: format!("{:?}", next),
            });
        }
        *self = next;
        Ok(())
    }

    /// Whether the server currently holds an open transaction for us
    pub fn in_transaction(&self) -> bool {
        matches!(self, Self::InTransaction | Self::Streaming)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Handshaking => write!(f, "handshaking"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Ready => write!(f, "ready"),
            Self::InTransaction => write!(f, "in_transaction"),
            Self::Streaming => write!(f, "streaming"),
            Self::Failed => write!(f, "failed"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let mut state = ConnectionState::Initial;
        assert!(state.transition(ConnectionState::Handshaking).is_ok());
        assert!(state.transition(ConnectionState::Authenticating).is_ok());
        assert!(state.transition(ConnectionState::Ready).is_ok());
        assert!(state.transition(ConnectionState::InTransaction).is_ok());
        assert!(state.transition(ConnectionState::Streaming).is_ok());
        assert!(state.transition(ConnectionState::InTransaction).is_ok());
        assert!(state.transition(ConnectionState::Ready).is_ok());
    }

    #[test]
    fn test_invalid_transition() {
        let mut state = ConnectionState::Initial;
        assert!(state.transition(ConnectionState::Ready).is_err());
    }

    #[test]
    fn test_close_from_any_state() {
        let mut state = ConnectionState::Streaming;
        assert!(state.transition(ConnectionState::Closed).is_ok());
    }

    #[test]
    fn test_failed_recovers_through_reset() {
        let mut state = ConnectionState::InTransaction;
        assert!(state.transition(ConnectionState::Failed).is_ok());
        assert!(state.transition(ConnectionState::Ready).is_ok());
    }

    #[test]
    fn test_failed_cannot_begin_directly() {
        let mut state = ConnectionState::Failed;
        assert!(state.transition(ConnectionState::InTransaction).is_err());
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut state = ConnectionState::Closed;
        assert!(state.transition(ConnectionState::Ready).is_err());
        assert!(state.transition(ConnectionState::Failed).is_err());
    }

    #[test]
    fn test_in_transaction_predicate() {
        assert!(ConnectionState::InTransaction.in_transaction());
        assert!(ConnectionState::Streaming.in_transaction());
        assert!(!ConnectionState::Ready.in_transaction());
        assert!(!ConnectionState::Failed.in_transaction());
    }
}
