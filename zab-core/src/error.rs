//! # Error Types
//!
//! Error handling for the ZAB atomic broadcast protocol.

use crate::{NodeId, ZxId};
use thiserror::Error;

/// Error types that can occur while running the protocol.
///
/// Errors fall into three groups with very different consequences:
///
/// - **Transient**: transport failures. Logged by the protocol and abandoned;
///   the heartbeat timeout eventually recovers the cluster.
/// - **Fatal to the local node**: protocol invariant violations and log order
///   violations. Returned to the caller, which decides whether to restart the
///   node from ELECTION.
/// - **Collaborator failures**: the learner refused to apply a record, a
///   message could not be encoded, configuration is invalid.
///
/// Stale or misrouted messages are *not* errors; they are dropped with a
/// diagnostic log.
///
/// # Examples
///
/// ```rust
/// use zab_core::ZabError;
///
/// let error = ZabError::transport("connection refused");
/// assert!(error.is_retryable());
/// assert!(!error.is_fatal());
///
/// let error = ZabError::protocol_violation("ACKEPOCH without FOLLOWERINFO");
/// assert!(error.is_fatal());
/// ```
#[derive(Error, Debug)]
pub enum ZabError {
    /// Point-to-point or broadcast delivery failed
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The learner failed to apply a committed record
    #[error("Learner error: {message}")]
    Learner { message: String },

    /// A protocol invariant was broken; the local node cannot continue the
    /// current round
    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// A record was appended out of zxid order
    #[error("Log order violation: attempted {attempted} after {last}")]
    LogOrder { last: ZxId, attempted: ZxId },

    /// Node id outside the fixed cluster
    #[error("Node {node_id} is not part of a {peer_count}-node cluster")]
    UnknownNode { node_id: NodeId, peer_count: u32 },

    /// Rejected configuration value
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Structurally inconsistent message
    #[error("Invalid message: {message}")]
    InvalidMessage { message: String },

    /// Wire encoding or decoding failed, whichever codec was in use
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Unexpected internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<bincode::Error> for ZabError {
    fn from(error: bincode::Error) -> Self {
        Self::serialization(format!("bincode: {}", error))
    }
}

impl From<serde_json::Error> for ZabError {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization(format!("JSON: {}", error))
    }
}

/// Type alias for Results in the ZAB protocol.
pub type Result<T> = std::result::Result<T, ZabError>;

impl ZabError {
    /// Creates a new transport error with the given message.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a new learner error with the given message.
    pub fn learner(message: impl Into<String>) -> Self {
        Self::Learner {
            message: message.into(),
        }
    }

    /// Creates a new protocol violation with the given message.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use zab_core::ZabError;
    ///
    /// let error = ZabError::protocol_violation("ACK for unknown counter 9");
    /// assert_eq!(error.to_string(), "Protocol violation: ACK for unknown counter 9");
    /// ```
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Creates a new invalid-message error with the given message.
    pub fn invalid_message(message: impl Into<String>) -> Self {
        Self::InvalidMessage {
            message: message.into(),
        }
    }

    /// Creates a new internal error with the given message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation later might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Whether the error means the local node's protocol state can no longer
    /// be trusted for the current round.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. } | Self::LogOrder { .. })
    }
}
