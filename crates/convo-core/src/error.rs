use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ConnectionState;

/// Error taxonomy reported by the session engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionErrorKind {
    /// Bad identity input (for example a conversation with oneself).
    InvalidConversation,
    /// Persisted history could not be fetched or decoded.
    HistoryUnavailable,
    /// The live channel failed or was closed by the transport.
    Channel,
    /// `send` was called without an open channel.
    NotConnected,
    /// `send` was called with blank text.
    EmptyMessage,
    /// Invariant break or invalid state transition.
    Internal,
}

impl SessionErrorKind {
    /// Stable machine-readable code for this kind.
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidConversation => "invalid_conversation",
            Self::HistoryUnavailable => "history_unavailable",
            Self::Channel => "channel_error",
            Self::NotConnected => "not_connected",
            Self::EmptyMessage => "empty_message",
            Self::Internal => "internal",
        }
    }

    /// Whether the engine keeps working normally after reporting this error.
    ///
    /// Only channel failures leave the active conversation degraded; the UI
    /// decides whether to reselect.
    pub fn is_recoverable(self) -> bool {
        !matches!(self, Self::Channel | Self::Internal)
    }
}

/// Stable error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{kind:?}:{code}: {message}")]
pub struct SessionError {
    /// Error kind.
    pub kind: SessionErrorKind,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl SessionError {
    /// Construct a new error with the kind's stable code.
    pub fn new(kind: SessionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code().to_owned(),
            message: message.into(),
        }
    }

    pub fn invalid_conversation(message: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::InvalidConversation, message)
    }

    pub fn history_unavailable(message: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::HistoryUnavailable, message)
    }

    pub fn channel(message: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::Channel, message)
    }

    pub fn not_connected() -> Self {
        Self::new(
            SessionErrorKind::NotConnected,
            "no open live channel for the active conversation",
        )
    }

    pub fn empty_message() -> Self {
        Self::new(SessionErrorKind::EmptyMessage, "message is blank after trimming")
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: &ConnectionState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self {
            kind: SessionErrorKind::Internal,
            code: "invalid_state_transition".to_owned(),
            message: format!("cannot run '{action}' while connection is in state {current:?}"),
        }
    }
}

/// Describe an HTTP status for history failure messages.
pub fn describe_http_status(status: u16) -> &'static str {
    match status {
        401 | 403 => "unauthorized",
        404 => "conversation not found",
        408 | 429 => "throttled",
        400..=499 => "rejected request",
        500..=599 => "server failure",
        _ => "unexpected status",
    }
}
