//! Conversation session engine shared between runtime and UI consumers.
//!
//! This crate holds the sans-IO parts: conversation identity, frame
//! attribution, history normalization, the ordered timeline, the live channel
//! lifecycle, and the `SessionEngine` that sequences them, plus the
//! command/event channel types used to drive it.

/// Async command/event channel primitives.
pub mod channel;
/// Live channel lifecycle state machine.
pub mod connection;
/// Conversation orchestrator.
pub mod engine;
/// Stable session error types.
pub mod error;
/// Raw frame attribution and ingestion ids.
pub mod frame;
/// History order detection and normalization.
pub mod history;
/// Canonical conversation keys.
pub mod room_identity;
/// Ordered, deduplicated message timeline.
pub mod timeline;
/// Shared protocol types (ids, records, commands, events).
pub mod types;

pub use channel::{EventStream, SessionChannelError, SessionChannels, SessionPublisher};
pub use connection::ConnectionManager;
pub use engine::{
    ConversationPlan, DEFAULT_TIMELINE_MAX_ITEMS, HistoryOutcome, LoadTicket, OutboundFrame,
    SessionEngine,
};
pub use error::{SessionError, SessionErrorKind, describe_http_status};
pub use frame::{FrameParser, IngestClock};
pub use history::{HistoryOrder, detect_order, normalize_history};
pub use room_identity::compute_key;
pub use timeline::{Timeline, merge_records};
pub use types::{
    ConnectionHandle, ConnectionState, ConversationKey, HistoryEntry, MessageId, MessageOrigin,
    MessageRecord, ParticipantId, Peer, Sender, SessionCommand, SessionEvent, TimelineView,
};
