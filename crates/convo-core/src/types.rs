use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::oneshot;

use crate::error::SessionError;

/// Identifier of a workspace user.
///
/// Numeric ids compare numerically, text ids lexicographically, and every
/// numeric id orders before every text id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParticipantId {
    Numeric(u64),
    Text(String),
}

impl ParticipantId {
    /// Parse a raw id; all-digit strings become numeric ids.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(SessionError::invalid_conversation(
                "participant id must not be empty",
            ));
        }
        if trimmed.bytes().all(|b| b.is_ascii_digit())
            && let Ok(value) = trimmed.parse::<u64>()
        {
            return Ok(Self::Numeric(value));
        }
        Ok(Self::Text(trimmed.to_owned()))
    }
}

impl FromStr for ParticipantId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<u64> for ParticipantId {
    fn from(value: u64) -> Self {
        Self::Numeric(value)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl Serialize for ParticipantId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Numeric(value) => serializer.serialize_u64(*value),
            Self::Text(value) => serializer.serialize_str(value),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawParticipantId {
    Numeric(u64),
    Text(String),
}

impl<'de> Deserialize<'de> for ParticipantId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawParticipantId::deserialize(deserializer)? {
            RawParticipantId::Numeric(value) => Ok(Self::Numeric(value)),
            RawParticipantId::Text(value) => {
                Self::parse(&value).map_err(|err| serde::de::Error::custom(err.message))
            }
        }
    }
}

/// Canonical, order-independent name of a pairwise conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub(crate) fn from_canonical(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sort and dedup key of a message inside one conversation.
pub type MessageId = u64;

/// Attributed author of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sender {
    Participant(ParticipantId),
    /// Attribution failed.
    Unknown,
}

/// Provenance of a timeline record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageOrigin {
    History,
    Live,
}

/// Normalized message shape shared by history and live frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub content: String,
    pub sender: Sender,
    /// `true` iff `sender` is the local viewer.
    pub is_self: bool,
    pub origin: MessageOrigin,
}

/// The other side of a conversation as selected in the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: ParticipantId,
    pub display_name: Option<String>,
}

impl Peer {
    pub fn new(id: impl Into<ParticipantId>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }
}

/// One persisted message as reported by the history service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: MessageId,
    pub content: String,
    #[serde(default, alias = "senderId")]
    pub sender_id: Option<ParticipantId>,
}

/// Lifecycle state of the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
    /// Closed by a transport failure.
    Failed { message: String },
}

impl ConnectionState {
    /// `Opening` or `Open`.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Opening | Self::Open)
    }
}

/// Identity of one live channel bound to one conversation and one viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHandle {
    /// Engine-unique id; transport events carry it back.
    pub id: u64,
    pub key: ConversationKey,
    pub self_id: ParticipantId,
}

/// Read-only snapshot of the active timeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineView {
    pub key: Option<ConversationKey>,
    pub records: Vec<MessageRecord>,
}

/// Command channel input accepted by the session runtime.
#[derive(Debug)]
pub enum SessionCommand {
    /// Make `peer` the active conversation.
    SelectConversation { peer: Peer },
    /// Write text to the open channel; the reply carries the validation result.
    Send {
        text: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Close the channel and discard the timeline.
    Teardown,
}

/// Event channel output emitted by the session runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new conversation became active; its timeline starts empty.
    ConversationSelected { key: ConversationKey },
    /// Full timeline replacement for the active conversation.
    TimelineUpdated {
        key: ConversationKey,
        records: Vec<MessageRecord>,
    },
    /// Live channel lifecycle transition.
    ConnectionStateChanged {
        key: ConversationKey,
        state: ConnectionState,
    },
    /// Per-operation error notification.
    Error { error: SessionError },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_digit_strings_as_numeric_ids() {
        assert_eq!(
            ParticipantId::parse(" 42 ").expect("id"),
            ParticipantId::Numeric(42)
        );
        assert_eq!(
            ParticipantId::parse("alice").expect("id"),
            ParticipantId::Text("alice".into())
        );
        assert!(ParticipantId::parse("   ").is_err());
    }

    #[test]
    fn numeric_ids_order_numerically_and_before_text() {
        assert!(ParticipantId::Numeric(9) < ParticipantId::Numeric(10));
        assert!(ParticipantId::Text("10".into()) < ParticipantId::Text("9".into()));
        assert!(ParticipantId::Numeric(u64::MAX) < ParticipantId::Text("a".into()));
    }

    #[test]
    fn history_entry_accepts_numeric_string_and_missing_sender() {
        let entries: Vec<HistoryEntry> = serde_json::from_str(
            r#"[
                {"id": 1, "content": "a", "sender_id": 2},
                {"id": 2, "content": "b", "sender_id": "7"},
                {"id": 3, "content": "c", "senderId": "bob"},
                {"id": 4, "content": "d", "timestamp": "2024-01-01T00:00:00"}
            ]"#,
        )
        .expect("history should decode");

        assert_eq!(entries[0].sender_id, Some(ParticipantId::Numeric(2)));
        assert_eq!(entries[1].sender_id, Some(ParticipantId::Numeric(7)));
        assert_eq!(entries[2].sender_id, Some(ParticipantId::Text("bob".into())));
        assert_eq!(entries[3].sender_id, None);
    }

    #[test]
    fn participant_id_serializes_as_plain_scalar() {
        assert_eq!(
            serde_json::to_string(&ParticipantId::Numeric(3)).expect("encode"),
            "3"
        );
        assert_eq!(
            serde_json::to_string(&ParticipantId::Text("bob".into())).expect("encode"),
            "\"bob\""
        );
    }
}
