//! Best-effort attribution of raw live-channel frames.
//!
//! Frames carry no envelope. The server broadcasts `User <id>: <text>`, and
//! presence lines such as `User <id> left the chat`. Attribution splits on the
//! first colon, so a body that itself contains a colon is still attributed by
//! its prefix, and a prefix-less body containing a colon may be misattributed
//! to the peer. Structured sender-tagged frames would remove this ambiguity.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::{MessageId, MessageOrigin, MessageRecord, ParticipantId, Sender};

const USER_PREFIX: &str = "user ";
const SELF_ALIASES: [&str; 2] = ["you", "me"];

/// Assigns strictly increasing ingestion ids from local wall-clock time.
#[derive(Debug, Clone)]
pub struct IngestClock {
    last: MessageId,
    now_ms: fn() -> u64,
}

impl Default for IngestClock {
    fn default() -> Self {
        Self::with_source(unix_now_ms)
    }
}

impl IngestClock {
    /// Clock backed by a custom millisecond source.
    pub fn with_source(now_ms: fn() -> u64) -> Self {
        Self { last: 0, now_ms }
    }

    /// Raise the floor so the next id sorts after `id`.
    pub fn observe(&mut self, id: MessageId) {
        self.last = self.last.max(id);
    }

    /// Next ingestion id: current time, bumped past every id seen so far.
    pub fn next_id(&mut self) -> MessageId {
        let next = (self.now_ms)().max(self.last.saturating_add(1));
        self.last = next;
        next
    }
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}

/// Converts raw frames into attributed live records. Never fails.
#[derive(Debug, Clone, Default)]
pub struct FrameParser {
    clock: IngestClock,
}

impl FrameParser {
    pub fn new(clock: IngestClock) -> Self {
        Self { clock }
    }

    /// Make subsequent live ids sort after `id`.
    pub fn observe(&mut self, id: MessageId) {
        self.clock.observe(id);
    }

    pub fn parse(
        &mut self,
        raw: &str,
        self_id: &ParticipantId,
        peer_hint: &ParticipantId,
    ) -> MessageRecord {
        let (sender, is_self, content) = match raw.split_once(':') {
            Some((prefix, body)) => {
                let content = body.trim_start().to_owned();
                if is_self_marker(prefix, self_id) {
                    (Sender::Participant(self_id.clone()), true, content)
                } else {
                    (Sender::Participant(peer_hint.clone()), false, content)
                }
            }
            None => (Sender::Unknown, false, raw.to_owned()),
        };

        MessageRecord {
            id: self.clock.next_id(),
            content,
            sender,
            is_self,
            origin: MessageOrigin::Live,
        }
    }
}

fn is_self_marker(prefix: &str, self_id: &ParticipantId) -> bool {
    let prefix = prefix.trim().to_ascii_lowercase();
    let own = self_id.to_string().to_ascii_lowercase();

    if prefix == own || SELF_ALIASES.contains(&prefix.as_str()) {
        return true;
    }

    prefix
        .strip_prefix(USER_PREFIX)
        .is_some_and(|rest| rest.trim() == own)
}
