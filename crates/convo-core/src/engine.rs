//! Sans-IO orchestrator for the active conversation.
//!
//! The engine never performs I/O. `select_conversation` hands back what the
//! driver has to fetch and open; the driver reports completions through the
//! `complete_history`/`on_*` methods, each tagged with the ticket or handle id
//! it was issued for so late results from an abandoned conversation are dropped.

use tracing::{debug, info, warn};

use crate::{
    connection::ConnectionManager,
    error::{SessionError, SessionErrorKind},
    frame::{FrameParser, IngestClock},
    history::normalize_history,
    room_identity::compute_key,
    timeline::Timeline,
    types::{
        ConnectionHandle, ConnectionState, ConversationKey, HistoryEntry, MessageRecord,
        ParticipantId, Peer, TimelineView,
    },
};

/// Default number of records kept per timeline.
pub const DEFAULT_TIMELINE_MAX_ITEMS: usize = 1_200;

/// Identifies one in-flight history load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub key: ConversationKey,
    pub generation: u64,
}

/// Work the driver must carry out after a conversation switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationPlan {
    pub key: ConversationKey,
    /// History to fetch and report through `complete_history`.
    pub load: LoadTicket,
    /// Channel to open once history has been merged.
    pub connect: ConnectionHandle,
    /// Channel released by the switch, if one was live.
    pub closed: Option<ConnectionHandle>,
}

/// Result of reporting a history load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    Applied { merged: usize },
    /// The timeline stays as is; the conversation remains usable.
    Unavailable(SessionError),
    /// The ticket no longer matches the active conversation; nothing changed.
    Stale,
}

/// Validated text ready to be written to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub handle_id: u64,
    pub text: String,
}

#[derive(Debug, Clone)]
struct ActiveConversation {
    peer: Peer,
    key: ConversationKey,
    generation: u64,
    history_pending: bool,
}

/// Owns the timeline and the live channel of the selected conversation.
#[derive(Debug, Clone)]
pub struct SessionEngine {
    self_id: ParticipantId,
    active: Option<ActiveConversation>,
    timeline: Timeline,
    connection: ConnectionManager,
    parser: FrameParser,
    generation: u64,
}

impl SessionEngine {
    pub fn new(self_id: ParticipantId, timeline_max_items: usize) -> Self {
        Self::with_clock(self_id, timeline_max_items, IngestClock::default())
    }

    /// Engine with a custom ingestion clock for live ids.
    pub fn with_clock(self_id: ParticipantId, timeline_max_items: usize, clock: IngestClock) -> Self {
        Self {
            self_id,
            active: None,
            timeline: Timeline::new(timeline_max_items),
            connection: ConnectionManager::default(),
            parser: FrameParser::new(clock),
            generation: 0,
        }
    }

    pub fn self_id(&self) -> &ParticipantId {
        &self.self_id
    }

    pub fn active_key(&self) -> Option<&ConversationKey> {
        self.active.as_ref().map(|active| &active.key)
    }

    pub fn active_peer(&self) -> Option<&Peer> {
        self.active.as_ref().map(|active| &active.peer)
    }

    pub fn connection_state(&self) -> &ConnectionState {
        self.connection.state()
    }

    pub fn records(&self) -> &[MessageRecord] {
        self.timeline.records()
    }

    /// Read-only snapshot of the active timeline.
    pub fn timeline(&self) -> TimelineView {
        TimelineView {
            key: self.active_key().cloned(),
            records: self.timeline.records().to_vec(),
        }
    }

    /// Switch to the conversation with `peer`.
    ///
    /// Clears the timeline and releases the previous channel before anything
    /// for the new key is issued. An invalid peer leaves the engine untouched.
    pub fn select_conversation(&mut self, peer: &Peer) -> Result<ConversationPlan, SessionError> {
        let key = compute_key(&self.self_id, &peer.id)?;

        self.timeline.clear();
        let closed = self.connection.close();
        self.generation = self.generation.saturating_add(1);
        self.active = Some(ActiveConversation {
            peer: peer.clone(),
            key: key.clone(),
            generation: self.generation,
            history_pending: true,
        });

        let connect = self.connection.open(key.clone(), self.self_id.clone())?;
        info!(
            key = %key,
            handle_id = connect.id,
            released = ?closed.as_ref().map(|handle| handle.id),
            "conversation selected"
        );

        Ok(ConversationPlan {
            load: LoadTicket {
                key: key.clone(),
                generation: self.generation,
            },
            key,
            connect,
            closed,
        })
    }

    /// Report the result of the history load issued for `ticket`.
    pub fn complete_history(
        &mut self,
        ticket: &LoadTicket,
        result: Result<Vec<HistoryEntry>, SessionError>,
    ) -> HistoryOutcome {
        let Some(active) = self.active.as_mut().filter(|active| {
            active.history_pending && active.generation == ticket.generation && active.key == ticket.key
        }) else {
            debug!(key = %ticket.key, generation = ticket.generation, "dropping stale history result");
            return HistoryOutcome::Stale;
        };
        active.history_pending = false;

        match result {
            Ok(entries) => {
                let records = normalize_history(entries, &self.self_id);
                if let Some(last) = records.last() {
                    self.parser.observe(last.id);
                }
                let merged = self.timeline.merge(records);
                debug!(key = %ticket.key, merged, total = self.timeline.len(), "history merged");
                HistoryOutcome::Applied { merged }
            }
            Err(err) => {
                let err = if err.kind == SessionErrorKind::HistoryUnavailable {
                    err
                } else {
                    SessionError::history_unavailable(err.message)
                };
                warn!(key = %ticket.key, error = %err, "history unavailable; continuing live-only");
                HistoryOutcome::Unavailable(err)
            }
        }
    }

    /// The transport confirmed the channel for `handle_id` is open.
    pub fn on_channel_ready(&mut self, handle_id: u64) -> bool {
        if !self.connection.is_current(handle_id) {
            debug!(handle_id, "ignoring ready for stale handle");
            return false;
        }
        match self.connection.on_ready(handle_id) {
            Ok(()) => {
                info!(handle_id, key = ?self.active_key().map(ToString::to_string), "live channel open");
                true
            }
            Err(err) => {
                warn!(handle_id, error = %err, "unexpected ready notification");
                false
            }
        }
    }

    /// Deliver one raw frame. Returns the record when it was appended.
    pub fn on_frame(&mut self, handle_id: u64, raw: &str) -> Option<MessageRecord> {
        if !self.connection.accepts_frame(handle_id) {
            debug!(handle_id, "dropping frame for stale or unopened handle");
            return None;
        }
        let peer_id = self.active.as_ref()?.peer.id.clone();

        let record = self.parser.parse(raw, &self.self_id, &peer_id);
        if self.timeline.append(record.clone()) {
            Some(record)
        } else {
            None
        }
    }

    /// The transport failed. Returns the channel error to surface.
    pub fn on_transport_error(&mut self, handle_id: u64, message: &str) -> Option<SessionError> {
        if !self.connection.is_current(handle_id) {
            debug!(handle_id, "ignoring transport error for stale handle");
            return None;
        }
        match self.connection.on_transport_error(handle_id, message) {
            Ok(err) => {
                warn!(handle_id, error = %err, "live channel failed");
                Some(err)
            }
            Err(err) => {
                debug!(handle_id, error = %err, "transport error after channel left live state");
                None
            }
        }
    }

    /// The remote side ended the channel.
    pub fn on_channel_closed(&mut self, handle_id: u64) -> Option<SessionError> {
        self.on_transport_error(handle_id, "live channel closed by server")
    }

    /// Validate `text` for the open channel. Fire-and-forget: the caller
    /// writes the returned frame and nothing is acknowledged.
    pub fn send(&self, text: &str) -> Result<OutboundFrame, SessionError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(SessionError::empty_message());
        }
        let handle = self
            .connection
            .open_handle()
            .ok_or_else(SessionError::not_connected)?;

        Ok(OutboundFrame {
            handle_id: handle.id,
            text: trimmed.to_owned(),
        })
    }

    /// Release the channel and discard the timeline.
    pub fn teardown(&mut self) -> Option<ConnectionHandle> {
        self.timeline.clear();
        self.active = None;
        self.generation = self.generation.saturating_add(1);
        let closed = self.connection.close();
        if let Some(handle) = &closed {
            info!(handle_id = handle.id, key = %handle.key, "engine torn down");
        }
        closed
    }
}
