use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};

use crate::{
    error::{SessionError, SessionErrorKind},
    types::{SessionCommand, SessionEvent, TimelineView},
};

/// Broadcast event stream type used by UI subscribers.
pub type EventStream = broadcast::Receiver<SessionEvent>;

/// Errors returned by session channel operations.
#[derive(Debug, Error)]
pub enum SessionChannelError {
    /// The command receiver side is closed.
    #[error("command channel is closed")]
    CommandChannelClosed,
    /// The runtime dropped a reply without answering.
    #[error("runtime dropped the reply")]
    ReplyDropped,
}

impl From<SessionChannelError> for SessionError {
    fn from(err: SessionChannelError) -> Self {
        SessionError::new(SessionErrorKind::Internal, err.to_string())
    }
}

/// Caller side of the command/event/timeline channels.
///
/// The runtime never holds one of these, so dropping every clone closes the
/// command channel and ends the runtime.
#[derive(Clone, Debug)]
pub struct SessionChannels {
    command_tx: mpsc::Sender<SessionCommand>,
    event_tx: broadcast::Sender<SessionEvent>,
    timeline_rx: watch::Receiver<TimelineView>,
}

/// Runtime side: publishes events and timeline snapshots.
#[derive(Debug)]
pub struct SessionPublisher {
    event_tx: broadcast::Sender<SessionEvent>,
    timeline_tx: watch::Sender<TimelineView>,
}

impl SessionChannels {
    /// Create a new channel set with its publisher and command receiver.
    pub fn new(
        command_buffer: usize,
        event_buffer: usize,
    ) -> (Self, SessionPublisher, mpsc::Receiver<SessionCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        let (timeline_tx, timeline_rx) = watch::channel(TimelineView::default());

        (
            Self {
                command_tx,
                event_tx: event_tx.clone(),
                timeline_rx,
            },
            SessionPublisher {
                event_tx,
                timeline_tx,
            },
            command_rx,
        )
    }

    /// Subscribe to emitted session events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Latest published timeline snapshot.
    pub fn timeline(&self) -> TimelineView {
        self.timeline_rx.borrow().clone()
    }

    /// Receiver that is notified whenever the timeline snapshot changes.
    pub fn watch_timeline(&self) -> watch::Receiver<TimelineView> {
        self.timeline_rx.clone()
    }

    /// Send one command to the runtime.
    pub async fn send_command(&self, command: SessionCommand) -> Result<(), SessionChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SessionChannelError::CommandChannelClosed)
    }
}

impl SessionPublisher {
    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Replace the published timeline snapshot.
    pub fn publish_timeline(&self, view: TimelineView) {
        self.timeline_tx.send_replace(view);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{room_identity::compute_key, types::Peer};

    #[tokio::test]
    async fn sends_commands_to_receiver() {
        let (channels, _publisher, mut rx) = SessionChannels::new(8, 8);
        channels
            .send_command(SessionCommand::SelectConversation { peer: Peer::new(2) })
            .await
            .expect("command send should work");

        let cmd = rx.recv().await.expect("receiver should have a command");
        match cmd {
            SessionCommand::SelectConversation { peer } => assert_eq!(peer, Peer::new(2)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fans_out_events_to_subscribers() {
        let (channels, publisher, _rx) = SessionChannels::new(4, 16);
        let mut a = channels.subscribe();
        let mut b = channels.subscribe();

        publisher.emit(SessionEvent::ConversationSelected {
            key: compute_key(&1.into(), &2.into()).expect("key"),
        });

        let event_a = a.recv().await.expect("subscriber a should receive event");
        let event_b = b.recv().await.expect("subscriber b should receive event");
        assert_eq!(event_a, event_b);
    }

    #[tokio::test]
    async fn publishes_timeline_snapshots_without_subscribers() {
        let (channels, publisher, _rx) = SessionChannels::new(4, 4);
        let mut watcher = channels.watch_timeline();
        let key = compute_key(&1.into(), &2.into()).expect("key");

        publisher.publish_timeline(TimelineView {
            key: Some(key.clone()),
            records: Vec::new(),
        });

        watcher.changed().await.expect("watch should be notified");
        assert_eq!(channels.timeline().key, Some(key));
    }

    #[tokio::test]
    async fn reports_closed_command_channel() {
        let (channels, _publisher, rx) = SessionChannels::new(1, 1);
        drop(rx);
        let err = channels
            .send_command(SessionCommand::Teardown)
            .await
            .expect_err("closed receiver must fail");
        assert!(matches!(err, SessionChannelError::CommandChannelClosed));
    }

    #[tokio::test]
    async fn command_receiver_closes_when_callers_are_dropped() {
        let (channels, publisher, mut rx) = SessionChannels::new(1, 1);
        let other = channels.clone();
        drop(channels);
        drop(other);

        assert!(rx.recv().await.is_none());
        publisher.emit(SessionEvent::Error {
            error: SessionError::not_connected(),
        });
    }
}
