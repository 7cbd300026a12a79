//! Tokio driver for `convo-core`.
//!
//! `spawn_runtime` owns a `SessionEngine` on a background task and feeds it
//! from a history fetcher and a live transport. Callers talk to it through a
//! cloneable [`SessionHandle`].

/// HTTP history fetching.
pub mod history;
/// Live channel transport.
pub mod transport;

use std::sync::Arc;

use convo_core::{
    ConnectionHandle, DEFAULT_TIMELINE_MAX_ITEMS, EventStream, HistoryEntry, HistoryOutcome,
    LoadTicket, ParticipantId, Peer, SessionChannelError, SessionChannels, SessionCommand,
    SessionEngine, SessionError, SessionEvent, SessionPublisher, TimelineView,
};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot, watch,
    },
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use history::{HistoryFetcher, HttpHistoryFetcher};
pub use transport::{LinkEvent, LinkPeer, LiveLink, LiveTransport, WsTransport, derive_ws_url, link_pair};

/// Sizing of the runtime's buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub timeline_max_items: usize,
    pub command_buffer: usize,
    pub event_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timeline_max_items: DEFAULT_TIMELINE_MAX_ITEMS,
            command_buffer: 128,
            event_buffer: 512,
        }
    }
}

/// Cloneable front door to a running session runtime.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    channels: SessionChannels,
}

impl SessionHandle {
    /// Queue a switch to the conversation with `peer`. Progress and failures
    /// are reported as events.
    pub async fn select_conversation(&self, peer: Peer) -> Result<(), SessionError> {
        self.channels
            .send_command(SessionCommand::SelectConversation { peer })
            .await?;
        Ok(())
    }

    /// Write `text` to the open channel of the active conversation.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.channels
            .send_command(SessionCommand::Send {
                text: text.into(),
                reply,
            })
            .await?;
        response
            .await
            .map_err(|_| SessionError::from(SessionChannelError::ReplyDropped))?
    }

    /// Close the channel and discard the timeline.
    pub async fn teardown(&self) -> Result<(), SessionError> {
        self.channels.send_command(SessionCommand::Teardown).await?;
        Ok(())
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    /// Latest published timeline snapshot.
    pub fn timeline(&self) -> TimelineView {
        self.channels.timeline()
    }

    pub fn watch_timeline(&self) -> watch::Receiver<TimelineView> {
        self.channels.watch_timeline()
    }
}

/// Start a session runtime for `self_id` on the current tokio runtime.
pub fn spawn_runtime(
    self_id: ParticipantId,
    config: RuntimeConfig,
    fetcher: Arc<dyn HistoryFetcher>,
    transport: Arc<dyn LiveTransport>,
) -> SessionHandle {
    let (channels, publisher, command_rx) =
        SessionChannels::new(config.command_buffer, config.event_buffer);
    let runtime = SessionRuntime::new(
        publisher,
        command_rx,
        SessionEngine::new(self_id, config.timeline_max_items),
        fetcher,
        transport,
    );
    tokio::spawn(async move {
        runtime.run().await;
    });

    SessionHandle { channels }
}

/// Completion reported back to the runtime loop by its helper tasks.
enum RuntimeEvent {
    HistoryLoaded {
        ticket: LoadTicket,
        result: Result<Vec<HistoryEntry>, SessionError>,
    },
    Connected {
        handle: ConnectionHandle,
        result: Result<LiveLink, SessionError>,
    },
    Link {
        handle_id: u64,
        event: LinkEvent,
    },
}

#[derive(Debug)]
struct ActiveLink {
    handle_id: u64,
    outbound: mpsc::Sender<String>,
    stop: CancellationToken,
    forward: JoinHandle<()>,
}

struct SessionRuntime {
    publisher: SessionPublisher,
    command_rx: mpsc::Receiver<SessionCommand>,
    internal_tx: mpsc::UnboundedSender<RuntimeEvent>,
    internal_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    engine: SessionEngine,
    fetcher: Arc<dyn HistoryFetcher>,
    transport: Arc<dyn LiveTransport>,
    /// Channel to open once the current history load settles.
    pending_connect: Option<ConnectionHandle>,
    link: Option<ActiveLink>,
}

impl SessionRuntime {
    fn new(
        publisher: SessionPublisher,
        command_rx: mpsc::Receiver<SessionCommand>,
        engine: SessionEngine,
        fetcher: Arc<dyn HistoryFetcher>,
        transport: Arc<dyn LiveTransport>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            publisher,
            command_rx,
            internal_tx,
            internal_rx,
            engine,
            fetcher,
            transport,
            pending_connect: None,
            link: None,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.internal_rx.recv() => self.handle_runtime_event(event),
            }
        }

        // Every handle is gone: release the channel like an explicit teardown.
        self.engine.teardown();
        self.pending_connect = None;
        self.release_link();
        info!("session runtime stopped");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SelectConversation { peer } => {
                if let Err(err) = self.handle_select(peer) {
                    self.emit_error(err);
                }
            }
            SessionCommand::Send { text, reply } => {
                let _ = reply.send(self.handle_send(&text));
            }
            SessionCommand::Teardown => self.handle_teardown(),
        }
    }

    fn handle_select(&mut self, peer: Peer) -> Result<(), SessionError> {
        let plan = self.engine.select_conversation(&peer)?;
        self.release_link();
        self.pending_connect = Some(plan.connect);

        self.publisher.publish_timeline(self.engine.timeline());
        self.publisher.emit(SessionEvent::ConversationSelected {
            key: plan.key.clone(),
        });
        self.emit_connection_state();

        let fetcher = self.fetcher.clone();
        let internal_tx = self.internal_tx.clone();
        let ticket = plan.load;
        info!(key = %ticket.key, generation = ticket.generation, "loading history");
        tokio::spawn(async move {
            let result = fetcher.fetch(&ticket.key).await;
            let _ = internal_tx.send(RuntimeEvent::HistoryLoaded { ticket, result });
        });

        Ok(())
    }

    fn handle_send(&self, text: &str) -> Result<(), SessionError> {
        let frame = self.engine.send(text)?;
        let link = self
            .link
            .as_ref()
            .filter(|link| link.handle_id == frame.handle_id)
            .ok_or_else(SessionError::not_connected)?;

        link.outbound.try_send(frame.text).map_err(|err| match err {
            TrySendError::Full(_) => SessionError::channel("live channel outbound buffer is full"),
            TrySendError::Closed(_) => SessionError::channel("live channel is no longer writable"),
        })
    }

    fn handle_teardown(&mut self) {
        let closed = self.engine.teardown();
        self.release_link();
        self.pending_connect = None;
        self.publisher.publish_timeline(TimelineView::default());

        if let Some(handle) = closed {
            self.publisher.emit(SessionEvent::ConnectionStateChanged {
                key: handle.key,
                state: self.engine.connection_state().clone(),
            });
        }
    }

    fn handle_runtime_event(&mut self, event: RuntimeEvent) {
        match event {
            RuntimeEvent::HistoryLoaded { ticket, result } => {
                match self.engine.complete_history(&ticket, result) {
                    HistoryOutcome::Stale => return,
                    HistoryOutcome::Applied { .. } => self.publish_timeline(),
                    HistoryOutcome::Unavailable(err) => self.emit_error(err),
                }
                self.start_connect();
            }
            RuntimeEvent::Connected { handle, result } => self.handle_connected(handle, result),
            RuntimeEvent::Link { handle_id, event } => self.handle_link_event(handle_id, event),
        }
    }

    fn start_connect(&mut self) {
        let Some(handle) = self.pending_connect.take() else {
            return;
        };

        let transport = self.transport.clone();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = transport.connect(&handle).await;
            let _ = internal_tx.send(RuntimeEvent::Connected { handle, result });
        });
    }

    fn handle_connected(&mut self, handle: ConnectionHandle, result: Result<LiveLink, SessionError>) {
        match result {
            Ok(link) => {
                if !self.engine.on_channel_ready(handle.id) {
                    link.stop.cancel();
                    return;
                }
                self.install_link(handle.id, link);
                self.emit_connection_state();
            }
            Err(err) => {
                let failure = self.engine.on_transport_error(handle.id, &err.message);
                self.report_link_failure(handle.id, failure);
            }
        }
    }

    fn handle_link_event(&mut self, handle_id: u64, event: LinkEvent) {
        match event {
            LinkEvent::Frame(raw) => {
                if self.engine.on_frame(handle_id, &raw).is_some() {
                    self.publish_timeline();
                }
            }
            LinkEvent::Closed => {
                let failure = self.engine.on_channel_closed(handle_id);
                self.report_link_failure(handle_id, failure);
            }
            LinkEvent::Error(message) => {
                let failure = self.engine.on_transport_error(handle_id, &message);
                self.report_link_failure(handle_id, failure);
            }
        }
    }

    fn install_link(&mut self, handle_id: u64, link: LiveLink) {
        let LiveLink {
            outbound,
            mut inbound,
            stop,
        } = link;

        let internal_tx = self.internal_tx.clone();
        let forward = tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                if internal_tx
                    .send(RuntimeEvent::Link { handle_id, event })
                    .is_err()
                {
                    break;
                }
            }
        });

        self.link = Some(ActiveLink {
            handle_id,
            outbound,
            stop,
            forward,
        });
    }

    fn release_link(&mut self) {
        if let Some(link) = self.link.take() {
            debug!(handle_id = link.handle_id, "releasing live channel");
            link.stop.cancel();
            link.forward.abort();
        }
    }

    fn report_link_failure(&mut self, handle_id: u64, failure: Option<SessionError>) {
        let Some(err) = failure else {
            return;
        };
        if self.link.as_ref().is_some_and(|link| link.handle_id == handle_id) {
            self.release_link();
        }
        self.emit_connection_state();
        self.emit_error(err);
    }

    /// Publish the snapshot first so subscribers reacting to the event read
    /// the same records from the watch.
    fn publish_timeline(&self) {
        let view = self.engine.timeline();
        self.publisher.publish_timeline(view.clone());
        if let Some(key) = view.key {
            self.publisher.emit(SessionEvent::TimelineUpdated {
                key,
                records: view.records,
            });
        }
    }

    fn emit_connection_state(&self) {
        if let Some(key) = self.engine.active_key() {
            self.publisher.emit(SessionEvent::ConnectionStateChanged {
                key: key.clone(),
                state: self.engine.connection_state().clone(),
            });
        }
    }

    fn emit_error(&self, error: SessionError) {
        self.publisher.emit(SessionEvent::Error { error });
    }
}
