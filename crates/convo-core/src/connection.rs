use crate::{
    error::SessionError,
    types::{ConnectionHandle, ConnectionState, ConversationKey, ParticipantId},
};

/// Lifecycle owner of the single live channel of an engine.
///
/// Every transition that comes from the transport names the handle it belongs
/// to; callers check [`ConnectionManager::is_current`] first so events from an
/// abandoned handle never reach the timeline.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    state: ConnectionState,
    handle: Option<ConnectionHandle>,
    next_handle_id: u64,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self {
            state: ConnectionState::Closed,
            handle: None,
            next_handle_id: 1,
        }
    }
}

impl ConnectionManager {
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn handle(&self) -> Option<&ConnectionHandle> {
        self.handle.as_ref()
    }

    pub fn is_current(&self, handle_id: u64) -> bool {
        self.handle.as_ref().is_some_and(|handle| handle.id == handle_id)
    }

    /// Handle that may carry outbound text right now.
    pub fn open_handle(&self) -> Option<&ConnectionHandle> {
        match self.state {
            ConnectionState::Open => self.handle.as_ref(),
            _ => None,
        }
    }

    /// `Closed | Failed --open--> Opening`.
    pub fn open(
        &mut self,
        key: ConversationKey,
        self_id: ParticipantId,
    ) -> Result<ConnectionHandle, SessionError> {
        if self.state.is_live() {
            return Err(SessionError::invalid_state(&self.state, "open"));
        }

        let handle = ConnectionHandle {
            id: self.next_handle_id,
            key,
            self_id,
        };
        self.next_handle_id = self.next_handle_id.saturating_add(1);
        self.handle = Some(handle.clone());
        self.state = ConnectionState::Opening;
        Ok(handle)
    }

    /// `Opening --onReady--> Open`.
    pub fn on_ready(&mut self, handle_id: u64) -> Result<(), SessionError> {
        self.require_current(handle_id, "on_ready")?;
        if self.state != ConnectionState::Opening {
            return Err(SessionError::invalid_state(&self.state, "on_ready"));
        }
        self.state = ConnectionState::Open;
        Ok(())
    }

    /// Whether a frame for `handle_id` may be delivered.
    pub fn accepts_frame(&self, handle_id: u64) -> bool {
        self.is_current(handle_id) && self.state == ConnectionState::Open
    }

    /// `Open | Opening --onTransportError--> Failed`.
    ///
    /// Returns the channel error to surface.
    pub fn on_transport_error(
        &mut self,
        handle_id: u64,
        message: impl Into<String>,
    ) -> Result<SessionError, SessionError> {
        self.require_current(handle_id, "on_transport_error")?;
        if !self.state.is_live() {
            return Err(SessionError::invalid_state(&self.state, "on_transport_error"));
        }

        let message = message.into();
        self.state = ConnectionState::Failed {
            message: message.clone(),
        };
        Ok(SessionError::channel(message))
    }

    /// Explicit teardown from any state. Returns the handle that was released.
    pub fn close(&mut self) -> Option<ConnectionHandle> {
        self.state = ConnectionState::Closed;
        self.handle.take()
    }

    fn require_current(&self, handle_id: u64, action: &str) -> Result<(), SessionError> {
        if self.is_current(handle_id) {
            Ok(())
        } else {
            Err(SessionError::invalid_state(
                &self.state,
                format!("{action} for stale handle {handle_id}"),
            ))
        }
    }
}
