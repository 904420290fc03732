//! Client side of the signaling channel

use crate::error::{ChannelError, SignalingError};
use crate::protocol::{ClientEvent, ConnectionHandle, ServerEvent};
use crate::state::ServerState;
use async_trait::async_trait;
use std::cell::Cell;

/// Ordered, per-connection event transport between a participant and the relay
#[async_trait(?Send)]
pub trait SignalingChannel {
    /// Handle the relay assigned to this connection
    fn handle(&self) -> ConnectionHandle;

    async fn send(&self, event: ClientEvent) -> Result<(), ChannelError>;

    /// Fetch every event queued for this connection since the last poll
    async fn poll(&self) -> Result<Vec<ServerEvent>, ChannelError>;

    /// Close the transport. The relay treats this as an abrupt departure.
    async fn close(&self) -> Result<(), ChannelError>;
}

/// In-process channel bound directly to a [`ServerState`]
pub struct LoopbackChannel {
    state: ServerState,
    handle: ConnectionHandle,
    closed: Cell<bool>,
}

impl LoopbackChannel {
    /// Open a new connection on `state`
    pub fn connect(state: &ServerState) -> Self {
        Self {
            state: state.clone(),
            handle: state.connect(),
            closed: Cell::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.closed.get() {
            Err(ChannelError::Closed)
        } else {
            Ok(())
        }
    }
}

fn map_signaling(error: SignalingError) -> ChannelError {
    match error {
        SignalingError::UnknownConnection(_) => ChannelError::Closed,
        other => ChannelError::Signaling(other),
    }
}

#[async_trait(?Send)]
impl SignalingChannel for LoopbackChannel {
    fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    async fn send(&self, event: ClientEvent) -> Result<(), ChannelError> {
        self.ensure_open()?;
        self.state.dispatch(self.handle, event).map_err(map_signaling)
    }

    async fn poll(&self) -> Result<Vec<ServerEvent>, ChannelError> {
        self.ensure_open()?;
        self.state.poll(self.handle).map_err(map_signaling)
    }

    async fn close(&self) -> Result<(), ChannelError> {
        if !self.closed.replace(true) {
            self.state.disconnect(self.handle);
        }
        Ok(())
    }
}
