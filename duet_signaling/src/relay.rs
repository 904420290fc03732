//! Room relay: connection mailboxes, join broadcasts and signal routing
//!
//! The relay owns the [`Registry`] and one outbound mailbox per accepted
//! transport connection. Every operation completes its registry update and
//! all resulting deliveries in the same `&mut self` call, so a handle that
//! has been unregistered can never be resolved by a later relay.

use crate::error::SignalingError;
use crate::protocol::{
    ClientEvent, ConnectionHandle, Identity, RoomId, ServerEvent, SessionDescription, SignalKind,
    SignalTarget,
};
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Why a participant stopped occupying its room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// Explicit `leave` from the client
    Left,
    /// Transport connection closed
    Disconnected,
    /// No poll or signal within the idle timeout
    IdleTimeout,
}

impl fmt::Display for Departure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Departure::Left => f.write_str("left"),
            Departure::Disconnected => f.write_str("disconnected"),
            Departure::IdleTimeout => f.write_str("idle timeout"),
        }
    }
}

/// Accepted transport connection with its pending events
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Connection {
    events: VecDeque<ServerEvent>,
    /// Unix time in milliseconds of the last poll or signal
    last_seen: u64,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Relay {
    registry: Registry,
    connections: HashMap<ConnectionHandle, Connection>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn is_connected(&self, handle: ConnectionHandle) -> bool {
        self.connections.contains_key(&handle)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Accept a new transport connection. Its first event is the assigned handle.
    pub fn connect(&mut self, now: u64) -> ConnectionHandle {
        let handle = ConnectionHandle::new_v4();
        let connection = Connection {
            events: VecDeque::from([ServerEvent::HandleAssigned(handle)]),
            last_seen: now,
        };
        self.connections.insert(handle, connection);
        info!(%handle, "connection accepted");
        handle
    }

    /// Drain the pending events of a connection
    pub fn poll(
        &mut self,
        handle: ConnectionHandle,
        now: u64,
    ) -> Result<Vec<ServerEvent>, SignalingError> {
        let connection = self
            .connections
            .get_mut(&handle)
            .ok_or(SignalingError::UnknownConnection(handle))?;
        connection.last_seen = now;
        Ok(connection.events.drain(..).collect())
    }

    /// Route one client event. The only error is an unknown sender.
    pub fn dispatch(
        &mut self,
        sender: ConnectionHandle,
        event: ClientEvent,
        now: u64,
    ) -> Result<(), SignalingError> {
        let connection = self
            .connections
            .get_mut(&sender)
            .ok_or(SignalingError::UnknownConnection(sender))?;
        connection.last_seen = now;

        debug!(%sender, event = event.event_name(), "dispatching client event");
        match event {
            ClientEvent::JoinRoom { identity, room } => self.join(sender, room, identity),
            ClientEvent::CallOffer { to, offer } => {
                self.relay_signal(sender, SignalKind::CallOffer, to, offer);
            }
            ClientEvent::CallAnswer { to, answer } => {
                self.relay_signal(sender, SignalKind::CallAnswer, to, answer);
            }
            ClientEvent::RenegotiationOffer { to, offer } => {
                self.relay_signal(sender, SignalKind::RenegotiationOffer, to, offer);
            }
            ClientEvent::RenegotiationAnswer { to, answer } => {
                self.relay_signal(sender, SignalKind::RenegotiationAnswer, to, answer);
            }
            ClientEvent::Leave { room } => {
                if let Some(registered) = self.registry.room_of(sender) {
                    if *registered != room {
                        warn!(%sender, requested = %room, registered = %registered, "leave names a different room; using the registered one");
                    }
                }
                self.leave(sender, Departure::Left);
            }
        }
        Ok(())
    }

    /// Bind `sender` into `room`, announce it to the other occupants and
    /// echo the join back to the sender.
    pub fn join(&mut self, sender: ConnectionHandle, room: RoomId, identity: Identity) {
        let moved_rooms = self
            .registry
            .room_of(sender)
            .is_some_and(|previous| *previous != room);
        if moved_rooms {
            self.leave(sender, Departure::Left);
        }

        // A previous connection of the same identity is evicted below and
        // must not hear about its own replacement.
        let replaced = self.registry.lookup_handle(&identity);
        let others: Vec<ConnectionHandle> = self
            .registry
            .occupants(&room)
            .filter(|occupant| *occupant != sender && Some(*occupant) != replaced)
            .collect();
        let announcement = ServerEvent::PeerJoined {
            identity: identity.clone(),
            sender_handle: sender,
        };
        for other in &others {
            self.deliver(*other, announcement.clone());
        }

        if let Some(evicted) = self.registry.register(identity.clone(), sender, room.clone()) {
            info!(%identity, %evicted, "identity rebound to a new connection");
        }
        info!(%sender, %identity, %room, occupants = others.len() + 1, "joined room");

        self.deliver(sender, ServerEvent::JoinRoom { identity, room });
    }

    /// Forward a signal to `target` with `from` set to the sender.
    ///
    /// Returns false when the target is not a joined connection; the message
    /// is dropped without telling the sender.
    pub fn relay_signal(
        &mut self,
        sender: ConnectionHandle,
        kind: SignalKind,
        target: SignalTarget,
        body: SessionDescription,
    ) -> bool {
        let Some(receiver) = self.resolve(&target) else {
            debug!(%sender, %target, event = kind.event_name(), "target not connected, dropping signal");
            return false;
        };
        self.deliver(receiver, kind.deliver(sender, body))
    }

    /// Notify the other occupants that `handle` left and unregister it.
    ///
    /// Returns false if the handle was not in a room (nobody is notified).
    pub fn leave(&mut self, handle: ConnectionHandle, reason: Departure) -> bool {
        let Some(binding) = self.registry.unregister(handle) else {
            debug!(%handle, %reason, "leave from a connection outside any room");
            return false;
        };

        let others: Vec<ConnectionHandle> = self.registry.occupants(&binding.room).collect();
        for other in &others {
            self.deliver(*other, ServerEvent::PeerLeft);
        }
        info!(%handle, identity = %binding.identity, room = %binding.room, %reason, notified = others.len(), "left room");
        true
    }

    /// Close a transport connection, with the same cleanup as `leave`
    pub fn disconnect(&mut self, handle: ConnectionHandle, reason: Departure) -> bool {
        self.leave(handle, reason);
        let known = self.connections.remove(&handle).is_some();
        if known {
            info!(%handle, %reason, "connection closed");
        }
        known
    }

    /// Disconnect every connection idle for longer than `timeout`
    pub fn reap_idle(&mut self, now: u64, timeout: Duration) -> Vec<ConnectionHandle> {
        let timeout = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let stale: Vec<ConnectionHandle> = self
            .connections
            .iter()
            .filter(|(_, connection)| now.saturating_sub(connection.last_seen) > timeout)
            .map(|(handle, _)| *handle)
            .collect();

        for handle in &stale {
            self.disconnect(*handle, Departure::IdleTimeout);
        }
        stale
    }

    /// A handle target must be joined; an identity target resolves through the registry.
    fn resolve(&self, target: &SignalTarget) -> Option<ConnectionHandle> {
        match target {
            SignalTarget::Handle(handle) => {
                self.registry.is_registered(*handle).then_some(*handle)
            }
            SignalTarget::Identity(identity) => self.registry.lookup_handle(identity),
        }
    }

    fn deliver(&mut self, receiver: ConnectionHandle, event: ServerEvent) -> bool {
        match self.connections.get_mut(&receiver) {
            Some(connection) => {
                connection.events.push_back(event);
                true
            }
            None => {
                debug!(%receiver, event = event.event_name(), "no mailbox for receiver");
                false
            }
        }
    }
}
