//! Connection registry: identity, connection handle and room bookkeeping
//!
//! The registry is the only owner of these maps; callers go through its
//! methods and never see the raw collections.

use crate::protocol::{ConnectionHandle, Identity, RoomId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// What a joined connection is bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub identity: Identity,
    pub room: RoomId,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Registry {
    /// identity -> handle currently speaking for it
    handles: HashMap<Identity, ConnectionHandle>,
    /// handle -> identity and room it joined with
    bindings: HashMap<ConnectionHandle, Binding>,
    /// room -> handles in that room
    rooms: HashMap<RoomId, HashSet<ConnectionHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handle` to `identity` in `room`. Last writer wins.
    ///
    /// A previous binding of `handle` is replaced. If `identity` was bound to
    /// another handle, that handle loses its binding entirely and is
    /// returned.
    pub fn register(
        &mut self,
        identity: Identity,
        handle: ConnectionHandle,
        room: RoomId,
    ) -> Option<ConnectionHandle> {
        self.unregister(handle);

        let evicted = match self.handles.get(&identity) {
            Some(&previous) if previous != handle => {
                self.unregister(previous);
                Some(previous)
            }
            _ => None,
        };

        self.handles.insert(identity.clone(), handle);
        self.rooms.entry(room.clone()).or_default().insert(handle);
        self.bindings.insert(handle, Binding { identity, room });
        evicted
    }

    /// Remove every entry keyed by or pointing at `handle`.
    ///
    /// Returns the binding that was removed; unknown handles are a no-op.
    pub fn unregister(&mut self, handle: ConnectionHandle) -> Option<Binding> {
        let binding = self.bindings.remove(&handle)?;

        if self.handles.get(&binding.identity) == Some(&handle) {
            self.handles.remove(&binding.identity);
        }
        if let Some(occupants) = self.rooms.get_mut(&binding.room) {
            occupants.remove(&handle);
            if occupants.is_empty() {
                self.rooms.remove(&binding.room);
            }
        }
        Some(binding)
    }

    pub fn lookup_handle(&self, identity: &Identity) -> Option<ConnectionHandle> {
        self.handles.get(identity).copied()
    }

    pub fn room_of(&self, handle: ConnectionHandle) -> Option<&RoomId> {
        self.bindings.get(&handle).map(|binding| &binding.room)
    }

    pub fn identity_of(&self, handle: ConnectionHandle) -> Option<&Identity> {
        self.bindings.get(&handle).map(|binding| &binding.identity)
    }

    pub fn is_registered(&self, handle: ConnectionHandle) -> bool {
        self.bindings.contains_key(&handle)
    }

    /// Handles currently in `room`
    pub fn occupants(&self, room: &RoomId) -> impl Iterator<Item = ConnectionHandle> + '_ {
        self.rooms.get(room).into_iter().flatten().copied()
    }

    /// Number of non-empty rooms
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
