//! Server state management for the signaling relay
//!
//! [`ServerState`] is the single coordination point: a cloneable handle to one
//! mutex-guarded [`Relay`]. When a state file is configured the relay is
//! loaded before and saved after every operation, because a WASI HTTP
//! component may be instantiated fresh for each request.

use crate::config::Config;
use crate::error::SignalingError;
use crate::protocol::{ClientEvent, ConnectionHandle, Identity, RoomId, ServerEvent};
use crate::relay::{Departure, Relay};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// JSON snapshot of the relay on disk
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot. A missing file is an empty relay.
    pub fn load(&self) -> Result<Relay, SignalingError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Relay::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, relay: &Relay) -> Result<(), SignalingError> {
        let json = serde_json::to_string(relay)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// The main server state
#[derive(Clone)]
pub struct ServerState {
    relay: Arc<Mutex<Relay>>,
    store: Option<Arc<StateStore>>,
    idle_timeout: Option<Duration>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new(&Config::in_memory())
    }
}

impl ServerState {
    /// Create a new server state handle
    pub fn new(config: &Config) -> Self {
        Self {
            relay: Arc::new(Mutex::new(Relay::new())),
            store: config.state_file.clone().map(|path| Arc::new(StateStore::new(path))),
            idle_timeout: config.idle_timeout,
        }
    }

    /// Purely in-memory state without idle reaping
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Run `op` against the relay inside the critical section
    fn with_relay<R>(&self, op: impl FnOnce(&mut Relay, u64) -> R) -> R {
        let mut relay = self.relay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = &self.store {
            match store.load() {
                Ok(loaded) => *relay = loaded,
                Err(e) => warn!(path = %store.path().display(), error = %e, "failed to load relay state, starting empty"),
            }
        }

        let now = now_millis();
        if let Some(timeout) = self.idle_timeout {
            let reaped = relay.reap_idle(now, timeout);
            if !reaped.is_empty() {
                info!(count = reaped.len(), "reaped idle connections");
            }
        }

        let result = op(&mut relay, now);

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&relay) {
                warn!(path = %store.path().display(), error = %e, "failed to save relay state");
            }
        }
        result
    }

    /// Accept a new connection
    pub fn connect(&self) -> ConnectionHandle {
        self.with_relay(|relay, now| relay.connect(now))
    }

    /// Drain pending events for a connection
    pub fn poll(&self, handle: ConnectionHandle) -> Result<Vec<ServerEvent>, SignalingError> {
        self.with_relay(|relay, now| relay.poll(handle, now))
    }

    /// Poll an existing connection, or accept a new one
    ///
    /// If `handle` is None or no longer connected, a new connection is
    /// created. Returns (handle, pending_events)
    pub fn poll_or_connect(&self, handle: Option<ConnectionHandle>) -> (ConnectionHandle, Vec<ServerEvent>) {
        self.with_relay(|relay, now| {
            if let Some(handle) = handle {
                if let Ok(events) = relay.poll(handle, now) {
                    return (handle, events);
                }
            }
            let handle = relay.connect(now);
            let events = relay.poll(handle, now).unwrap_or_default();
            (handle, events)
        })
    }

    /// Handle one event sent by `sender`
    pub fn dispatch(&self, sender: ConnectionHandle, event: ClientEvent) -> Result<(), SignalingError> {
        self.with_relay(|relay, now| relay.dispatch(sender, event, now))
    }

    /// Close a connection as if its transport dropped
    pub fn disconnect(&self, handle: ConnectionHandle) -> bool {
        self.with_relay(|relay, _| relay.disconnect(handle, Departure::Disconnected))
    }

    pub fn lookup_handle(&self, identity: &Identity) -> Option<ConnectionHandle> {
        self.with_relay(|relay, _| relay.registry().lookup_handle(identity))
    }

    pub fn room_of(&self, handle: ConnectionHandle) -> Option<RoomId> {
        self.with_relay(|relay, _| relay.registry().room_of(handle).cloned())
    }

    /// Get all connections in a room
    pub fn room_occupants(&self, room: &RoomId) -> Vec<ConnectionHandle> {
        self.with_relay(|relay, _| relay.registry().occupants(room).collect())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
