//! Signaling message types shared by the relay and the negotiation machine
//!
//! Every message on the wire is a JSON object tagged with its event name:
//!
//! ```json
//! {"event": "call-offer", "payload": {"to": "<uuid>", "offer": {"type": "offer", "sdp": "..."}}}
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Transport-assigned identifier of one live signaling connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionHandle(pub Uuid);

impl ConnectionHandle {
    /// Allocate a fresh random handle
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for ConnectionHandle {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConnectionHandle {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Participant identity chosen by the client (e.g. an email address)
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub String);

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Room identifier
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description in the shape browsers hand out (`{type, sdp}`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Addressee of a relayed signal.
///
/// A string that parses as a UUID is taken as a connection handle, anything
/// else as a participant identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalTarget {
    Handle(ConnectionHandle),
    Identity(Identity),
}

impl From<ConnectionHandle> for SignalTarget {
    fn from(handle: ConnectionHandle) -> Self {
        Self::Handle(handle)
    }
}

impl From<Identity> for SignalTarget {
    fn from(identity: Identity) -> Self {
        Self::Identity(identity)
    }
}

impl fmt::Display for SignalTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalTarget::Handle(handle) => handle.fmt(f),
            SignalTarget::Identity(identity) => identity.fmt(f),
        }
    }
}

/// Events sent by a participant to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom {
        identity: Identity,
        room: RoomId,
    },
    CallOffer {
        to: SignalTarget,
        offer: SessionDescription,
    },
    CallAnswer {
        to: SignalTarget,
        answer: SessionDescription,
    },
    RenegotiationOffer {
        to: SignalTarget,
        offer: SessionDescription,
    },
    RenegotiationAnswer {
        to: SignalTarget,
        answer: SessionDescription,
    },
    Leave {
        room: RoomId,
    },
}

impl ClientEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom { .. } => "join-room",
            ClientEvent::CallOffer { .. } => SignalKind::CallOffer.event_name(),
            ClientEvent::CallAnswer { .. } => SignalKind::CallAnswer.event_name(),
            ClientEvent::RenegotiationOffer { .. } => SignalKind::RenegotiationOffer.event_name(),
            ClientEvent::RenegotiationAnswer { .. } => SignalKind::RenegotiationAnswer.event_name(),
            ClientEvent::Leave { .. } => "leave",
        }
    }
}

impl FromStr for ClientEvent {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

/// Events delivered by the relay to a participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// First event on every connection: the handle the relay assigned to it
    HandleAssigned(ConnectionHandle),
    /// Echo of the joiner's own `join-room` request
    JoinRoom {
        identity: Identity,
        room: RoomId,
    },
    PeerJoined {
        identity: Identity,
        #[serde(rename = "senderHandle")]
        sender_handle: ConnectionHandle,
    },
    CallOffer {
        from: ConnectionHandle,
        offer: SessionDescription,
    },
    CallAnswer {
        from: ConnectionHandle,
        answer: SessionDescription,
    },
    RenegotiationOffer {
        from: ConnectionHandle,
        offer: SessionDescription,
    },
    RenegotiationAnswer {
        from: ConnectionHandle,
        answer: SessionDescription,
    },
    PeerLeft,
}

impl ServerEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::HandleAssigned(_) => "handle-assigned",
            ServerEvent::JoinRoom { .. } => "join-room",
            ServerEvent::PeerJoined { .. } => "peer-joined",
            ServerEvent::CallOffer { .. } => SignalKind::CallOffer.event_name(),
            ServerEvent::CallAnswer { .. } => SignalKind::CallAnswer.event_name(),
            ServerEvent::RenegotiationOffer { .. } => SignalKind::RenegotiationOffer.event_name(),
            ServerEvent::RenegotiationAnswer { .. } => SignalKind::RenegotiationAnswer.event_name(),
            ServerEvent::PeerLeft => "peer-left",
        }
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// The four relayed signal kinds. Initial and renegotiation exchanges use
/// distinct names so they can never be confused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    CallOffer,
    CallAnswer,
    RenegotiationOffer,
    RenegotiationAnswer,
}

impl SignalKind {
    pub fn event_name(self) -> &'static str {
        match self {
            SignalKind::CallOffer => "call-offer",
            SignalKind::CallAnswer => "call-answer",
            SignalKind::RenegotiationOffer => "renegotiation-offer",
            SignalKind::RenegotiationAnswer => "renegotiation-answer",
        }
    }

    /// Build the event the receiver sees, with `to` rewritten to `from`
    pub fn deliver(self, from: ConnectionHandle, body: SessionDescription) -> ServerEvent {
        match self {
            SignalKind::CallOffer => ServerEvent::CallOffer { from, offer: body },
            SignalKind::CallAnswer => ServerEvent::CallAnswer { from, answer: body },
            SignalKind::RenegotiationOffer => ServerEvent::RenegotiationOffer { from, offer: body },
            SignalKind::RenegotiationAnswer => {
                ServerEvent::RenegotiationAnswer { from, answer: body }
            }
        }
    }
}
