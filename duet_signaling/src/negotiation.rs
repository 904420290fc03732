//! Offer/answer negotiation for one participant
//!
//! [`Negotiator`] is sans-IO: it consumes server events and local media
//! triggers and returns the client events to send, in order. The participant
//! already in a room is the caller and offers when a peer joins; the joiner
//! is the callee and answers an offer only once its own media is ready.
//!
//! The two triggers, "offer received" and "local media ready", can arrive in
//! either order. The offer is kept in `pending_remote_offer` until both hold,
//! and is cleared the moment it is answered, so exactly one answer goes out.

use crate::error::{MediaError, NegotiationError};
use crate::media::{LocalTrack, MediaConnection, MediaConnectionFactory, RemoteTrack, TrackKind};
use crate::protocol::{
    ClientEvent, ConnectionHandle, Identity, RoomId, ServerEvent, SessionDescription,
};
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Not in a room
    Idle,
    /// In a room, capture not finished, nobody else known
    AwaitingLocalMedia,
    /// In a room with local media, nobody else known
    WaitingForPeer,
    /// Peer known but nothing exchanged yet (caller waiting for its media)
    HasRemotePeer,
    OfferSent,
    OfferReceived,
    Connected,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::AwaitingLocalMedia => "awaiting local media",
            NegotiationState::WaitingForPeer => "waiting for peer",
            NegotiationState::HasRemotePeer => "has remote peer",
            NegotiationState::OfferSent => "offer sent",
            NegotiationState::OfferReceived => "offer received",
            NegotiationState::Connected => "connected",
        };
        f.write_str(name)
    }
}

struct Membership {
    room: RoomId,
    identity: Identity,
    confirmed: bool,
}

/// Negotiation with one remote peer. Owns its media connection.
struct Session {
    remote_peer: ConnectionHandle,
    pending_remote_offer: Option<SessionDescription>,
    offer_deferred: bool,
    renegotiating: bool,
    /// Local tracks were added to `connection`
    tracks_attached: bool,
    remote_tracks: Vec<RemoteTrack>,
    connection: Box<dyn MediaConnection>,
}

impl Session {
    fn new(remote_peer: ConnectionHandle, connection: Box<dyn MediaConnection>) -> Self {
        Self {
            remote_peer,
            pending_remote_offer: None,
            offer_deferred: false,
            renegotiating: false,
            tracks_attached: false,
            remote_tracks: Vec::new(),
            connection,
        }
    }

    fn close(mut self) {
        self.connection.close();
    }
}

/// What a local leave produced
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Teardown {
    pub events: Vec<ClientEvent>,
    /// Local tracks the capture device should stop
    pub released_tracks: Vec<LocalTrack>,
}

pub struct Negotiator {
    factory: Box<dyn MediaConnectionFactory>,
    state: NegotiationState,
    own_handle: Option<ConnectionHandle>,
    membership: Option<Membership>,
    local_tracks: Option<Vec<LocalTrack>>,
    session: Option<Session>,
}

impl Negotiator {
    pub fn new(factory: impl MediaConnectionFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            state: NegotiationState::Idle,
            own_handle: None,
            membership: None,
            local_tracks: None,
            session: None,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn own_handle(&self) -> Option<ConnectionHandle> {
        self.own_handle
    }

    pub fn room(&self) -> Option<&RoomId> {
        self.membership.as_ref().map(|m| &m.room)
    }

    /// Whether the relay echoed our join back
    pub fn join_confirmed(&self) -> bool {
        self.membership.as_ref().is_some_and(|m| m.confirmed)
    }

    pub fn remote_peer(&self) -> Option<ConnectionHandle> {
        self.session.as_ref().map(|s| s.remote_peer)
    }

    pub fn has_pending_offer(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.pending_remote_offer.is_some())
    }

    pub fn has_local_media(&self) -> bool {
        self.local_tracks.is_some()
    }

    pub fn local_tracks(&self) -> &[LocalTrack] {
        self.local_tracks.as_deref().unwrap_or_default()
    }

    pub fn remote_tracks(&self) -> &[RemoteTrack] {
        self.session
            .as_ref()
            .map(|s| s.remote_tracks.as_slice())
            .unwrap_or_default()
    }

    /// Enter `room` as `identity`
    pub fn join(&mut self, room: RoomId, identity: Identity) -> Vec<ClientEvent> {
        info!(%room, %identity, "joining room");
        self.membership = Some(Membership {
            room: room.clone(),
            identity: identity.clone(),
            confirmed: false,
        });
        if self.session.is_none() {
            self.state = self.state_without_peer();
        }
        vec![ClientEvent::JoinRoom { identity, room }]
    }

    pub async fn handle_event(
        &mut self,
        event: ServerEvent,
    ) -> Result<Vec<ClientEvent>, NegotiationError> {
        debug!(event = event.event_name(), state = %self.state, "server event");
        match event {
            ServerEvent::HandleAssigned(handle) => {
                self.own_handle = Some(handle);
                Ok(Vec::new())
            }
            ServerEvent::JoinRoom { identity, room } => {
                match self.membership.as_mut() {
                    Some(m) if m.room == room && m.identity == identity => m.confirmed = true,
                    _ => debug!(%room, "stale join confirmation"),
                }
                Ok(Vec::new())
            }
            ServerEvent::PeerJoined {
                identity,
                sender_handle,
            } => self.on_peer_joined(identity, sender_handle).await,
            ServerEvent::CallOffer { from, offer } => self.on_call_offer(from, offer).await,
            ServerEvent::CallAnswer { from, answer } => self.on_call_answer(from, answer).await,
            ServerEvent::RenegotiationOffer { from, offer } => {
                self.on_renegotiation_offer(from, offer).await
            }
            ServerEvent::RenegotiationAnswer { from, answer } => {
                self.on_renegotiation_answer(from, answer).await
            }
            ServerEvent::PeerLeft => {
                self.on_peer_left();
                Ok(Vec::new())
            }
        }
    }

    /// Local capture finished; flush whatever was waiting on it.
    ///
    /// A repeated call keeps the tracks from the first one and only retries
    /// the pending offer or answer.
    pub async fn local_media_ready(
        &mut self,
        tracks: Vec<LocalTrack>,
    ) -> Result<Vec<ClientEvent>, NegotiationError> {
        if self.local_tracks.is_some() {
            debug!(state = %self.state, "local media already ready");
        } else {
            info!(tracks = tracks.len(), state = %self.state, "local media ready");
            self.local_tracks = Some(tracks);
        }
        self.flush_pending().await
    }

    /// Send whatever offer or answer is waiting on local media, if it is ready.
    ///
    /// Retries the exchange after a media primitive failed halfway.
    pub async fn flush_pending(&mut self) -> Result<Vec<ClientEvent>, NegotiationError> {
        if self.local_tracks.is_none() {
            return Ok(Vec::new());
        }
        match self.state {
            NegotiationState::AwaitingLocalMedia => {
                self.state = NegotiationState::WaitingForPeer;
                Ok(Vec::new())
            }
            NegotiationState::HasRemotePeer
                if self.session.as_ref().is_some_and(|s| s.offer_deferred) =>
            {
                self.send_offer().await
            }
            NegotiationState::OfferReceived => self.try_answer().await,
            _ => Ok(Vec::new()),
        }
    }

    /// Capture failed. Nothing is retried and the state stays where it is.
    pub fn local_media_failed(&self, error: &MediaError) {
        warn!(%error, state = %self.state, "local media acquisition failed");
    }

    /// Mute or unmute every local track of `kind`. Returns the tracks that changed.
    pub fn set_local_enabled(&mut self, kind: TrackKind, enabled: bool) -> Vec<LocalTrack> {
        let Some(tracks) = self.local_tracks.as_mut() else {
            debug!(?kind, "no local media to toggle");
            return Vec::new();
        };
        tracks
            .iter_mut()
            .filter(|track| track.kind == kind && track.enabled != enabled)
            .map(|track| {
                track.enabled = enabled;
                track.clone()
            })
            .collect()
    }

    pub fn on_remote_track(&mut self, track: RemoteTrack) {
        match self.session.as_mut() {
            Some(session) => {
                info!(peer = %session.remote_peer, track = %track.id, "remote track available");
                session.remote_tracks.push(track);
            }
            None => debug!(track = %track.id, "remote track without a session"),
        }
    }

    /// Start a renegotiation offer on an established call
    pub async fn renegotiate(&mut self) -> Result<Vec<ClientEvent>, NegotiationError> {
        let state = self.state;
        match self.session.as_mut() {
            Some(session) if state == NegotiationState::Connected => {
                let offer = session.connection.create_offer().await?;
                session.renegotiating = true;
                info!(peer = %session.remote_peer, "sending renegotiation offer");
                Ok(vec![ClientEvent::RenegotiationOffer {
                    to: session.remote_peer.into(),
                    offer,
                }])
            }
            _ => Err(NegotiationError::InvalidState {
                action: "renegotiate",
                state,
            }),
        }
    }

    /// Leave the room. Calling it again is a no-op.
    pub fn leave(&mut self) -> Teardown {
        let Some(membership) = self.membership.take() else {
            debug!("leave while not in a room");
            return Teardown::default();
        };
        if let Some(session) = self.session.take() {
            session.close();
        }
        let released_tracks = self.local_tracks.take().unwrap_or_default();
        self.state = NegotiationState::Idle;
        info!(room = %membership.room, "left room");

        Teardown {
            events: vec![ClientEvent::Leave {
                room: membership.room,
            }],
            released_tracks,
        }
    }

    async fn on_peer_joined(
        &mut self,
        identity: Identity,
        peer: ConnectionHandle,
    ) -> Result<Vec<ClientEvent>, NegotiationError> {
        if self.membership.is_none() {
            debug!(%peer, "peer joined while not in a room");
            return Ok(Vec::new());
        }
        if self.own_handle == Some(peer) {
            return Ok(Vec::new());
        }
        info!(%identity, %peer, "peer joined, calling");

        self.open_session(peer).offer_deferred = true;
        if self.local_tracks.is_none() {
            debug!(%peer, "offer deferred until local media is ready");
            self.state = NegotiationState::HasRemotePeer;
            return Ok(Vec::new());
        }
        self.send_offer().await
    }

    async fn on_call_offer(
        &mut self,
        from: ConnectionHandle,
        offer: SessionDescription,
    ) -> Result<Vec<ClientEvent>, NegotiationError> {
        if self.membership.is_none() {
            debug!(%from, "call offer while not in a room");
            return Ok(Vec::new());
        }
        let reuse = matches!(
            self.state,
            NegotiationState::HasRemotePeer | NegotiationState::OfferReceived
        ) && self.remote_peer() == Some(from);
        if !reuse {
            self.open_session(from);
        }
        info!(%from, "incoming call");

        if let Some(session) = self.session.as_mut() {
            session.pending_remote_offer = Some(offer);
            session.offer_deferred = false;
        }
        self.state = NegotiationState::OfferReceived;
        self.try_answer().await
    }

    async fn on_call_answer(
        &mut self,
        from: ConnectionHandle,
        answer: SessionDescription,
    ) -> Result<Vec<ClientEvent>, NegotiationError> {
        let state = self.state;
        match self.session.as_mut() {
            Some(session) if session.remote_peer == from && state == NegotiationState::OfferSent => {
                session.connection.set_remote_description(&answer).await?;
                self.state = NegotiationState::Connected;
                info!(peer = %from, "call accepted");
            }
            _ => debug!(%from, %state, "ignoring unexpected call answer"),
        }
        Ok(Vec::new())
    }

    async fn on_renegotiation_offer(
        &mut self,
        from: ConnectionHandle,
        offer: SessionDescription,
    ) -> Result<Vec<ClientEvent>, NegotiationError> {
        let state = self.state;
        match self.session.as_mut() {
            Some(session) if session.remote_peer == from && state == NegotiationState::Connected => {
                let answer = session.connection.create_answer(&offer).await?;
                info!(peer = %from, "answering renegotiation");
                Ok(vec![ClientEvent::RenegotiationAnswer {
                    to: from.into(),
                    answer,
                }])
            }
            _ => {
                warn!(%from, %state, "ignoring renegotiation offer outside an established call");
                Ok(Vec::new())
            }
        }
    }

    async fn on_renegotiation_answer(
        &mut self,
        from: ConnectionHandle,
        answer: SessionDescription,
    ) -> Result<Vec<ClientEvent>, NegotiationError> {
        match self.session.as_mut() {
            Some(session) if session.remote_peer == from && session.renegotiating => {
                session.connection.set_remote_description(&answer).await?;
                session.renegotiating = false;
                info!(peer = %from, "renegotiation complete");
            }
            _ => debug!(%from, "ignoring unexpected renegotiation answer"),
        }
        Ok(Vec::new())
    }

    /// The peer is gone: drop its connection, stay in the room as a future caller
    fn on_peer_left(&mut self) {
        if let Some(session) = self.session.take() {
            info!(peer = %session.remote_peer, "peer left, tearing down session");
            session.close();
        }
        if self.membership.is_some() {
            self.state = self.state_without_peer();
        }
    }

    /// Attach local tracks, then offer
    async fn send_offer(&mut self) -> Result<Vec<ClientEvent>, NegotiationError> {
        let (Some(session), Some(tracks)) = (self.session.as_mut(), self.local_tracks.as_ref())
        else {
            return Ok(Vec::new());
        };
        if !session.tracks_attached {
            for track in tracks {
                session.connection.add_track(track).await?;
            }
            session.tracks_attached = true;
        }
        let offer = session.connection.create_offer().await?;
        session.offer_deferred = false;
        self.state = NegotiationState::OfferSent;
        info!(peer = %session.remote_peer, "sending call offer");

        Ok(vec![ClientEvent::CallOffer {
            to: session.remote_peer.into(),
            offer,
        }])
    }

    /// Answer the pending offer iff local media is ready
    async fn try_answer(&mut self) -> Result<Vec<ClientEvent>, NegotiationError> {
        let (Some(session), Some(tracks)) = (self.session.as_mut(), self.local_tracks.as_ref())
        else {
            debug!("offer held until local media is ready");
            return Ok(Vec::new());
        };
        let Some(offer) = session.pending_remote_offer.as_ref() else {
            return Ok(Vec::new());
        };

        let answer = session.connection.create_answer(offer).await?;
        session.pending_remote_offer = None;
        self.state = NegotiationState::Connected;

        if !session.tracks_attached {
            for track in tracks {
                if let Err(error) = session.connection.add_track(track).await {
                    warn!(track = %track.id, %error, "failed to attach local track after answering");
                }
            }
            session.tracks_attached = true;
        }
        info!(peer = %session.remote_peer, "answering call");

        Ok(vec![ClientEvent::CallAnswer {
            to: session.remote_peer.into(),
            answer,
        }])
    }

    /// Replace any current session with a fresh one for `remote_peer`
    fn open_session(&mut self, remote_peer: ConnectionHandle) -> &mut Session {
        if let Some(previous) = self.session.take() {
            if previous.remote_peer != remote_peer {
                warn!(previous = %previous.remote_peer, new = %remote_peer, "replacing session with another peer");
            }
            previous.close();
        }
        let connection = self.factory.create();
        self.session.insert(Session::new(remote_peer, connection))
    }

    fn state_without_peer(&self) -> NegotiationState {
        if self.local_tracks.is_some() {
            NegotiationState::WaitingForPeer
        } else {
            NegotiationState::AwaitingLocalMedia
        }
    }
}
