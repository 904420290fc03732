//! Capability interface to the external media stack
//!
//! The negotiation core never touches codecs, ICE or devices itself. It drives
//! a peer-connection primitive and a capture device through these traits,
//! which an embedding implements on top of its WebRTC stack.

use crate::error::MediaError;
use crate::protocol::SessionDescription;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Track captured on this side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: String,
    pub kind: TrackKind,
    /// False while muted (audio) or switched off (video)
    pub enabled: bool,
}

impl LocalTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: true,
        }
    }
}

/// Track announced by the remote peer's connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
}

/// One peer-connection primitive. Instances are never reused after `close`.
#[async_trait(?Send)]
pub trait MediaConnection {
    /// Create a local offer and install it as the local description
    async fn create_offer(&mut self) -> Result<SessionDescription, MediaError>;

    /// Apply `remote_offer`, then create and install a local answer
    async fn create_answer(
        &mut self,
        remote_offer: &SessionDescription,
    ) -> Result<SessionDescription, MediaError>;

    async fn set_remote_description(
        &mut self,
        description: &SessionDescription,
    ) -> Result<(), MediaError>;

    async fn add_track(&mut self, track: &LocalTrack) -> Result<(), MediaError>;

    fn close(&mut self);
}

/// Builds a fresh primitive for every negotiation session
pub trait MediaConnectionFactory {
    fn create(&self) -> Box<dyn MediaConnection>;
}

impl<F> MediaConnectionFactory for F
where
    F: Fn() -> Box<dyn MediaConnection>,
{
    fn create(&self) -> Box<dyn MediaConnection> {
        self()
    }
}

/// Local camera/microphone access
#[async_trait(?Send)]
pub trait MediaCapture {
    async fn acquire(&mut self) -> Result<Vec<LocalTrack>, MediaError>;

    /// Stop tracks handed out by `acquire`
    fn release(&mut self, tracks: Vec<LocalTrack>) {
        drop(tracks);
    }

    /// Apply `track.enabled` to the live device track
    fn set_enabled(&mut self, track: &LocalTrack);
}
