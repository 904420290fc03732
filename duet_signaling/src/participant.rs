//! One participant: a negotiator wired to a signaling channel and a capture device

use crate::channel::SignalingChannel;
use crate::error::NegotiationError;
use crate::media::{MediaCapture, RemoteTrack, TrackKind};
use crate::negotiation::{NegotiationState, Negotiator};
use crate::protocol::{ClientEvent, Identity, RoomId};
use tracing::{debug, info, warn};

pub struct Participant<C, M> {
    channel: C,
    capture: M,
    negotiator: Negotiator,
}

impl<C, M> Participant<C, M>
where
    C: SignalingChannel,
    M: MediaCapture,
{
    pub fn new(channel: C, capture: M, negotiator: Negotiator) -> Self {
        Self {
            channel,
            capture,
            negotiator,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn negotiator(&self) -> &Negotiator {
        &self.negotiator
    }

    pub fn state(&self) -> NegotiationState {
        self.negotiator.state()
    }

    pub async fn join(&mut self, room: RoomId, identity: Identity) -> Result<(), NegotiationError> {
        let events = self.negotiator.join(room, identity);
        self.send_all(events).await
    }

    /// Ask the capture device for local tracks.
    ///
    /// On failure the negotiator keeps waiting for media and the error is
    /// returned for local display only. Once media is ready, calling this
    /// again only retries a pending offer or answer.
    pub async fn acquire_media(&mut self) -> Result<(), NegotiationError> {
        if self.negotiator.has_local_media() {
            let events = self.negotiator.flush_pending().await?;
            return self.send_all(events).await;
        }
        match self.capture.acquire().await {
            Ok(tracks) => {
                let events = self.negotiator.local_media_ready(tracks).await?;
                self.send_all(events).await
            }
            Err(error) => {
                self.negotiator.local_media_failed(&error);
                Err(error.into())
            }
        }
    }

    /// Poll the channel once and feed every event to the negotiator.
    ///
    /// A failing event does not stop the rest of the batch, since the relay
    /// has already handed it over. Returns how many events were processed,
    /// or the first error once the whole batch has been handled.
    pub async fn pump(&mut self) -> Result<usize, NegotiationError> {
        let events = self.channel.poll().await?;
        let count = events.len();
        let mut first_error = None;
        for event in events {
            let name = event.event_name();
            let outcome = match self.negotiator.handle_event(event).await {
                Ok(replies) => self.send_all(replies).await,
                Err(error) => Err(error),
            };
            if let Err(error) = outcome {
                warn!(event = name, %error, "failed to handle server event");
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(count),
        }
    }

    pub async fn renegotiate(&mut self) -> Result<(), NegotiationError> {
        let events = self.negotiator.renegotiate().await?;
        self.send_all(events).await
    }

    /// Mute/unmute (audio) or switch video off/on. Nothing is signaled to the peer.
    ///
    /// Returns how many tracks changed.
    pub fn set_enabled(&mut self, kind: TrackKind, enabled: bool) -> usize {
        let changed = self.negotiator.set_local_enabled(kind, enabled);
        for track in &changed {
            self.capture.set_enabled(track);
        }
        info!(?kind, enabled, changed = changed.len(), "local tracks toggled");
        changed.len()
    }

    pub fn on_remote_track(&mut self, track: RemoteTrack) {
        self.negotiator.on_remote_track(track);
    }

    /// Leave the room and stop local media. Safe to call repeatedly.
    pub async fn leave(&mut self) -> Result<(), NegotiationError> {
        let teardown = self.negotiator.leave();
        self.capture.release(teardown.released_tracks);
        self.send_all(teardown.events).await
    }

    /// Drop the transport without an explicit leave
    pub async fn disconnect(&mut self) -> Result<(), NegotiationError> {
        let teardown = self.negotiator.leave();
        self.capture.release(teardown.released_tracks);
        self.channel.close().await?;
        Ok(())
    }

    async fn send_all(&self, events: Vec<ClientEvent>) -> Result<(), NegotiationError> {
        for event in events {
            debug!(event = event.event_name(), handle = %self.channel.handle(), "sending");
            self.channel.send(event).await?;
        }
        Ok(())
    }
}
