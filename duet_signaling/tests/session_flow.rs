//! End-to-end call setup through the relay with in-process channels and fake media

use async_trait::async_trait;
use duet_signaling::media::{LocalTrack, MediaCapture, MediaConnection, TrackKind};
use duet_signaling::protocol::{SessionDescription, SignalTarget};
use duet_signaling::{
    ClientEvent, ConnectionHandle, LoopbackChannel, MediaError, NegotiationError,
    NegotiationState, Negotiator, Participant, ServerEvent, ServerState, SignalingChannel,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Media connection that answers with canned descriptions and counts answers
struct FakeConnection {
    name: &'static str,
    answers: Rc<Cell<usize>>,
    failures: Rc<RefCell<Vec<&'static str>>>,
}

impl FakeConnection {
    fn check(&self, op: &'static str) -> Result<(), MediaError> {
        let mut failures = self.failures.borrow_mut();
        match failures.iter().position(|failing| *failing == op) {
            Some(index) => {
                failures.remove(index);
                Err(MediaError::Connection(format!("{} failed", op)))
            }
            None => Ok(()),
        }
    }
}

#[async_trait(?Send)]
impl MediaConnection for FakeConnection {
    async fn create_offer(&mut self) -> Result<SessionDescription, MediaError> {
        self.check("create_offer")?;
        Ok(SessionDescription::offer(format!("offer-from-{}", self.name)))
    }

    async fn create_answer(
        &mut self,
        _remote_offer: &SessionDescription,
    ) -> Result<SessionDescription, MediaError> {
        self.answers.set(self.answers.get() + 1);
        Ok(SessionDescription::answer(format!("answer-from-{}", self.name)))
    }

    async fn set_remote_description(
        &mut self,
        _description: &SessionDescription,
    ) -> Result<(), MediaError> {
        self.check("set_remote_description")
    }

    async fn add_track(&mut self, _track: &LocalTrack) -> Result<(), MediaError> {
        Ok(())
    }

    fn close(&mut self) {}
}

/// Capture device whose permission prompt can be refused
struct FakeCapture {
    refuse: Option<MediaError>,
    acquired: Rc<Cell<usize>>,
    released: Rc<RefCell<Vec<LocalTrack>>>,
    toggled: Rc<RefCell<Vec<(String, bool)>>>,
}

#[async_trait(?Send)]
impl MediaCapture for FakeCapture {
    async fn acquire(&mut self) -> Result<Vec<LocalTrack>, MediaError> {
        self.acquired.set(self.acquired.get() + 1);
        match &self.refuse {
            Some(error) => Err(error.clone()),
            None => Ok(vec![
                LocalTrack::new("mic", TrackKind::Audio),
                LocalTrack::new("cam", TrackKind::Video),
            ]),
        }
    }

    fn release(&mut self, tracks: Vec<LocalTrack>) {
        self.released.borrow_mut().extend(tracks);
    }

    fn set_enabled(&mut self, track: &LocalTrack) {
        self.toggled.borrow_mut().push((track.id.clone(), track.enabled));
    }
}

struct Harness {
    participant: Participant<LoopbackChannel, FakeCapture>,
    answers: Rc<Cell<usize>>,
    acquired: Rc<Cell<usize>>,
    failures: Rc<RefCell<Vec<&'static str>>>,
    released: Rc<RefCell<Vec<LocalTrack>>>,
    toggled: Rc<RefCell<Vec<(String, bool)>>>,
}

impl Harness {
    fn new(state: &ServerState, name: &'static str) -> Self {
        Self::with_capture(state, name, None)
    }

    fn with_capture(state: &ServerState, name: &'static str, refuse: Option<MediaError>) -> Self {
        let answers = Rc::new(Cell::new(0));
        let failures: Rc<RefCell<Vec<&'static str>>> = Rc::default();
        let factory_answers = answers.clone();
        let factory_failures = failures.clone();
        let negotiator = Negotiator::new(move || {
            Box::new(FakeConnection {
                name,
                answers: factory_answers.clone(),
                failures: factory_failures.clone(),
            }) as Box<dyn MediaConnection>
        });
        let acquired = Rc::new(Cell::new(0));
        let released = Rc::new(RefCell::new(Vec::new()));
        let toggled = Rc::new(RefCell::new(Vec::new()));
        let capture = FakeCapture {
            refuse,
            acquired: acquired.clone(),
            released: released.clone(),
            toggled: toggled.clone(),
        };
        Self {
            participant: Participant::new(LoopbackChannel::connect(state), capture, negotiator),
            answers,
            acquired,
            failures,
            released,
            toggled,
        }
    }

    fn handle(&self) -> ConnectionHandle {
        self.participant.channel().handle()
    }

    async fn join(&mut self, identity: &str) {
        self.participant
            .join("42".into(), identity.into())
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn joins_are_echoed_and_announced_to_existing_occupant() {
    let state = ServerState::in_memory();
    let a = LoopbackChannel::connect(&state);
    let b = LoopbackChannel::connect(&state);

    a.send(ClientEvent::JoinRoom {
        identity: "a@x.com".into(),
        room: "42".into(),
    })
    .await
    .unwrap();
    assert_eq!(
        a.poll().await.unwrap(),
        vec![
            ServerEvent::HandleAssigned(a.handle()),
            ServerEvent::JoinRoom {
                identity: "a@x.com".into(),
                room: "42".into(),
            },
        ]
    );

    b.send(ClientEvent::JoinRoom {
        identity: "b@x.com".into(),
        room: "42".into(),
    })
    .await
    .unwrap();
    assert_eq!(
        a.poll().await.unwrap(),
        vec![ServerEvent::PeerJoined {
            identity: "b@x.com".into(),
            sender_handle: b.handle(),
        }]
    );
    assert_eq!(
        b.poll().await.unwrap(),
        vec![
            ServerEvent::HandleAssigned(b.handle()),
            ServerEvent::JoinRoom {
                identity: "b@x.com".into(),
                room: "42".into(),
            },
        ]
    );
}

#[tokio::test]
async fn offer_is_relayed_with_sender_handle_to_target_only() {
    let state = ServerState::in_memory();
    let a = LoopbackChannel::connect(&state);
    let b = LoopbackChannel::connect(&state);
    let c = LoopbackChannel::connect(&state);
    for (channel, identity) in [(&a, "a@x.com"), (&b, "b@x.com"), (&c, "c@x.com")] {
        channel
            .send(ClientEvent::JoinRoom {
                identity: identity.into(),
                room: "42".into(),
            })
            .await
            .unwrap();
        channel.poll().await.unwrap();
    }
    a.poll().await.unwrap();
    b.poll().await.unwrap();

    let offer = SessionDescription::offer("v=0");
    a.send(ClientEvent::CallOffer {
        to: b.handle().into(),
        offer: offer.clone(),
    })
    .await
    .unwrap();

    assert_eq!(
        b.poll().await.unwrap(),
        vec![ServerEvent::CallOffer {
            from: a.handle(),
            offer,
        }]
    );
    assert!(a.poll().await.unwrap().is_empty());
    assert!(c.poll().await.unwrap().is_empty());
}

#[tokio::test]
async fn caller_and_callee_reach_connected() {
    let state = ServerState::in_memory();
    let mut alice = Harness::new(&state, "alice");
    let mut bob = Harness::new(&state, "bob");

    alice.join("a@x.com").await;
    alice.participant.acquire_media().await.unwrap();
    alice.participant.pump().await.unwrap();
    assert_eq!(alice.participant.state(), NegotiationState::WaitingForPeer);

    bob.join("b@x.com").await;
    // Alice sees bob and offers.
    alice.participant.pump().await.unwrap();
    assert_eq!(alice.participant.state(), NegotiationState::OfferSent);

    // Bob receives the offer before his camera is ready.
    bob.participant.pump().await.unwrap();
    assert_eq!(bob.participant.state(), NegotiationState::OfferReceived);
    assert_eq!(bob.participant.negotiator().remote_peer(), Some(alice.handle()));
    assert_eq!(bob.answers.get(), 0);

    bob.participant.acquire_media().await.unwrap();
    assert_eq!(bob.participant.state(), NegotiationState::Connected);
    assert_eq!(bob.answers.get(), 1);

    alice.participant.pump().await.unwrap();
    assert_eq!(alice.participant.state(), NegotiationState::Connected);
    assert_eq!(alice.participant.negotiator().remote_peer(), Some(bob.handle()));

    // Nothing further happens without new triggers.
    assert_eq!(bob.participant.pump().await.unwrap(), 0);
    assert_eq!(bob.answers.get(), 1);
}

#[tokio::test]
async fn offer_arriving_after_media_is_answered_immediately() {
    let state = ServerState::in_memory();
    let mut alice = Harness::new(&state, "alice");
    let mut bob = Harness::new(&state, "bob");

    alice.join("a@x.com").await;
    alice.participant.acquire_media().await.unwrap();
    bob.join("b@x.com").await;
    bob.participant.acquire_media().await.unwrap();

    alice.participant.pump().await.unwrap();
    bob.participant.pump().await.unwrap();
    alice.participant.pump().await.unwrap();

    assert_eq!(alice.participant.state(), NegotiationState::Connected);
    assert_eq!(bob.participant.state(), NegotiationState::Connected);
    assert_eq!(bob.answers.get(), 1);
}

#[tokio::test]
async fn renegotiation_round_trip_over_the_relay() {
    let state = ServerState::in_memory();
    let mut alice = Harness::new(&state, "alice");
    let mut bob = Harness::new(&state, "bob");
    alice.join("a@x.com").await;
    alice.participant.acquire_media().await.unwrap();
    bob.join("b@x.com").await;
    bob.participant.acquire_media().await.unwrap();
    alice.participant.pump().await.unwrap();
    bob.participant.pump().await.unwrap();
    alice.participant.pump().await.unwrap();

    bob.participant.renegotiate().await.unwrap();
    alice.participant.pump().await.unwrap();
    bob.participant.pump().await.unwrap();

    assert_eq!(alice.participant.state(), NegotiationState::Connected);
    assert_eq!(bob.participant.state(), NegotiationState::Connected);
    // One initial answer from bob, one renegotiation answer from alice.
    assert_eq!(bob.answers.get(), 1);
    assert_eq!(alice.answers.get(), 1);
}

#[tokio::test]
async fn disconnect_mid_call_resets_remaining_participant() {
    let state = ServerState::in_memory();
    let mut alice = Harness::new(&state, "alice");
    let mut bob = Harness::new(&state, "bob");
    alice.join("a@x.com").await;
    alice.participant.acquire_media().await.unwrap();
    bob.join("b@x.com").await;
    bob.participant.acquire_media().await.unwrap();
    alice.participant.pump().await.unwrap();
    bob.participant.pump().await.unwrap();
    alice.participant.pump().await.unwrap();
    let bob_handle = bob.handle();

    bob.participant.disconnect().await.unwrap();
    assert_eq!(bob.released.borrow().len(), 2);

    assert_eq!(alice.participant.pump().await.unwrap(), 1);
    assert_eq!(alice.participant.state(), NegotiationState::WaitingForPeer);
    assert_eq!(alice.participant.negotiator().remote_peer(), None);
    assert_eq!(state.lookup_handle(&"b@x.com".into()), None);
    assert_eq!(state.room_of(bob_handle), None);
    assert_eq!(state.room_occupants(&"42".into()), vec![alice.handle()]);

    // A newcomer gets called by alice as a fresh caller.
    let mut carol = Harness::new(&state, "carol");
    carol.join("c@x.com").await;
    alice.participant.pump().await.unwrap();
    assert_eq!(alice.participant.state(), NegotiationState::OfferSent);
    assert_eq!(alice.participant.negotiator().remote_peer(), Some(carol.handle()));
}

#[tokio::test]
async fn offer_to_unknown_handle_is_dropped_quietly() {
    let state = ServerState::in_memory();
    let a = LoopbackChannel::connect(&state);
    let b = LoopbackChannel::connect(&state);
    a.send(ClientEvent::JoinRoom {
        identity: "a@x.com".into(),
        room: "42".into(),
    })
    .await
    .unwrap();
    a.poll().await.unwrap();
    b.poll().await.unwrap();

    let result = a
        .send(ClientEvent::CallOffer {
            to: SignalTarget::Handle(ConnectionHandle::new_v4()),
            offer: SessionDescription::offer("v=0"),
        })
        .await;

    assert!(result.is_ok());
    assert!(a.poll().await.unwrap().is_empty());
    assert!(b.poll().await.unwrap().is_empty());
}

#[tokio::test]
async fn leaving_twice_notifies_peer_once() {
    let state = ServerState::in_memory();
    let mut alice = Harness::new(&state, "alice");
    let mut bob = Harness::new(&state, "bob");
    alice.join("a@x.com").await;
    bob.join("b@x.com").await;
    alice.participant.pump().await.unwrap();
    bob.participant.pump().await.unwrap();

    bob.participant.leave().await.unwrap();
    bob.participant.leave().await.unwrap();
    assert_eq!(bob.participant.state(), NegotiationState::Idle);

    let events = alice.participant.channel().poll().await.unwrap();
    assert_eq!(events, vec![ServerEvent::PeerLeft]);
    assert!(
        !state
            .room_occupants(&"42".into())
            .contains(&bob.handle())
    );
}

#[tokio::test]
async fn refused_camera_keeps_callee_waiting() {
    let state = ServerState::in_memory();
    let mut alice = Harness::new(&state, "alice");
    let mut bob = Harness::with_capture(&state, "bob", Some(MediaError::PermissionDenied));
    alice.join("a@x.com").await;
    alice.participant.acquire_media().await.unwrap();
    bob.join("b@x.com").await;
    alice.participant.pump().await.unwrap();
    bob.participant.pump().await.unwrap();

    let err = bob.participant.acquire_media().await.unwrap_err();
    assert!(matches!(
        err,
        NegotiationError::Media(MediaError::PermissionDenied)
    ));
    assert_eq!(bob.participant.state(), NegotiationState::OfferReceived);
    assert!(bob.participant.negotiator().has_pending_offer());
    assert_eq!(bob.answers.get(), 0);
    assert_eq!(alice.participant.state(), NegotiationState::OfferSent);
}

#[tokio::test]
async fn failed_answer_does_not_swallow_later_peer_left() {
    let state = ServerState::in_memory();
    let mut alice = Harness::new(&state, "alice");
    let mut bob = Harness::new(&state, "bob");
    alice.join("a@x.com").await;
    alice.participant.acquire_media().await.unwrap();
    bob.join("b@x.com").await;
    bob.participant.acquire_media().await.unwrap();
    alice.participant.pump().await.unwrap();
    bob.participant.pump().await.unwrap();
    assert_eq!(bob.participant.state(), NegotiationState::Connected);

    // Alice cannot apply bob's answer, and bob drops right after answering.
    alice.failures.borrow_mut().push("set_remote_description");
    bob.participant.disconnect().await.unwrap();

    let err = alice.participant.pump().await.unwrap_err();
    assert!(matches!(
        err,
        NegotiationError::Media(MediaError::Connection(_))
    ));
    assert_eq!(alice.participant.state(), NegotiationState::WaitingForPeer);
    assert_eq!(alice.participant.negotiator().remote_peer(), None);
    assert_eq!(alice.participant.pump().await.unwrap(), 0);
}

#[tokio::test]
async fn failed_offer_is_retried_without_recapturing() {
    let state = ServerState::in_memory();
    let mut alice = Harness::new(&state, "alice");
    let mut bob = Harness::new(&state, "bob");
    alice.join("a@x.com").await;
    bob.join("b@x.com").await;
    alice.participant.pump().await.unwrap();
    assert_eq!(alice.participant.state(), NegotiationState::HasRemotePeer);

    alice.failures.borrow_mut().push("create_offer");
    assert!(alice.participant.acquire_media().await.is_err());
    assert_eq!(alice.participant.state(), NegotiationState::HasRemotePeer);

    alice.participant.acquire_media().await.unwrap();
    assert_eq!(alice.participant.state(), NegotiationState::OfferSent);
    assert_eq!(alice.acquired.get(), 1);

    bob.participant.acquire_media().await.unwrap();
    bob.participant.pump().await.unwrap();
    alice.participant.pump().await.unwrap();
    assert_eq!(alice.participant.state(), NegotiationState::Connected);
    assert_eq!(bob.participant.state(), NegotiationState::Connected);
}

#[tokio::test]
async fn mute_and_video_off_stay_local_during_a_call() {
    let state = ServerState::in_memory();
    let mut alice = Harness::new(&state, "alice");
    let mut bob = Harness::new(&state, "bob");
    alice.join("a@x.com").await;
    alice.participant.acquire_media().await.unwrap();
    bob.join("b@x.com").await;
    bob.participant.acquire_media().await.unwrap();
    alice.participant.pump().await.unwrap();
    bob.participant.pump().await.unwrap();
    alice.participant.pump().await.unwrap();

    assert_eq!(alice.participant.set_enabled(TrackKind::Audio, false), 1);
    assert_eq!(alice.participant.set_enabled(TrackKind::Video, false), 1);
    assert_eq!(alice.participant.set_enabled(TrackKind::Audio, true), 1);
    assert_eq!(
        *alice.toggled.borrow(),
        vec![
            ("mic".to_string(), false),
            ("cam".to_string(), false),
            ("mic".to_string(), true),
        ]
    );

    assert_eq!(alice.participant.state(), NegotiationState::Connected);
    assert_eq!(bob.participant.pump().await.unwrap(), 0);
}
