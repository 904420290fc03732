//! Two-party WebRTC signaling: a WASI-compatible relay and the offer/answer
//! negotiation core used by each participant
//!
//! The relay maps participant identities to connection handles and rooms and
//! forwards session descriptions between the two occupants of a room. The
//! [`Negotiator`] drives one participant's side of the call and copes with the
//! remote offer arriving before local camera/microphone access resolves.
//!
//! # Protocol
//!
//! The relay speaks HTTP long-polling:
//!
//! - **GET /poll?handle={id}** - Open a connection (no handle) or poll for events
//! - **POST /signal** - Send one client event (`x-connection-handle` header required)
//! - **POST /disconnect** - Close a connection
//! - **GET /health** - Health check
//!
//! ## Response Format (server → client)
//!
//! ```json
//! {"handle": "<uuid>", "events": [{"event": "peer-joined", "payload": {...}}]}
//! ```
//!
//! Events:
//! - `{"event": "handle-assigned", "payload": "<uuid>"}` - Your connection handle
//! - `{"event": "join-room", "payload": {"identity", "room"}}` - Echo of your join
//! - `{"event": "peer-joined", "payload": {"identity", "senderHandle"}}` - Someone joined your room
//! - `{"event": "call-offer" | "renegotiation-offer", "payload": {"from", "offer"}}`
//! - `{"event": "call-answer" | "renegotiation-answer", "payload": {"from", "answer"}}`
//! - `{"event": "peer-left"}` - The other participant left or disconnected
//!
//! ## Client Events (client → server)
//!
//! - `{"event": "join-room", "payload": {"identity", "room"}}`
//! - `{"event": "call-offer", "payload": {"to", "offer"}}` (and the other three signals)
//! - `{"event": "leave", "payload": {"room"}}`
//!
//! `to` is either a connection handle or a participant identity. Signals to
//! a participant who is not in a room are dropped silently.
//!
//! # Example
//!
//! ```bash
//! # Start the server
//! wasmtime serve -S common -S cli --env DUET_STATE_FILE=duet_state.json \
//!   --addr 127.0.0.1:3536 duet-signaling.wasm
//!
//! # Open a connection (returns handle and the handle-assigned event)
//! curl http://127.0.0.1:3536/poll
//!
//! # Join a room
//! curl -X POST -H "x-connection-handle: <your-handle>" \
//!   -d '{"event":"join-room","payload":{"identity":"a@x.com","room":"42"}}' \
//!   http://127.0.0.1:3536/signal
//!
//! # Poll for new events
//! curl "http://127.0.0.1:3536/poll?handle=<your-handle>"
//! ```

#![forbid(unsafe_code)]

pub mod channel;
pub mod config;
pub mod error;
pub mod handler;
pub mod media;
pub mod negotiation;
pub mod participant;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod state;

pub use channel::{LoopbackChannel, SignalingChannel};
pub use config::Config;
pub use error::{ChannelError, MediaError, NegotiationError, SignalingError};
pub use handler::handle_request;
pub use negotiation::{NegotiationState, Negotiator};
pub use participant::Participant;
pub use protocol::{ClientEvent, ConnectionHandle, Identity, RoomId, ServerEvent};
pub use state::ServerState;
