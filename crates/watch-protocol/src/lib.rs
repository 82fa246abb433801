//! # watch-protocol
//!
//! Wire protocol definitions for the watch-together relay.
//!
//! Clients and the relay exchange JSON text frames tagged by a `type` field.
//! This crate defines those frames, the playback state they carry, and the
//! codec used on both sides of the link.
//!
//! ## Message Types
//!
//! - `CREATE_ROOM` / `JOIN_ROOM` - Room requests sent right after connecting
//! - `ROOM_CREATED` / `ROOM_JOINED` / `ROOM_ERROR` - Relay responses
//! - `VIDEO_STATE_CHANGE` - Playback state, fanned out to every room member
//! - `PING_KEEPALIVE` - Heartbeat, no response
//!
//! ## Example
//!
//! ```rust
//! use watch_protocol::{codec, Message, RoomId, VideoState};
//!
//! let message = Message::video_state(RoomId::new("abc"), VideoState::new(10.0, false));
//!
//! let encoded = codec::encode(&message).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(message, decoded);
//! ```

pub mod codec;
pub mod messages;
pub mod state;

pub use codec::{decode, encode, ProtocolError};
pub use messages::{Message, RequestData};
pub use state::{RoomId, VideoState, AD_SENTINEL_POSITION};
