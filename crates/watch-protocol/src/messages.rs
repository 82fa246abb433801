//! Message types for the relay protocol.
//!
//! Every message is a JSON object whose `type` field names the variant.

use serde::{Deserialize, Serialize};

use crate::state::{RoomId, VideoState};

/// Payload of a room request. The relay ignores it; it is always `{}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestData {}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Ask the relay for a new room. Sent with an empty room ID.
    CreateRoom {
        /// Always empty.
        #[serde(rename = "roomId", default)]
        room_id: RoomId,
        /// Unused request payload.
        #[serde(default)]
        data: RequestData,
    },

    /// Ask to join an existing room.
    JoinRoom {
        /// Room to join.
        #[serde(rename = "roomId", default)]
        room_id: RoomId,
        /// Unused request payload.
        #[serde(default)]
        data: RequestData,
    },

    /// A room was created for this connection.
    RoomCreated {
        /// Identifier assigned by the relay.
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },

    /// This connection joined a room.
    RoomJoined {
        /// The joined room.
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },

    /// A room request was rejected.
    RoomError {
        /// Human-readable reason.
        error: String,
    },

    /// Playback state broadcast to every other member of a room.
    VideoStateChange {
        /// Room the state belongs to.
        #[serde(rename = "roomId")]
        room_id: RoomId,
        /// The playback state.
        data: VideoState,
    },

    /// Keepalive, no response expected.
    PingKeepalive,
}

impl Message {
    /// Wire name of the message type, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Message::CreateRoom { .. } => "CREATE_ROOM",
            Message::JoinRoom { .. } => "JOIN_ROOM",
            Message::RoomCreated { .. } => "ROOM_CREATED",
            Message::RoomJoined { .. } => "ROOM_JOINED",
            Message::RoomError { .. } => "ROOM_ERROR",
            Message::VideoStateChange { .. } => "VIDEO_STATE_CHANGE",
            Message::PingKeepalive => "PING_KEEPALIVE",
        }
    }

    /// Create a room request. A host has no room ID yet.
    #[must_use]
    pub fn create_room() -> Self {
        Message::CreateRoom {
            room_id: RoomId::default(),
            data: RequestData::default(),
        }
    }

    /// Create a join request.
    #[must_use]
    pub fn join_room(room_id: impl Into<RoomId>) -> Self {
        Message::JoinRoom {
            room_id: room_id.into(),
            data: RequestData::default(),
        }
    }

    /// Create the request a link sends right after connecting.
    #[must_use]
    pub fn room_request(room_id: Option<&RoomId>, as_host: bool) -> Self {
        if as_host {
            Message::create_room()
        } else {
            Message::join_room(room_id.cloned().unwrap_or_default())
        }
    }

    /// Create a RoomCreated response.
    #[must_use]
    pub fn room_created(room_id: impl Into<RoomId>) -> Self {
        Message::RoomCreated {
            room_id: room_id.into(),
        }
    }

    /// Create a RoomJoined response.
    #[must_use]
    pub fn room_joined(room_id: impl Into<RoomId>) -> Self {
        Message::RoomJoined {
            room_id: room_id.into(),
        }
    }

    /// Create a RoomError response.
    #[must_use]
    pub fn room_error(error: impl Into<String>) -> Self {
        Message::RoomError {
            error: error.into(),
        }
    }

    /// Create a state broadcast.
    #[must_use]
    pub fn video_state(room_id: impl Into<RoomId>, data: VideoState) -> Self {
        Message::VideoStateChange {
            room_id: room_id.into(),
            data,
        }
    }

    /// Create a keepalive.
    #[must_use]
    pub fn ping() -> Self {
        Message::PingKeepalive
    }
}
