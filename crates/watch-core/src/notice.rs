//! Informational notices for the user-visible layer.
//!
//! Notices are not part of the protocol. The shell decides how to show them.

use std::fmt;
use watch_protocol::{RoomId, VideoState};

use crate::probe::PlaybackError;

/// Something the viewer should be told about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// The video was found; reports the room in use.
    RoomStatus(Option<RoomId>),
    /// The room ID changed.
    RoomChanged {
        /// New room, if any.
        room: Option<RoomId>,
        /// Whether a room was set before.
        replaced: bool,
    },
    /// A remote state is being applied.
    Syncing(VideoState),
    /// A remote state arrived while a local ad was playing and was dropped.
    SyncIgnoredDuringAd,
    /// A local ad started; peers were asked to pause.
    AdStarted,
    /// A local ad ended; playback resumes and the state is re-announced.
    AdFinished,
    /// The player refused a mutation.
    PlaybackFailed(PlaybackError),
    /// No ready video was found.
    PlayerUnavailable {
        /// Attempts made.
        attempts: u32,
    },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::RoomStatus(Some(room)) => write!(f, "Current Room ID: {room}"),
            Notice::RoomStatus(None) => write!(f, "No Room ID set."),
            Notice::RoomChanged { room, replaced } => {
                let verb = if *replaced { "updated to" } else { "set to" };
                match room {
                    Some(room) => write!(f, "Room ID {verb}: {room}"),
                    None => write!(f, "Room ID {verb}: None"),
                }
            }
            Notice::Syncing(state) => write!(f, "Syncing: {state}"),
            Notice::SyncIgnoredDuringAd => write!(f, "Ad playing, incoming sync ignored."),
            Notice::AdStarted => write!(f, "Your ad started. Pausing for others."),
            Notice::AdFinished => write!(f, "Your ad finished. Syncing video state."),
            Notice::PlaybackFailed(error) => write!(f, "{error}"),
            Notice::PlayerUnavailable { attempts } => write!(
                f,
                "Could not initialize video player after {attempts} attempts."
            ),
        }
    }
}
