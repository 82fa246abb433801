//! Playback state and room identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position reserved for "advertisement in progress".
///
/// Never a real playback position; receivers must not seek to it.
pub const AD_SENTINEL_POSITION: f64 = -1.0;

/// Opaque identifier of a synchronization group.
///
/// Issued by the relay when a room is created and supplied by the user when
/// joining one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Create a room ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty ID is what a host sends before the relay assigns one.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Playback state of a single video.
///
/// Field names on the wire are `currentTime` and `isPaused`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoState {
    /// Playback position in seconds, or [`AD_SENTINEL_POSITION`].
    #[serde(rename = "currentTime")]
    pub position: f64,
    /// Whether playback is paused.
    #[serde(rename = "isPaused")]
    pub paused: bool,
}

impl VideoState {
    /// Create a new state.
    #[must_use]
    pub const fn new(position: f64, paused: bool) -> Self {
        Self { position, paused }
    }

    /// The state a viewer announces when its own advertisement starts.
    #[must_use]
    pub const fn ad_break() -> Self {
        Self {
            position: AD_SENTINEL_POSITION,
            paused: true,
        }
    }

    /// Whether the position is the advertisement sentinel.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn is_ad_break(&self) -> bool {
        self.position == AD_SENTINEL_POSITION
    }
}

impl fmt::Display for VideoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = if self.paused { "Pause" } else { "Play" };
        write!(f, "{} @ {:.1}s", action, self.position)
    }
}
