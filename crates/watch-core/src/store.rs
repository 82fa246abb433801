//! The room ID store.
//!
//! A single value shared by the session side, which writes the room the
//! relay assigned, and the engine side, which reads it at startup and is
//! told about every change.

use std::sync::Arc;
use tokio::sync::watch;
use watch_protocol::RoomId;

/// Change-notifying store for the active room ID.
///
/// Clones share the same value.
#[derive(Debug, Clone)]
pub struct RoomStore {
    value: Arc<watch::Sender<Option<RoomId>>>,
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RoomStore {
    /// Create a store holding `initial`.
    #[must_use]
    pub fn new(initial: Option<RoomId>) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { value: Arc::new(tx) }
    }

    /// Current room.
    #[must_use]
    pub fn get(&self) -> Option<RoomId> {
        self.value.borrow().clone()
    }

    /// Replace the room. Subscribers are notified only if it changed.
    ///
    /// Returns `true` if the value changed.
    pub fn set(&self, room: Option<RoomId>) -> bool {
        self.value.send_if_modified(|current| {
            if *current == room {
                return false;
            }
            *current = room;
            true
        })
    }

    /// Watch for changes. The current value counts as seen.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<RoomId>> {
        self.value.subscribe()
    }
}
