//! Rooms and their members.
//!
//! Each member owns a bounded outbound queue. Broadcasting never waits: a
//! member whose queue is full is dropped from the room, which closes its
//! queue and ends its connection. Rooms are deleted when their last member
//! leaves.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use watch_protocol::RoomId;

/// Length of generated room IDs.
pub const ROOM_ID_LENGTH: usize = 8;

/// Room errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    /// No room with this ID.
    #[error("Room not found")]
    NotFound(RoomId),

    /// The room limit is reached.
    #[error("Failed to create room")]
    TooManyRooms,
}

/// Identifies one member across all rooms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberId(u64);

/// A member's place in a room.
#[derive(Debug)]
pub struct Membership {
    /// The room.
    pub room: RoomId,
    /// This member.
    pub member: MemberId,
    /// Frames broadcast by the other members. Closes when the member is
    /// dropped from the room.
    pub outbound: mpsc::Receiver<Arc<str>>,
}

#[derive(Debug, Default)]
struct Room {
    members: HashMap<MemberId, mpsc::Sender<Arc<str>>>,
}

/// All rooms of the relay.
#[derive(Debug)]
pub struct Rooms {
    rooms: DashMap<RoomId, Room>,
    next_member: AtomicU64,
    ids: RandomState,
    max_rooms: usize,
    send_queue: usize,
}

impl Rooms {
    /// Create an empty registry.
    #[must_use]
    pub fn new(max_rooms: usize, send_queue: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            next_member: AtomicU64::new(0),
            ids: RandomState::new(),
            max_rooms,
            send_queue: send_queue.max(1),
        }
    }

    /// Number of rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of members in `room`.
    #[must_use]
    pub fn member_count(&self, room: &RoomId) -> usize {
        self.rooms.get(room).map_or(0, |room| room.members.len())
    }

    /// Whether `room` exists.
    #[must_use]
    pub fn contains(&self, room: &RoomId) -> bool {
        self.rooms.contains_key(room)
    }

    /// Create a room with a fresh ID and make the caller its first member.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::TooManyRooms`] if the room limit is reached.
    pub fn create(&self) -> Result<Membership, RoomError> {
        if self.rooms.len() >= self.max_rooms {
            warn!(rooms = self.rooms.len(), "Room limit reached");
            return Err(RoomError::TooManyRooms);
        }

        loop {
            let id = self.generate_id();
            if let Entry::Vacant(vacant) = self.rooms.entry(id.clone()) {
                let mut room = Room::default();
                let membership = self.add_member(&mut room, id.clone());
                vacant.insert(room);
                info!(room = %id, "Room created");
                return Ok(membership);
            }
        }
    }

    /// Join an existing room.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::NotFound`] if the room does not exist.
    pub fn join(&self, id: &RoomId) -> Result<Membership, RoomError> {
        let mut room = self
            .rooms
            .get_mut(id)
            .ok_or_else(|| RoomError::NotFound(id.clone()))?;

        let membership = self.add_member(&mut *room, id.clone());
        info!(room = %id, members = room.members.len(), "Member joined");
        Ok(membership)
    }

    /// Send `frame` to every member of `room` except `from`.
    ///
    /// Returns the number of members the frame was queued for.
    pub fn broadcast(&self, id: &RoomId, from: MemberId, frame: &Arc<str>) -> usize {
        let Some(mut room) = self.rooms.get_mut(id) else {
            debug!(room = %id, "Broadcast to missing room");
            return 0;
        };

        let mut delivered = 0;
        room.members.retain(|member, queue| {
            if *member == from {
                return true;
            }
            match queue.try_send(Arc::clone(frame)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(room = %id, member = ?member, "Send queue full, dropping member");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        let empty = room.members.is_empty();
        drop(room);
        if empty {
            self.remove_if_empty(id);
        }

        delivered
    }

    /// Remove `member` from `room`, deleting the room once it is empty.
    ///
    /// Returns `true` if the member was in the room.
    pub fn leave(&self, id: &RoomId, member: MemberId) -> bool {
        let Some(mut room) = self.rooms.get_mut(id) else {
            return false;
        };
        let removed = room.members.remove(&member).is_some();
        let remaining = room.members.len();
        drop(room);

        if removed {
            debug!(room = %id, member = ?member, remaining, "Member left");
        }
        if remaining == 0 {
            self.remove_if_empty(id);
        }
        removed
    }

    fn remove_if_empty(&self, id: &RoomId) {
        if self
            .rooms
            .remove_if(id, |_, room| room.members.is_empty())
            .is_some()
        {
            info!(room = %id, "Room is empty, deleted");
        }
    }

    fn add_member(&self, room: &mut Room, id: RoomId) -> Membership {
        let member = MemberId(self.next_member.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.send_queue);
        room.members.insert(member, tx);
        Membership {
            room: id,
            member,
            outbound: rx,
        }
    }

    fn generate_id(&self) -> RoomId {
        let seed = self.next_member.fetch_add(1, Ordering::Relaxed);
        let hash = self.ids.hash_one(seed);
        let mut id = format!("{hash:016x}");
        id.truncate(ROOM_ID_LENGTH);
        RoomId::new(id)
    }
}
