//! Room membership table.
//!
//! Rooms are pre-created at startup, one per worker reactor, and live for
//! the lifetime of the process. The table is the only mutable state shared
//! across reactor threads; every access goes through one mutex, and fan-out
//! callers copy the member set out rather than holding the lock across I/O.

use std::collections::{BTreeMap, BTreeSet};
use std::os::fd::RawFd;

use ahash::AHashMap;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("client already assigned to a room")]
    AlreadyAssigned,
    #[error("no room with id {0}")]
    UnknownRoom(i32),
}

struct Room {
    members: BTreeSet<RawFd>,
}

struct Inner {
    rooms: BTreeMap<i32, Room>,
    assignments: AHashMap<RawFd, i32>,
}

/// Process-wide room membership table, shared by reference from startup.
pub struct RoomTable {
    inner: Mutex<Inner>,
}

impl RoomTable {
    /// Create the table with rooms `0..count`.
    pub fn with_rooms(count: usize) -> Self {
        let rooms = (0..count as i32)
            .map(|id| {
                (
                    id,
                    Room {
                        members: BTreeSet::new(),
                    },
                )
            })
            .collect();
        RoomTable {
            inner: Mutex::new(Inner {
                rooms,
                assignments: AHashMap::new(),
            }),
        }
    }

    /// The room with the fewest members, ties broken by smallest id.
    pub fn next_available_room(&self) -> Option<i32> {
        let inner = self.inner.lock();
        let mut selected = None;
        let mut min_members = usize::MAX;
        for (&id, room) in &inner.rooms {
            if room.members.len() < min_members {
                min_members = room.members.len();
                selected = Some(id);
            }
        }
        selected
    }

    /// Insert `fd` into `room_id`. Fails if the fd is already assigned or
    /// the room does not exist.
    pub fn join(&self, fd: RawFd, room_id: i32) -> Result<(), JoinError> {
        let mut inner = self.inner.lock();
        if inner.assignments.contains_key(&fd) {
            return Err(JoinError::AlreadyAssigned);
        }
        let room = inner
            .rooms
            .get_mut(&room_id)
            .ok_or(JoinError::UnknownRoom(room_id))?;
        room.members.insert(fd);
        inner.assignments.insert(fd, room_id);
        Ok(())
    }

    /// Move `fd` to `room_id`, leaving its current room if it has one. The
    /// current assignment is kept when the target room does not exist.
    pub fn move_to(&self, fd: RawFd, room_id: i32) -> Result<(), JoinError> {
        let mut inner = self.inner.lock();
        if !inner.rooms.contains_key(&room_id) {
            return Err(JoinError::UnknownRoom(room_id));
        }
        if let Some(old) = inner.assignments.remove(&fd) {
            if let Some(room) = inner.rooms.get_mut(&old) {
                room.members.remove(&fd);
            }
        }
        if let Some(room) = inner.rooms.get_mut(&room_id) {
            room.members.insert(fd);
        }
        inner.assignments.insert(fd, room_id);
        Ok(())
    }

    /// Remove `fd` from its room, returning the room it left. A no-op for
    /// an unassigned fd. Pre-allocated rooms are never destroyed.
    pub fn leave(&self, fd: RawFd) -> Option<i32> {
        let mut inner = self.inner.lock();
        let room_id = inner.assignments.remove(&fd)?;
        if let Some(room) = inner.rooms.get_mut(&room_id) {
            room.members.remove(&fd);
        }
        Some(room_id)
    }

    /// The room `fd` is currently assigned to.
    pub fn room_of(&self, fd: RawFd) -> Option<i32> {
        self.inner.lock().assignments.get(&fd).copied()
    }

    /// Copy of a room's member set.
    pub fn members(&self, room_id: i32) -> Vec<RawFd> {
        let inner = self.inner.lock();
        inner
            .rooms
            .get(&room_id)
            .map(|room| room.members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Copy of a room's member set with `exclude` removed, taken under one
    /// lock acquisition for fan-out.
    pub fn recipients(&self, room_id: i32, exclude: RawFd) -> Vec<RawFd> {
        let inner = self.inner.lock();
        inner
            .rooms
            .get(&room_id)
            .map(|room| {
                room.members
                    .iter()
                    .copied()
                    .filter(|&fd| fd != exclude)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn member_count(&self, room_id: i32) -> usize {
        let inner = self.inner.lock();
        inner
            .rooms
            .get(&room_id)
            .map(|room| room.members.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_and_leave() {
        let table = RoomTable::with_rooms(2);
        table.join(10, 0).unwrap();
        assert_eq!(table.room_of(10), Some(0));
        assert_eq!(table.members(0), vec![10]);

        assert_eq!(table.leave(10), Some(0));
        assert_eq!(table.room_of(10), None);
        assert_eq!(table.member_count(0), 0);
    }

    #[test]
    fn double_join_rejected() {
        let table = RoomTable::with_rooms(2);
        table.join(10, 0).unwrap();
        assert_eq!(table.join(10, 1), Err(JoinError::AlreadyAssigned));
        // Still in the original room.
        assert_eq!(table.room_of(10), Some(0));
    }

    #[test]
    fn join_unknown_room_rejected() {
        let table = RoomTable::with_rooms(1);
        assert_eq!(table.join(10, 5), Err(JoinError::UnknownRoom(5)));
        assert_eq!(table.room_of(10), None);
    }

    #[test]
    fn leave_unjoined_is_noop() {
        let table = RoomTable::with_rooms(1);
        assert_eq!(table.leave(99), None);
    }

    #[test]
    fn member_appears_in_exactly_one_room() {
        let table = RoomTable::with_rooms(3);
        table.join(10, 0).unwrap();
        table.move_to(10, 2).unwrap();

        let mut appearances = 0;
        for room in 0..3 {
            appearances += table
                .members(room)
                .iter()
                .filter(|&&fd| fd == 10)
                .count();
        }
        assert_eq!(appearances, 1);
        assert_eq!(table.room_of(10), Some(2));
    }

    #[test]
    fn move_to_unknown_room_keeps_assignment() {
        let table = RoomTable::with_rooms(2);
        table.join(10, 1).unwrap();
        assert_eq!(table.move_to(10, 7), Err(JoinError::UnknownRoom(7)));
        assert_eq!(table.room_of(10), Some(1));
        assert_eq!(table.members(1), vec![10]);
    }

    #[test]
    fn move_to_works_for_unassigned_fd() {
        let table = RoomTable::with_rooms(2);
        table.move_to(10, 1).unwrap();
        assert_eq!(table.room_of(10), Some(1));
    }

    #[test]
    fn least_loaded_room_selected_with_smallest_id_tiebreak() {
        let table = RoomTable::with_rooms(3);
        // All empty: smallest id wins.
        assert_eq!(table.next_available_room(), Some(0));

        table.join(10, 0).unwrap();
        table.join(11, 1).unwrap();
        // Rooms 0 and 1 have one member, room 2 is empty.
        assert_eq!(table.next_available_room(), Some(2));

        table.join(12, 2).unwrap();
        // All tied again.
        assert_eq!(table.next_available_room(), Some(0));
    }

    #[test]
    fn recipients_exclude_sender() {
        let table = RoomTable::with_rooms(1);
        table.join(10, 0).unwrap();
        table.join(11, 0).unwrap();
        table.join(12, 0).unwrap();

        assert_eq!(table.recipients(0, 11), vec![10, 12]);
        assert!(table.recipients(0, 10).len() == 2);

        // Solo member: nobody to receive.
        let solo = RoomTable::with_rooms(1);
        solo.join(20, 0).unwrap();
        assert!(solo.recipients(0, 20).is_empty());
    }

    #[test]
    fn empty_rooms_are_not_destroyed() {
        let table = RoomTable::with_rooms(2);
        table.join(10, 1).unwrap();
        table.leave(10);
        // Room 1 still exists and accepts members.
        table.join(11, 1).unwrap();
        assert_eq!(table.room_of(11), Some(1));
    }
}
