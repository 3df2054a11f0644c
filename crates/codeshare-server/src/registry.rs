use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::session::Session;

/// One room: its session behind the room lock, plus a closed flag that the
/// registry reads without taking that lock.
#[derive(Debug)]
pub struct RoomSlot {
    closed: AtomicBool,
    session: Mutex<Session>,
}

impl RoomSlot {
    fn new(key: &str) -> Self {
        Self {
            closed: AtomicBool::new(false),
            session: Mutex::new(Session::new(key)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Publish that the session has closed. Called with the session lock
    /// held, right after the session itself moved to `Closed`.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

pub type SharedSession = Arc<RoomSlot>;

/// Lock a session, recovering the guard if a previous holder panicked.
pub fn lock_session(slot: &RoomSlot) -> MutexGuard<'_, Session> {
    slot.session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Point-in-time counts for the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub rooms: usize,
    pub participants: usize,
}

/// Map of live rooms by key.
///
/// The map lock is only held for lookup, insert and remove, and never waits
/// on a room lock. Closed rooms are recognised by the slot's flag, so a busy
/// room never stalls lookups for another.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, SharedSession>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, SharedSession>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the live session for `key`, creating it if absent. The flag is
    /// true only for the caller that created it. A closed session still in
    /// the map is replaced.
    pub fn get_or_create(&self, key: &str) -> (SharedSession, bool) {
        let mut rooms = self.map();
        if let Some(existing) = rooms.get(key)
            && !existing.is_closed()
        {
            return (Arc::clone(existing), false);
        }
        let slot = Arc::new(RoomSlot::new(key));
        rooms.insert(key.to_string(), Arc::clone(&slot));
        (slot, true)
    }

    /// Live session for `key`. Closed sessions read as absent.
    pub fn get(&self, key: &str) -> Option<SharedSession> {
        self.map()
            .get(key)
            .filter(|slot| !slot.is_closed())
            .map(Arc::clone)
    }

    /// Drop the session for `key` if nobody is attached. Returns true if an
    /// entry was removed.
    pub fn remove_if_empty(&self, key: &str) -> bool {
        let Some(slot) = self.map().get(key).map(Arc::clone) else {
            return false;
        };
        {
            let mut session = lock_session(&slot);
            if session.member_count() > 0 {
                return false;
            }
            session.close();
            slot.mark_closed();
        }
        // Only remove our slot; a replacement may have been inserted since
        let mut rooms = self.map();
        if rooms.get(key).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
            rooms.remove(key);
            return true;
        }
        false
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn stats(&self) -> RegistryStats {
        let live: Vec<SharedSession> = self
            .map()
            .values()
            .filter(|slot| !slot.is_closed())
            .map(Arc::clone)
            .collect();
        let mut stats = RegistryStats::default();
        for slot in &live {
            let session = lock_session(slot);
            if session.is_closed() {
                continue;
            }
            stats.rooms += 1;
            stats.participants += session.member_count();
        }
        stats
    }
}
