//! Coarse readers/writer lock with split acquire/release
//!
//! The index exposes its consistency boundary as explicit `rlock`/`runlock`
//! calls so a read share can be held across an arbitrary sequence of typed
//! lookups. `std::sync::RwLock` guards cannot be released from a different
//! call frame, hence this small condvar-based lock.

use std::sync::{Condvar, Mutex};

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
}

/// Readers/writer lock whose acquire and release are separate calls.
#[derive(Debug, Default)]
pub struct SharedLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl SharedLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rlock(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while state.writer {
            state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        state.readers += 1;
    }

    pub fn runlock(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        debug_assert!(state.readers > 0, "runlock without matching rlock");
        state.readers = state.readers.saturating_sub(1);
        if state.readers == 0 {
            self.cond.notify_all();
        }
    }

    pub fn wlock(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while state.writer || state.readers > 0 {
            state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        state.writer = true;
    }

    pub fn wunlock(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        debug_assert!(state.writer, "wunlock without matching wlock");
        state.writer = false;
        self.cond.notify_all();
    }
}
