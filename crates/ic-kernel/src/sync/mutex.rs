//! Guest mutex
//!
//! Ownership is tracked by guest thread id, not by host thread, because
//! a guest thread may block inside a syscall while its host carrier is
//! parked. The host-side Mutex/Condvar pair only protects the ownership
//! record; it is never held across a guest-visible wait.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::errno::{Errno, CELL_EBUSY, CELL_EDEADLK, CELL_EPERM, CELL_ETIMEDOUT};
use crate::timer::clamp_timeout;

#[derive(Debug, Default)]
struct Inner {
    owner: Option<u64>,
    /// Lock depth of the current owner (recursive mutexes)
    depth: u32,
}

/// An LV2 mutex
pub struct GuestMutex {
    pub name: String,
    pub recursive: bool,
    inner: Mutex<Inner>,
    available: Condvar,
}

impl GuestMutex {
    pub fn new(name: String, recursive: bool) -> Self {
        Self {
            name,
            recursive,
            inner: Mutex::new(Inner::default()),
            available: Condvar::new(),
        }
    }

    pub fn owner(&self) -> Option<u64> {
        self.inner.lock().owner
    }

    /// Lock on behalf of a guest thread. `timeout_usec` of 0 waits
    /// forever.
    pub fn lock(&self, thread_id: u64, timeout_usec: u64) -> Result<(), Errno> {
        let mut inner = self.inner.lock();
        if inner.owner == Some(thread_id) {
            if self.recursive {
                inner.depth += 1;
                return Ok(());
            }
            return Err(CELL_EDEADLK);
        }

        if timeout_usec == 0 {
            while inner.owner.is_some() {
                self.available.wait(&mut inner);
            }
        } else {
            let deadline =
                std::time::Instant::now() + Duration::from_micros(clamp_timeout(timeout_usec));
            while inner.owner.is_some() {
                if self.available.wait_until(&mut inner, deadline).timed_out() {
                    if inner.owner.is_some() {
                        return Err(CELL_ETIMEDOUT);
                    }
                    break;
                }
            }
        }

        inner.owner = Some(thread_id);
        inner.depth = 1;
        Ok(())
    }

    pub fn try_lock(&self, thread_id: u64) -> Result<(), Errno> {
        let mut inner = self.inner.lock();
        if inner.owner == Some(thread_id) {
            if self.recursive {
                inner.depth += 1;
                return Ok(());
            }
            return Err(CELL_EDEADLK);
        }
        if inner.owner.is_some() {
            return Err(CELL_EBUSY);
        }
        inner.owner = Some(thread_id);
        inner.depth = 1;
        Ok(())
    }

    pub fn unlock(&self, thread_id: u64) -> Result<(), Errno> {
        let mut inner = self.inner.lock();
        if inner.owner != Some(thread_id) {
            return Err(CELL_EPERM);
        }
        inner.depth -= 1;
        if inner.depth == 0 {
            inner.owner = None;
            self.available.notify_one();
        }
        Ok(())
    }

    /// Give up the mutex entirely for a condition wait, returning the
    /// lock depth to restore afterwards.
    pub(crate) fn surrender(&self, thread_id: u64) -> Result<u32, Errno> {
        let mut inner = self.inner.lock();
        if inner.owner != Some(thread_id) {
            return Err(CELL_EPERM);
        }
        let depth = inner.depth;
        inner.owner = None;
        inner.depth = 0;
        self.available.notify_one();
        Ok(depth)
    }

    /// Take the mutex back after a condition wait, restoring the
    /// surrendered lock depth.
    pub(crate) fn reacquire(&self, thread_id: u64, depth: u32) {
        let mut inner = self.inner.lock();
        while inner.owner.is_some() {
            self.available.wait(&mut inner);
        }
        inner.owner = Some(thread_id);
        inner.depth = depth;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_lock_unlock() {
        let m = GuestMutex::new(String::new(), false);
        m.lock(1, 0).unwrap();
        assert_eq!(m.owner(), Some(1));
        m.unlock(1).unwrap();
        assert_eq!(m.owner(), None);
    }

    #[test]
    fn test_unlock_by_non_owner() {
        let m = GuestMutex::new(String::new(), false);
        m.lock(1, 0).unwrap();
        assert_eq!(m.unlock(2), Err(CELL_EPERM));
    }

    #[test]
    fn test_relock_deadlock_unless_recursive() {
        let m = GuestMutex::new(String::new(), false);
        m.lock(1, 0).unwrap();
        assert_eq!(m.lock(1, 0), Err(CELL_EDEADLK));

        let r = GuestMutex::new(String::new(), true);
        r.lock(1, 0).unwrap();
        r.lock(1, 0).unwrap();
        r.unlock(1).unwrap();
        assert_eq!(r.owner(), Some(1));
        r.unlock(1).unwrap();
        assert_eq!(r.owner(), None);
    }

    #[test]
    fn test_try_lock_contended() {
        let m = GuestMutex::new(String::new(), false);
        m.lock(1, 0).unwrap();
        assert_eq!(m.try_lock(2), Err(CELL_EBUSY));
        m.unlock(1).unwrap();
        m.try_lock(2).unwrap();
        assert_eq!(m.owner(), Some(2));
    }

    #[test]
    fn test_lock_timeout() {
        let m = GuestMutex::new(String::new(), false);
        m.lock(1, 0).unwrap();
        assert_eq!(m.lock(2, 1_000), Err(CELL_ETIMEDOUT));
    }

    #[test]
    fn test_contended_handoff() {
        let m = Arc::new(GuestMutex::new(String::new(), false));
        m.lock(1, 0).unwrap();

        let m2 = Arc::clone(&m);
        let waiter = std::thread::spawn(move || {
            m2.lock(2, 0).unwrap();
            m2.unlock(2).unwrap();
        });

        std::thread::sleep(std::time::Duration::from_millis(10));
        m.unlock(1).unwrap();
        waiter.join().unwrap();
        assert_eq!(m.owner(), None);
    }
}
