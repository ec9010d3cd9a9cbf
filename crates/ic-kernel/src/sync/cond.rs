//! Guest condition variable
//!
//! Bound to exactly one guest mutex at creation time. A wait
//! surrenders the mutex (including its recursion depth), parks until a
//! signal or the timeout, then takes the mutex back before returning,
//! so the caller always holds it again, even on ETIMEDOUT.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::errno::{Errno, CELL_ETIMEDOUT};
use crate::timer::clamp_timeout;

use super::mutex::GuestMutex;

#[derive(Debug, Default)]
struct State {
    waiters: u32,
    /// Wake tickets not yet consumed; never exceeds `waiters`
    signals: u32,
}

/// An LV2 condition variable
pub struct GuestCond {
    pub name: String,
    mutex: Arc<GuestMutex>,
    state: Mutex<State>,
    signal: Condvar,
}

impl GuestCond {
    pub fn new(name: String, mutex: Arc<GuestMutex>) -> Self {
        Self {
            name,
            mutex,
            state: Mutex::new(State::default()),
            signal: Condvar::new(),
        }
    }

    /// The mutex this condition variable was created against
    pub fn mutex(&self) -> &Arc<GuestMutex> {
        &self.mutex
    }

    /// Wait for a signal. The calling thread must own the mutex;
    /// `timeout_usec` of 0 waits forever.
    pub fn wait(&self, thread_id: u64, timeout_usec: u64) -> Result<(), Errno> {
        // Register as a waiter before surrendering the mutex, so a
        // signaler running between the two cannot miss us.
        let mut state = self.state.lock();
        let depth = match self.mutex.surrender(thread_id) {
            Ok(depth) => depth,
            Err(e) => return Err(e),
        };
        state.waiters += 1;

        let deadline = (timeout_usec != 0).then(|| {
            std::time::Instant::now() + Duration::from_micros(clamp_timeout(timeout_usec))
        });

        let mut timed_out = false;
        while state.signals == 0 {
            match deadline {
                None => self.signal.wait(&mut state),
                Some(deadline) => {
                    if self.signal.wait_until(&mut state, deadline).timed_out()
                        && state.signals == 0
                    {
                        timed_out = true;
                        break;
                    }
                }
            }
        }
        if !timed_out {
            state.signals -= 1;
        }
        state.waiters -= 1;
        drop(state);

        self.mutex.reacquire(thread_id, depth);
        if timed_out {
            Err(CELL_ETIMEDOUT)
        } else {
            Ok(())
        }
    }

    /// Wake one waiter. Signals with no waiter are lost, as on LV2.
    pub fn signal(&self) {
        let mut state = self.state.lock();
        if state.signals < state.waiters {
            state.signals += 1;
            self.signal.notify_one();
        }
    }

    pub fn has_waiters(&self) -> bool {
        self.state.lock().waiters > 0
    }

    /// Wake every current waiter
    pub fn signal_all(&self) {
        let mut state = self.state.lock();
        state.signals = state.waiters;
        self.signal.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Arc<GuestMutex>, Arc<GuestCond>) {
        let mutex = Arc::new(GuestMutex::new(String::new(), false));
        let cond = Arc::new(GuestCond::new(String::new(), Arc::clone(&mutex)));
        (mutex, cond)
    }

    #[test]
    fn test_wait_requires_ownership() {
        let (_mutex, cond) = pair();
        assert!(cond.wait(1, 0).is_err());
    }

    #[test]
    fn test_signal_wakes_waiter_and_returns_mutex() {
        let (mutex, cond) = pair();
        mutex.lock(1, 0).unwrap();

        let (m2, c2) = (Arc::clone(&mutex), Arc::clone(&cond));
        let waiter = std::thread::spawn(move || {
            c2.wait(1, 0).unwrap();
            // Wait reacquired the mutex for us
            assert_eq!(m2.owner(), Some(1));
            m2.unlock(1).unwrap();
        });

        // Give the waiter time to park, then signal from thread 2
        std::thread::sleep(Duration::from_millis(10));
        mutex.lock(2, 0).unwrap();
        cond.signal();
        mutex.unlock(2).unwrap();

        waiter.join().unwrap();
    }

    #[test]
    fn test_timeout_reacquires_mutex() {
        let (mutex, cond) = pair();
        mutex.lock(1, 0).unwrap();
        assert_eq!(cond.wait(1, 1_000), Err(CELL_ETIMEDOUT));
        // Still the owner after the timeout
        assert_eq!(mutex.owner(), Some(1));
    }

    #[test]
    fn test_signal_without_waiters_is_lost() {
        let (mutex, cond) = pair();
        cond.signal();
        mutex.lock(1, 0).unwrap();
        // The earlier signal must not satisfy this wait
        assert_eq!(cond.wait(1, 1_000), Err(CELL_ETIMEDOUT));
    }

    #[test]
    fn test_signal_all_wakes_everyone() {
        let (mutex, cond) = pair();
        let mut waiters = Vec::new();
        for tid in 1..=3u64 {
            let (m, c) = (Arc::clone(&mutex), Arc::clone(&cond));
            waiters.push(std::thread::spawn(move || {
                m.lock(tid, 0).unwrap();
                c.wait(tid, 0).unwrap();
                m.unlock(tid).unwrap();
            }));
        }

        std::thread::sleep(Duration::from_millis(20));
        cond.signal_all();
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }
}
