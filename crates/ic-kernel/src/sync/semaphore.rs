//! Guest counting semaphore

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::errno::{Errno, CELL_EBUSY, CELL_ETIMEDOUT};
use crate::timer::clamp_timeout;

/// An LV2 semaphore
pub struct GuestSemaphore {
    pub name: String,
    pub max: i32,
    count: Mutex<i32>,
    posted: Condvar,
}

impl GuestSemaphore {
    pub fn new(name: String, initial: i32, max: i32) -> Self {
        Self {
            name,
            max,
            count: Mutex::new(initial),
            posted: Condvar::new(),
        }
    }

    pub fn value(&self) -> i32 {
        *self.count.lock()
    }

    /// Take one unit, waiting up to `timeout_usec` (0 = forever)
    pub fn wait(&self, timeout_usec: u64) -> Result<(), Errno> {
        let mut count = self.count.lock();
        if timeout_usec == 0 {
            while *count == 0 {
                self.posted.wait(&mut count);
            }
        } else {
            let deadline =
                std::time::Instant::now() + Duration::from_micros(clamp_timeout(timeout_usec));
            while *count == 0 {
                if self.posted.wait_until(&mut count, deadline).timed_out() && *count == 0 {
                    return Err(CELL_ETIMEDOUT);
                }
            }
        }
        *count -= 1;
        Ok(())
    }

    pub fn try_wait(&self) -> Result<(), Errno> {
        let mut count = self.count.lock();
        if *count == 0 {
            return Err(CELL_EBUSY);
        }
        *count -= 1;
        Ok(())
    }

    /// Release `n` units; fails without side effects if that would
    /// exceed the maximum.
    pub fn post(&self, n: i32) -> Result<(), Errno> {
        let mut count = self.count.lock();
        if *count > self.max - n {
            return Err(CELL_EBUSY);
        }
        *count += n;
        for _ in 0..n {
            self.posted.notify_one();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_wait_and_post() {
        let sem = GuestSemaphore::new(String::new(), 2, 8);
        sem.wait(0).unwrap();
        sem.wait(0).unwrap();
        assert_eq!(sem.value(), 0);
        assert_eq!(sem.try_wait(), Err(CELL_EBUSY));
        sem.post(1).unwrap();
        sem.try_wait().unwrap();
    }

    #[test]
    fn test_post_past_max() {
        let sem = GuestSemaphore::new(String::new(), 7, 8);
        assert_eq!(sem.post(2), Err(CELL_EBUSY));
        assert_eq!(sem.value(), 7);
        sem.post(1).unwrap();
    }

    #[test]
    fn test_wait_timeout() {
        let sem = GuestSemaphore::new(String::new(), 0, 8);
        assert_eq!(sem.wait(1_000), Err(CELL_ETIMEDOUT));
    }

    #[test]
    fn test_post_unblocks_waiter() {
        let sem = Arc::new(GuestSemaphore::new(String::new(), 0, 8));
        let s2 = Arc::clone(&sem);
        let waiter = std::thread::spawn(move || s2.wait(0));
        std::thread::sleep(Duration::from_millis(10));
        sem.post(1).unwrap();
        waiter.join().unwrap().unwrap();
        assert_eq!(sem.value(), 0);
    }
}
