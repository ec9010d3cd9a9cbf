//! Guest event flag and event queue

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::errno::{Errno, CELL_EBUSY, CELL_EINVAL, CELL_ETIMEDOUT};
use crate::timer::clamp_timeout;

/// Wait for every bit in the mask
pub const EVENT_FLAG_WAIT_AND: u32 = 0x01;
/// Wait for any bit in the mask
pub const EVENT_FLAG_WAIT_OR: u32 = 0x02;
/// Clear the whole flag word once satisfied
pub const EVENT_FLAG_CLEAR_ALL: u32 = 0x10;
/// Clear only the matched bits once satisfied
pub const EVENT_FLAG_CLEAR: u32 = 0x20;

/// An LV2 event flag: a 64-bit word threads wait on by bit pattern
pub struct EventFlag {
    pub name: String,
    bits: Mutex<u64>,
    changed: Condvar,
}

impl EventFlag {
    pub fn new(name: String, initial: u64) -> Self {
        Self {
            name,
            bits: Mutex::new(initial),
            changed: Condvar::new(),
        }
    }

    pub fn value(&self) -> u64 {
        *self.bits.lock()
    }

    fn satisfied(bits: u64, mask: u64, mode: u32) -> bool {
        if mode & EVENT_FLAG_WAIT_AND != 0 {
            bits & mask == mask
        } else {
            bits & mask != 0
        }
    }

    /// Wait until the mask is satisfied; returns the flag word as it
    /// was at that moment.
    pub fn wait(&self, mask: u64, mode: u32, timeout_usec: u64) -> Result<u64, Errno> {
        if mode & (EVENT_FLAG_WAIT_AND | EVENT_FLAG_WAIT_OR) == 0 {
            return Err(CELL_EINVAL);
        }

        let mut bits = self.bits.lock();
        if timeout_usec == 0 {
            while !Self::satisfied(*bits, mask, mode) {
                self.changed.wait(&mut bits);
            }
        } else {
            let deadline =
                std::time::Instant::now() + Duration::from_micros(clamp_timeout(timeout_usec));
            while !Self::satisfied(*bits, mask, mode) {
                if self.changed.wait_until(&mut bits, deadline).timed_out()
                    && !Self::satisfied(*bits, mask, mode)
                {
                    return Err(CELL_ETIMEDOUT);
                }
            }
        }

        let seen = *bits;
        if mode & EVENT_FLAG_CLEAR_ALL != 0 {
            *bits = 0;
        } else if mode & EVENT_FLAG_CLEAR != 0 {
            *bits &= !mask;
        }
        Ok(seen)
    }

    pub fn set(&self, bits: u64) {
        *self.bits.lock() |= bits;
        self.changed.notify_all();
    }

    pub fn clear(&self, mask: u64) {
        *self.bits.lock() &= mask;
    }
}

/// One queued event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub source: u64,
    pub data1: u64,
    pub data2: u64,
    pub data3: u64,
}

/// An LV2 event queue with a fixed capacity
pub struct EventQueue {
    pub name: String,
    pub key: u64,
    capacity: usize,
    events: Mutex<VecDeque<Event>>,
    arrived: Condvar,
}

impl EventQueue {
    pub fn new(name: String, key: u64, capacity: usize) -> Self {
        Self {
            name,
            key,
            capacity,
            events: Mutex::new(VecDeque::new()),
            arrived: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn send(&self, event: Event) -> Result<(), Errno> {
        let mut events = self.events.lock();
        if events.len() >= self.capacity {
            return Err(CELL_EBUSY);
        }
        events.push_back(event);
        self.arrived.notify_one();
        Ok(())
    }

    /// Pop the oldest event, waiting up to `timeout_usec` (0 = forever)
    pub fn receive(&self, timeout_usec: u64) -> Result<Event, Errno> {
        let mut events = self.events.lock();
        if timeout_usec == 0 {
            while events.is_empty() {
                self.arrived.wait(&mut events);
            }
        } else {
            let deadline =
                std::time::Instant::now() + Duration::from_micros(clamp_timeout(timeout_usec));
            while events.is_empty() {
                if self.arrived.wait_until(&mut events, deadline).timed_out()
                    && events.is_empty()
                {
                    return Err(CELL_ETIMEDOUT);
                }
            }
        }
        Ok(events.pop_front().expect("queue checked non-empty"))
    }

    /// Throw away everything queued
    pub fn drain(&self) -> usize {
        let mut events = self.events.lock();
        let n = events.len();
        events.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_event_flag_or_wait() {
        let flag = EventFlag::new(String::new(), 0);
        flag.set(0b100);
        let seen = flag.wait(0b110, EVENT_FLAG_WAIT_OR, 1_000).unwrap();
        assert_eq!(seen, 0b100);
    }

    #[test]
    fn test_event_flag_and_needs_all_bits() {
        let flag = EventFlag::new(String::new(), 0b010);
        assert_eq!(
            flag.wait(0b110, EVENT_FLAG_WAIT_AND, 1_000),
            Err(CELL_ETIMEDOUT)
        );
        flag.set(0b100);
        flag.wait(0b110, EVENT_FLAG_WAIT_AND, 1_000).unwrap();
    }

    #[test]
    fn test_event_flag_clear_modes() {
        let flag = EventFlag::new(String::new(), 0b111);
        flag.wait(0b001, EVENT_FLAG_WAIT_OR | EVENT_FLAG_CLEAR, 0).unwrap();
        assert_eq!(flag.value(), 0b110);
        flag.wait(0b010, EVENT_FLAG_WAIT_OR | EVENT_FLAG_CLEAR_ALL, 0)
            .unwrap();
        assert_eq!(flag.value(), 0);
    }

    #[test]
    fn test_queue_ordering_and_capacity() {
        let q = EventQueue::new(String::new(), 0, 2);
        q.send(Event { source: 1, data1: 0, data2: 0, data3: 0 }).unwrap();
        q.send(Event { source: 2, data1: 0, data2: 0, data3: 0 }).unwrap();
        assert_eq!(
            q.send(Event { source: 3, data1: 0, data2: 0, data3: 0 }),
            Err(CELL_EBUSY)
        );
        assert_eq!(q.receive(0).unwrap().source, 1);
        assert_eq!(q.receive(0).unwrap().source, 2);
        assert_eq!(q.receive(1_000), Err(CELL_ETIMEDOUT));
    }

    #[test]
    fn test_queue_blocking_receive() {
        let q = Arc::new(EventQueue::new(String::new(), 0, 8));
        let q2 = Arc::clone(&q);
        let receiver = std::thread::spawn(move || q2.receive(0));
        std::thread::sleep(Duration::from_millis(10));
        q.send(Event { source: 9, data1: 1, data2: 2, data3: 3 }).unwrap();
        assert_eq!(receiver.join().unwrap().unwrap().source, 9);
    }

    #[test]
    fn test_queue_drain() {
        let q = EventQueue::new(String::new(), 0, 8);
        for i in 0..3 {
            q.send(Event { source: i, data1: 0, data2: 0, data3: 0 }).unwrap();
        }
        assert_eq!(q.drain(), 3);
        assert!(q.is_empty());
    }
}
