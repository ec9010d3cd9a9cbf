//! Kernel object table entries
//!
//! Every LV2 object a guest can hold a handle to is one variant of
//! [`KernelObject`]. Lookups state the kind they expect and get `None`
//! on a kind mismatch, which the syscall layer maps to ESRCH.

use std::sync::Arc;

use crate::sync::cond::GuestCond;
use crate::sync::event::{EventFlag, EventQueue};
use crate::sync::mutex::GuestMutex;
use crate::sync::semaphore::GuestSemaphore;

/// A user-memory reservation created by sys_memory_container_create
#[derive(Debug)]
pub struct MemoryContainer {
    pub size: u32,
}

/// One entry in the kernel object table
pub enum KernelObject {
    Mutex(Arc<GuestMutex>),
    Cond(Arc<GuestCond>),
    Semaphore(Arc<GuestSemaphore>),
    EventFlag(Arc<EventFlag>),
    EventQueue(Arc<EventQueue>),
    MemoryContainer(Arc<MemoryContainer>),
}

impl KernelObject {
    pub fn kind(&self) -> &'static str {
        match self {
            KernelObject::Mutex(_) => "mutex",
            KernelObject::Cond(_) => "cond",
            KernelObject::Semaphore(_) => "semaphore",
            KernelObject::EventFlag(_) => "event flag",
            KernelObject::EventQueue(_) => "event queue",
            KernelObject::MemoryContainer(_) => "memory container",
        }
    }

    pub fn as_mutex(&self) -> Option<Arc<GuestMutex>> {
        match self {
            KernelObject::Mutex(m) => Some(Arc::clone(m)),
            _ => None,
        }
    }

    pub fn as_cond(&self) -> Option<Arc<GuestCond>> {
        match self {
            KernelObject::Cond(c) => Some(Arc::clone(c)),
            _ => None,
        }
    }

    pub fn as_semaphore(&self) -> Option<Arc<GuestSemaphore>> {
        match self {
            KernelObject::Semaphore(s) => Some(Arc::clone(s)),
            _ => None,
        }
    }

    pub fn as_event_flag(&self) -> Option<Arc<EventFlag>> {
        match self {
            KernelObject::EventFlag(e) => Some(Arc::clone(e)),
            _ => None,
        }
    }

    pub fn as_event_queue(&self) -> Option<Arc<EventQueue>> {
        match self {
            KernelObject::EventQueue(q) => Some(Arc::clone(q)),
            _ => None,
        }
    }

    pub fn as_memory_container(&self) -> Option<Arc<MemoryContainer>> {
        match self {
            KernelObject::MemoryContainer(c) => Some(Arc::clone(c)),
            _ => None,
        }
    }
}
