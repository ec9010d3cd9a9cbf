//! Guest memory management for ironcell
//!
//! A flat 32-bit byte-addressable guest address space backed by one host
//! reservation, so JIT-compiled code can address guest memory as
//! `host_base + guest_addr`. Guest address 0 lies outside every segment
//! and acts as the null sentinel.

pub mod constants;
pub mod pages;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use constants::*;
pub use pages::PageFlags;

/// Memory subsystem errors
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Address is outside every defined guest segment
    #[error("access to unmapped guest address 0x{addr:08x}")]
    Unmapped { addr: u32 },

    /// The requested allocation does not fit in the segment
    #[error("guest memory exhausted (requested 0x{size:x} bytes)")]
    OutOfMemory { size: u32 },

    /// The address is not the start of a live allocation
    #[error("0x{addr:08x} is not the start of a live allocation")]
    InvalidFree { addr: u32 },

    /// The host refused the address-space reservation
    #[error("failed to reserve guest address space: {0}")]
    Reserve(std::io::Error),
}

pub type Result<T> = std::result::Result<T, MemoryError>;

mod sealed {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}

/// Primitive value types that can be copied in and out of guest memory
pub trait Primitive: sealed::Sealed + Copy {}
impl Primitive for u8 {}
impl Primitive for u16 {}
impl Primitive for u32 {}
impl Primitive for u64 {}

/// First-fit allocator over one guest segment
struct RegionAllocator {
    /// Free ranges as (addr, size), sorted by address
    free: Vec<(u32, u32)>,
    /// Live allocations, addr -> size
    live: HashMap<u32, u32>,
    total: u32,
    used: u32,
}

impl RegionAllocator {
    fn new(base: u32, size: u32) -> Self {
        Self {
            free: vec![(base, size)],
            live: HashMap::new(),
            total: size,
            used: 0,
        }
    }

    fn alloc(&mut self, size: u32, align: u32) -> Option<u32> {
        let align = align.max(PAGE_SIZE);
        let size = size.checked_add(PAGE_SIZE - 1)? & !(PAGE_SIZE - 1);
        if size == 0 {
            return None;
        }

        for i in 0..self.free.len() {
            let (start, len) = self.free[i];
            let aligned = start.checked_add(align - 1)? & !(align - 1);
            let head = aligned - start;
            if (len as u64) < head as u64 + size as u64 {
                continue;
            }

            self.free.remove(i);
            if head > 0 {
                self.free.insert(i, (start, head));
            }
            let tail = len - head - size;
            if tail > 0 {
                let pos = self.free.partition_point(|&(a, _)| a < aligned + size);
                self.free.insert(pos, (aligned + size, tail));
            }
            self.live.insert(aligned, size);
            self.used += size;
            return Some(aligned);
        }
        None
    }

    fn free(&mut self, addr: u32) -> Option<u32> {
        let size = self.live.remove(&addr)?;
        self.used -= size;

        let pos = self.free.partition_point(|&(a, _)| a < addr);
        self.free.insert(pos, (addr, size));

        // Coalesce with the following range, then the preceding one
        if pos + 1 < self.free.len() && self.free[pos].0 + self.free[pos].1 == self.free[pos + 1].0
        {
            self.free[pos].1 += self.free[pos + 1].1;
            self.free.remove(pos + 1);
        }
        if pos > 0 && self.free[pos - 1].0 + self.free[pos - 1].1 == self.free[pos].0 {
            self.free[pos - 1].1 += self.free[pos].1;
            self.free.remove(pos);
        }
        Some(size)
    }
}

/// Guest address space manager
pub struct MemoryManager {
    base: *mut u8,
    user: Mutex<RegionAllocator>,
    stack: Mutex<RegionAllocator>,
}

// SAFETY: the backing reservation lives for the whole MemoryManager
// lifetime and raw guest accesses carry no more synchronization than the
// guest program itself provides, matching real hardware.
unsafe impl Send for MemoryManager {}
unsafe impl Sync for MemoryManager {}

impl MemoryManager {
    /// Reserve the guest address space
    pub fn new() -> Result<Arc<Self>> {
        // SAFETY: anonymous mapping, start address chosen by the kernel.
        // MAP_NORESERVE keeps the 4 GB reservation cheap until touched.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                ADDRESS_SPACE_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(MemoryError::Reserve(std::io::Error::last_os_error()));
        }
        tracing::debug!("guest address space reserved at {:p}", base);

        Ok(Arc::new(Self {
            base: base.cast(),
            user: Mutex::new(RegionAllocator::new(USER_MEM_BASE, USER_MEM_SIZE)),
            stack: Mutex::new(RegionAllocator::new(STACK_BASE, STACK_SIZE)),
        }))
    }

    /// Host pointer corresponding to guest address 0
    pub fn base_ptr(&self) -> *mut u8 {
        self.base
    }

    fn check(&self, addr: u32, len: u32) -> Result<()> {
        let end = addr as u64 + len as u64;
        let in_segment = |base: u32, size: u32| {
            addr >= base && end <= base as u64 + size as u64
        };
        if in_segment(MAIN_MEM_BASE, MAIN_MEM_SIZE)
            || in_segment(USER_MEM_BASE, USER_MEM_SIZE)
            || in_segment(STACK_BASE, STACK_SIZE)
        {
            Ok(())
        } else {
            Err(MemoryError::Unmapped { addr })
        }
    }

    /// Read a primitive in host byte order
    pub fn read<T: Primitive>(&self, addr: u32) -> Result<T> {
        self.check(addr, std::mem::size_of::<T>() as u32)?;
        // SAFETY: range checked above; unaligned guest accesses are legal.
        Ok(unsafe { self.base.add(addr as usize).cast::<T>().read_unaligned() })
    }

    /// Write a primitive in host byte order
    pub fn write<T: Primitive>(&self, addr: u32, value: T) -> Result<()> {
        self.check(addr, std::mem::size_of::<T>() as u32)?;
        // SAFETY: range checked above.
        unsafe {
            self.base.add(addr as usize).cast::<T>().write_unaligned(value);
        }
        Ok(())
    }

    /// Read a big-endian u16
    pub fn read_be16(&self, addr: u32) -> Result<u16> {
        self.read::<u16>(addr).map(u16::from_be)
    }

    /// Read a big-endian u32
    pub fn read_be32(&self, addr: u32) -> Result<u32> {
        self.read::<u32>(addr).map(u32::from_be)
    }

    /// Read a big-endian u64
    pub fn read_be64(&self, addr: u32) -> Result<u64> {
        self.read::<u64>(addr).map(u64::from_be)
    }

    /// Write a big-endian u16
    pub fn write_be16(&self, addr: u32, value: u16) -> Result<()> {
        self.write::<u16>(addr, value.to_be())
    }

    /// Write a big-endian u32
    pub fn write_be32(&self, addr: u32, value: u32) -> Result<()> {
        self.write::<u32>(addr, value.to_be())
    }

    /// Write a big-endian u64
    pub fn write_be64(&self, addr: u32, value: u64) -> Result<()> {
        self.write::<u64>(addr, value.to_be())
    }

    /// Copy a byte range out of guest memory
    pub fn read_bytes(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.check(addr, buf.len() as u32)?;
        // SAFETY: range checked above.
        unsafe {
            std::ptr::copy_nonoverlapping(self.base.add(addr as usize), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    /// Copy a byte range into guest memory
    pub fn write_bytes(&self, addr: u32, buf: &[u8]) -> Result<()> {
        self.check(addr, buf.len() as u32)?;
        // SAFETY: range checked above.
        unsafe {
            std::ptr::copy_nonoverlapping(buf.as_ptr(), self.base.add(addr as usize), buf.len());
        }
        Ok(())
    }

    /// Allocate user memory with the requested alignment
    pub fn allocate(&self, size: u32, align: u32, _flags: PageFlags) -> Result<u32> {
        self.user
            .lock()
            .alloc(size, align)
            .ok_or(MemoryError::OutOfMemory { size })
    }

    /// Release a user allocation
    pub fn free(&self, addr: u32) -> Result<()> {
        self.user
            .lock()
            .free(addr)
            .map(|_| ())
            .ok_or(MemoryError::InvalidFree { addr })
    }

    /// Allocate a thread stack from the stack segment
    pub fn allocate_stack(&self, size: u32) -> Result<u32> {
        self.stack
            .lock()
            .alloc(size, PAGE_SIZE)
            .ok_or(MemoryError::OutOfMemory { size })
    }

    /// Release a thread stack
    pub fn free_stack(&self, addr: u32) -> Result<()> {
        self.stack
            .lock()
            .free(addr)
            .map(|_| ())
            .ok_or(MemoryError::InvalidFree { addr })
    }

    /// (total, available) bytes of user memory
    pub fn user_memory_stats(&self) -> (u32, u32) {
        let user = self.user.lock();
        (user.total, user.total - user.used)
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        // SAFETY: base was returned by mmap with this exact length.
        unsafe {
            libc::munmap(self.base.cast(), ADDRESS_SPACE_SIZE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_address_is_unmapped() {
        let mem = MemoryManager::new().unwrap();
        assert!(matches!(
            mem.read::<u32>(0),
            Err(MemoryError::Unmapped { addr: 0 })
        ));
        assert!(mem.write::<u32>(0, 1).is_err());
    }

    #[test]
    fn test_allocator_coalescing() {
        let mut alloc = RegionAllocator::new(0x1000, 0x10000);
        let a = alloc.alloc(0x1000, 0x1000).unwrap();
        let b = alloc.alloc(0x1000, 0x1000).unwrap();
        let c = alloc.alloc(0x1000, 0x1000).unwrap();

        alloc.free(a).unwrap();
        alloc.free(c).unwrap();
        alloc.free(b).unwrap();

        // Everything coalesced back into one range
        assert_eq!(alloc.free, vec![(0x1000, 0x10000)]);
        assert_eq!(alloc.used, 0);
    }

    #[test]
    fn test_allocator_double_free() {
        let mut alloc = RegionAllocator::new(0x1000, 0x10000);
        let a = alloc.alloc(0x1000, 0x1000).unwrap();
        assert!(alloc.free(a).is_some());
        assert!(alloc.free(a).is_none());
    }
}
