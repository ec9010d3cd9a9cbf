//! Guest memory map constants

/// Main memory base address
pub const MAIN_MEM_BASE: u32 = 0x0001_0000;
/// Main memory size
pub const MAIN_MEM_SIZE: u32 = 0x0FFF_0000;

/// User memory base address
pub const USER_MEM_BASE: u32 = 0x2000_0000;
/// User memory size (256 MB)
pub const USER_MEM_SIZE: u32 = 0x1000_0000;

/// Stack area base
pub const STACK_BASE: u32 = 0xD000_0000;
/// Stack area size
pub const STACK_SIZE: u32 = 0x1000_0000;

/// Standard page size (4 KB)
pub const PAGE_SIZE: u32 = 0x1000;
/// Large page size (1 MB)
pub const LARGE_PAGE_SIZE: u32 = 0x10_0000;

/// Total address space size (4 GB, 32-bit guest pointers)
pub const ADDRESS_SPACE_SIZE: usize = 0x1_0000_0000;
