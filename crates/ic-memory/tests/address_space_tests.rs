//! Tests for 32-bit guest address space validation

use ic_memory::{constants::*, MemoryManager, PageFlags};

#[test]
fn test_address_space_boundaries() {
    let mem = MemoryManager::new().unwrap();

    // Test that we can access main memory
    let addr = MAIN_MEM_BASE;
    mem.write::<u32>(addr, 0xDEADBEEF).unwrap();
    assert_eq!(mem.read::<u32>(addr).unwrap(), 0xDEADBEEF);

    // Test upper boundary of main memory
    let addr = MAIN_MEM_BASE + MAIN_MEM_SIZE - 4;
    mem.write::<u32>(addr, 0xCAFEBABE).unwrap();
    assert_eq!(mem.read::<u32>(addr).unwrap(), 0xCAFEBABE);

    // Test user memory boundaries
    let alloc_addr = mem.allocate(0x1000, 0x1000, PageFlags::RW).unwrap();
    assert!(alloc_addr >= USER_MEM_BASE);
    assert!(alloc_addr < USER_MEM_BASE + USER_MEM_SIZE);

    mem.write::<u64>(alloc_addr, 0x1234567890ABCDEF).unwrap();
    assert_eq!(mem.read::<u64>(alloc_addr).unwrap(), 0x1234567890ABCDEF);
}

#[test]
fn test_memory_region_isolation() {
    let mem = MemoryManager::new().unwrap();

    let main_addr = MAIN_MEM_BASE + 0x1000;
    mem.write::<u32>(main_addr, 0x11111111).unwrap();

    let user_addr = mem.allocate(0x1000, 0x1000, PageFlags::RW).unwrap();
    mem.write::<u32>(user_addr, 0x22222222).unwrap();

    let stack_addr = mem.allocate_stack(0x10000).unwrap();
    mem.write::<u32>(stack_addr, 0x33333333).unwrap();

    assert_eq!(mem.read::<u32>(main_addr).unwrap(), 0x11111111);
    assert_eq!(mem.read::<u32>(user_addr).unwrap(), 0x22222222);
    assert_eq!(mem.read::<u32>(stack_addr).unwrap(), 0x33333333);
}

#[test]
fn test_overlapping_allocations_prevention() {
    let mem = MemoryManager::new().unwrap();

    let size = 0x100000; // 1 MB
    let addr1 = mem.allocate(size, 0x1000, PageFlags::RW).unwrap();

    for i in 0..100 {
        mem.write::<u32>(addr1 + i * 4, i).unwrap();
    }

    let addr2 = mem.allocate(size, 0x1000, PageFlags::RW).unwrap();

    // Ensure they don't overlap
    assert!(addr2 >= addr1 + size || addr1 >= addr2 + size);

    mem.write::<u32>(addr2, 0xFFFFFFFF).unwrap();

    // First allocation is unchanged
    assert_eq!(mem.read::<u32>(addr1).unwrap(), 0);
    assert_eq!(mem.read::<u32>(addr1 + 4).unwrap(), 1);
}

#[test]
fn test_alignment_honored() {
    let mem = MemoryManager::new().unwrap();

    // Force misalignment pressure with a small allocation first
    mem.allocate(0x1000, 0x1000, PageFlags::RW).unwrap();

    let addr = mem.allocate(0x100000, LARGE_PAGE_SIZE, PageFlags::RW).unwrap();
    assert_eq!(addr % LARGE_PAGE_SIZE, 0, "allocation not 1 MiB aligned");
}

#[test]
fn test_allocation_exhaustion() {
    let mem = MemoryManager::new().unwrap();

    // Drain the whole user segment in 16 MB chunks, then expect failure
    let chunk = 0x100_0000;
    let mut count = 0;
    while mem.allocate(chunk, 0x1000, PageFlags::RW).is_ok() {
        count += 1;
        assert!(count <= (USER_MEM_SIZE / chunk), "allocator returned overlapping memory");
    }
    assert_eq!(count, USER_MEM_SIZE / chunk);

    // Freeing makes space available again
    let (total, available) = mem.user_memory_stats();
    assert_eq!(available, 0);
    assert_eq!(total, USER_MEM_SIZE);
}

#[test]
fn test_free_and_reuse() {
    let mem = MemoryManager::new().unwrap();

    let addr = mem.allocate(0x2000, 0x1000, PageFlags::RW).unwrap();
    mem.free(addr).unwrap();
    assert!(mem.free(addr).is_err());

    let again = mem.allocate(0x2000, 0x1000, PageFlags::RW).unwrap();
    assert_eq!(again, addr);
}

#[test]
fn test_allocation_size_rounding() {
    let mem = MemoryManager::new().unwrap();

    let addr1 = mem.allocate(0x1001, 0x1000, PageFlags::RW).unwrap();
    let addr2 = mem.allocate(0x1000, 0x1000, PageFlags::RW).unwrap();

    // 0x1001 rounds up to 0x2000, so the blocks are two pages apart
    assert!(addr2 >= addr1 + 0x2000);
}

#[test]
fn test_unaligned_access() {
    let mem = MemoryManager::new().unwrap();

    let addr = MAIN_MEM_BASE + 1; // Unaligned address

    mem.write::<u32>(addr, 0x12345678).unwrap();
    assert_eq!(mem.read::<u32>(addr).unwrap(), 0x12345678);

    mem.write::<u64>(addr, 0xDEADBEEFCAFEBABE).unwrap();
    assert_eq!(mem.read::<u64>(addr).unwrap(), 0xDEADBEEFCAFEBABE);
}

#[test]
fn test_big_endian_operations() {
    let mem = MemoryManager::new().unwrap();

    let addr = MAIN_MEM_BASE + 0x1000;

    mem.write_be16(addr, 0x1234).unwrap();
    assert_eq!(mem.read_be16(addr).unwrap(), 0x1234);
    assert_eq!(mem.read::<u8>(addr).unwrap(), 0x12);

    mem.write_be32(addr + 2, 0x12345678).unwrap();
    assert_eq!(mem.read_be32(addr + 2).unwrap(), 0x12345678);
    assert_eq!(mem.read::<u8>(addr + 2).unwrap(), 0x12);

    mem.write_be64(addr + 8, 0xDEADBEEFCAFEBABE).unwrap();
    assert_eq!(mem.read_be64(addr + 8).unwrap(), 0xDEADBEEFCAFEBABE);
}
