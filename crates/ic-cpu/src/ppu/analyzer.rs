//! Static control-flow discovery
//!
//! Walks guest code from an entry address, following statically known
//! branch targets, and produces the set of non-overlapping basic blocks
//! reachable from that entry. The resulting [`Function`] is the unit of
//! translation and compilation.

use std::collections::BTreeMap;

use ic_memory::MemoryManager;

use super::instruction::Instruction;

/// Upper bound on instructions per block, so a walk into data terminates
const MAX_BLOCK_INSTRUCTIONS: u32 = 4096;

/// A maximal straight-line run of guest instructions
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// Starting address
    pub address: u32,
    /// Number of bytes covered by this block
    pub size: u32,
    /// Conditional-taken or unconditional branching address (0 = none)
    pub branch_a: u32,
    /// Conditional fall-through address (0 = none)
    pub branch_b: u32,
}

impl Block {
    /// Check whether an address is inside this block
    pub fn contains(&self, addr: u32) -> bool {
        self.address <= addr && addr < self.address + self.size
    }

    /// Cut this block at `cut` and return the tail as a new block.
    ///
    /// The tail inherits both successor edges; this block is truncated
    /// and rewired to fall through into the tail.
    pub fn split(&mut self, cut: u32) -> Block {
        debug_assert!(self.address < cut && cut < self.address + self.size);

        let tail = Block {
            address: cut,
            size: self.size - (cut - self.address),
            branch_a: self.branch_a,
            branch_b: self.branch_b,
        };

        self.size = cut - self.address;
        self.branch_a = cut;
        self.branch_b = 0;

        tail
    }
}

/// An ordered collection of blocks reachable from one entry address
#[derive(Debug, Clone)]
pub struct Function {
    /// Entry address
    pub entry: u32,
    /// Blocks keyed by start address
    pub blocks: BTreeMap<u32, Block>,
}

impl Function {
    /// Block containing the given address, if any
    pub fn block_containing(&self, addr: u32) -> Option<&Block> {
        self.blocks
            .range(..=addr)
            .next_back()
            .map(|(_, b)| b)
            .filter(|b| b.contains(addr))
    }

    /// Whether `addr` is the start of a block in this function
    pub fn has_block(&self, addr: u32) -> bool {
        self.blocks.contains_key(&addr)
    }
}

/// Discover the control-flow graph of the function starting at `entry`
pub fn analyze(memory: &MemoryManager, entry: u32) -> Function {
    let mut blocks: BTreeMap<u32, Block> = BTreeMap::new();
    let mut worklist: Vec<u32> = vec![entry];

    while let Some(addr) = worklist.pop() {
        if blocks.contains_key(&addr) {
            continue;
        }

        // A target landing strictly inside an already discovered block
        // splits it; the split preserves successor edges, so there is
        // nothing further to explore from here.
        let enclosing = blocks
            .range(..=addr)
            .next_back()
            .filter(|(_, b)| b.contains(addr))
            .map(|(start, _)| *start);
        if let Some(start) = enclosing {
            let tail = blocks
                .get_mut(&start)
                .map(|b| b.split(addr))
                .filter(|b| b.size > 0);
            if let Some(tail) = tail {
                blocks.insert(tail.address, tail);
            }
            continue;
        }

        // Decode forward until a control-transfer instruction
        let mut block = Block {
            address: addr,
            ..Block::default()
        };
        let mut count = 0;
        loop {
            let pc = addr + block.size;

            // Running into an existing block: fall through into it
            if block.size > 0 && blocks.contains_key(&pc) {
                block.branch_a = pc;
                break;
            }

            let Ok(word) = memory.read_be32(pc) else {
                tracing::warn!(target: "cpu", "analysis left mapped memory at 0x{pc:08x}");
                break;
            };
            let insn = Instruction(word);
            if !insn.is_valid() {
                tracing::warn!(target: "cpu", "invalid instruction 0x{word:08x} at 0x{pc:08x}");
            }

            block.size += 4;
            count += 1;
            let next = pc + 4;

            if insn.is_syscall() {
                // Trap: control returns to the dispatcher, then resumes
                // at the next instruction
                block.branch_a = next;
                worklist.push(next);
                break;
            }
            if insn.is_branch() {
                if insn.is_call() {
                    // Calls return here; the callee is a separate function
                    block.branch_a = next;
                    worklist.push(next);
                } else if insn.is_branch_conditional() {
                    block.branch_b = next;
                    worklist.push(next);
                    // Only bc has a static taken-target; conditional
                    // bclr/bcctr depend on a register value
                    if insn.opcode() == 16 {
                        block.branch_a = insn.get_target(pc);
                        worklist.push(block.branch_a);
                    }
                } else if insn.is_jump_known() {
                    block.branch_a = insn.get_target(pc);
                    worklist.push(block.branch_a);
                }
                // Returns and unknown-target jumps have no successors
                break;
            }

            if count >= MAX_BLOCK_INSTRUCTIONS {
                tracing::warn!(target: "cpu", "block at 0x{addr:08x} exceeds instruction limit");
                break;
            }
        }

        if block.size > 0 {
            blocks.insert(addr, block);
        }
    }

    Function { entry, blocks }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ic_memory::constants::MAIN_MEM_BASE;

    const NOP: u32 = 0x60000000; // ori r0, r0, 0
    const BLR: u32 = 0x4E800020;

    fn write_code(mem: &MemoryManager, base: u32, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            mem.write_be32(base + i as u32 * 4, *word).unwrap();
        }
    }

    fn b(offset: i32) -> u32 {
        0x48000000 | ((offset as u32) & 0x03FFFFFC)
    }

    fn bne(offset: i32) -> u32 {
        0x40820000 | ((offset as u32) & 0xFFFC)
    }

    #[test]
    fn test_single_block() {
        let mem = MemoryManager::new().unwrap();
        let entry = MAIN_MEM_BASE;
        write_code(&mem, entry, &[NOP, NOP, NOP, BLR]);

        let func = analyze(&mem, entry);
        assert_eq!(func.blocks.len(), 1);
        let block = &func.blocks[&entry];
        assert_eq!(block.size, 16);
        assert_eq!(block.branch_a, 0);
        assert_eq!(block.branch_b, 0);
    }

    #[test]
    fn test_conditional_branch_edges() {
        let mem = MemoryManager::new().unwrap();
        let entry = MAIN_MEM_BASE;
        // 0x00: nop
        // 0x04: bne +8  -> 0x0C
        // 0x08: blr
        // 0x0C: blr
        write_code(&mem, entry, &[NOP, bne(8), BLR, BLR]);

        let func = analyze(&mem, entry);
        assert_eq!(func.blocks.len(), 3);

        let head = &func.blocks[&entry];
        assert_eq!(head.size, 8);
        assert_eq!(head.branch_a, entry + 0x0C);
        assert_eq!(head.branch_b, entry + 0x08);
        assert!(func.has_block(entry + 0x08));
        assert!(func.has_block(entry + 0x0C));
    }

    #[test]
    fn test_blocks_never_overlap() {
        let mem = MemoryManager::new().unwrap();
        let entry = MAIN_MEM_BASE;
        // A loop whose backward branch lands in the middle of the
        // entry block, forcing a split.
        // 0x00: nop
        // 0x04: nop
        // 0x08: bne -4 -> 0x04
        // 0x0C: blr
        write_code(&mem, entry, &[NOP, NOP, bne(-4), BLR]);

        let func = analyze(&mem, entry);
        let blocks: Vec<&Block> = func.blocks.values().collect();
        for (i, a) in blocks.iter().enumerate() {
            for b in blocks.iter().skip(i + 1) {
                let disjoint =
                    a.address + a.size <= b.address || b.address + b.size <= a.address;
                assert!(disjoint, "blocks overlap: {a:?} vs {b:?}");
            }
        }
        // Every address maps to at most one block
        for addr in (entry..entry + 16).step_by(4) {
            let owners = blocks.iter().filter(|b| b.contains(addr)).count();
            assert!(owners <= 1);
        }
    }

    #[test]
    fn test_split_preserves_coverage_and_edges() {
        let mut block = Block {
            address: 0x100,
            size: 0x20,
            branch_a: 0x200,
            branch_b: 0x300,
        };
        let tail = block.split(0x110);

        // Total coverage preserved
        assert_eq!(block.address, 0x100);
        assert_eq!(block.size, 0x10);
        assert_eq!(tail.address, 0x110);
        assert_eq!(tail.size, 0x10);

        // Tail inherits the edges; head falls through into the tail
        assert_eq!(tail.branch_a, 0x200);
        assert_eq!(tail.branch_b, 0x300);
        assert_eq!(block.branch_a, 0x110);
        assert_eq!(block.branch_b, 0);
    }

    #[test]
    fn test_backward_branch_splits_entry_block() {
        let mem = MemoryManager::new().unwrap();
        let entry = MAIN_MEM_BASE;
        write_code(&mem, entry, &[NOP, NOP, bne(-4), BLR]);

        let func = analyze(&mem, entry);
        // Entry block truncated at the branch target
        let head = &func.blocks[&entry];
        assert_eq!(head.size, 4);
        assert_eq!(head.branch_a, entry + 4);

        // Tail block carries the loop edges
        let tail = &func.blocks[&(entry + 4)];
        assert_eq!(tail.branch_a, entry + 4);
        assert_eq!(tail.branch_b, entry + 0x0C);
    }

    #[test]
    fn test_call_fallthrough_explored() {
        let mem = MemoryManager::new().unwrap();
        let entry = MAIN_MEM_BASE;
        // 0x00: bl +0x100
        // 0x04: blr
        write_code(&mem, entry, &[b(0x100) | 1, BLR]);

        let func = analyze(&mem, entry);
        let head = &func.blocks[&entry];
        assert_eq!(head.branch_a, entry + 4);
        assert!(func.has_block(entry + 4));
        // The callee is not part of this function
        assert!(!func.has_block(entry + 0x100));
    }

    #[test]
    fn test_conditional_return_has_only_fallthrough() {
        let mem = MemoryManager::new().unwrap();
        let entry = MAIN_MEM_BASE;
        const BNELR: u32 = 0x4C820020;
        // 0x00: nop
        // 0x04: bnelr
        // 0x08: blr
        write_code(&mem, entry, &[NOP, BNELR, BLR]);

        let func = analyze(&mem, entry);
        // The taken side goes through the link register, so only the
        // fall-through edge is discovered
        let head = &func.blocks[&entry];
        assert_eq!(head.branch_a, 0);
        assert_eq!(head.branch_b, entry + 8);
        assert!(func.has_block(entry + 8));
        assert!(!func.has_block(0));
    }

    #[test]
    fn test_block_containing() {
        let mem = MemoryManager::new().unwrap();
        let entry = MAIN_MEM_BASE;
        write_code(&mem, entry, &[NOP, NOP, NOP, BLR]);

        let func = analyze(&mem, entry);
        assert!(func.block_containing(entry + 8).is_some());
        assert!(func.block_containing(entry + 16).is_none());
        assert!(func.block_containing(entry.wrapping_sub(4)).is_none());
    }
}
