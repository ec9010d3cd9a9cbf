//! Architecture-neutral intermediate representation
//!
//! The frontend lifts decoded guest blocks into this IR and the backend
//! lowers it to host code. Values are SSA-style ids produced by at most
//! one instruction; integer values are modeled at 64 bits, with explicit
//! widths only at memory accesses and extensions.

/// Value types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    I8,
    I16,
    I32,
    I64,
    F64,
    V128,
}

impl Type {
    /// Size of a value of this type in guest memory
    pub fn bytes(self) -> u32 {
        match self {
            Type::I8 => 1,
            Type::I16 => 2,
            Type::I32 => 4,
            Type::I64 | Type::F64 => 8,
            Type::V128 => 16,
        }
    }
}

/// SSA value id, unique within a function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

/// Guest register addressed by the IR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    /// General-purpose register
    Gpr(u8),
    /// Link register
    Lr,
    /// Count register
    Ctr,
    /// Condition register (whole 32-bit word)
    Cr,
    /// Fixed-point exception register
    Xer,
}

/// Comparison condition codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpCond {
    Eq,
    Ne,
    /// Signed less-than
    Slt,
    /// Unsigned less-than
    Ult,
    /// Signed greater-than
    Sgt,
    /// Unsigned greater-than
    Ugt,
}

/// IR instruction
///
/// Register and memory accesses are side-effecting; everything else is
/// a pure computation on values.
#[derive(Debug, Clone, Copy)]
pub enum Inst {
    /// Materialize a 64-bit constant
    Const { dst: ValueId, value: u64 },
    /// Read a guest register
    ReadReg { dst: ValueId, reg: Reg },
    /// Write a guest register
    WriteReg { reg: Reg, src: ValueId },
    Add { dst: ValueId, a: ValueId, b: ValueId },
    Sub { dst: ValueId, a: ValueId, b: ValueId },
    Mul { dst: ValueId, a: ValueId, b: ValueId },
    And { dst: ValueId, a: ValueId, b: ValueId },
    Or { dst: ValueId, a: ValueId, b: ValueId },
    Xor { dst: ValueId, a: ValueId, b: ValueId },
    /// Logical shift left
    Shl { dst: ValueId, a: ValueId, b: ValueId },
    /// Logical shift right
    Shr { dst: ValueId, a: ValueId, b: ValueId },
    /// Arithmetic shift right
    Sar { dst: ValueId, a: ValueId, b: ValueId },
    /// Compare, producing 0 or 1
    Icmp { dst: ValueId, cond: CmpCond, a: ValueId, b: ValueId },
    /// Sign-extend the low `from` bits of `src` to 64 bits
    Sext { dst: ValueId, from: Type, src: ValueId },
    /// Big-endian guest load, zero-extended to 64 bits
    Load { dst: ValueId, ty: Type, addr: ValueId },
    /// Big-endian guest store of the low `ty` bits of `src`
    Store { ty: Type, addr: ValueId, src: ValueId },
}

/// How control leaves a block
#[derive(Debug, Clone, Copy)]
pub enum Terminator {
    /// Unconditional transfer to another address
    Jump { target: u32 },
    /// Two-way conditional transfer; `cond` is a 0/1 value
    Branch { cond: ValueId, taken: u32, fallthrough: u32 },
    /// Leave the function entirely
    Exit { target: ExitTarget },
    /// System-call trap; execution resumes at `next` after dispatch
    Syscall { next: u32 },
}

/// Destination of a function exit
#[derive(Debug, Clone, Copy)]
pub enum ExitTarget {
    /// Statically known address (calls into other functions)
    Addr(u32),
    /// Run-time address held in a value (returns, indirect jumps)
    Value(ValueId),
}

/// One IR block, mirroring a frontend block
#[derive(Debug, Clone)]
pub struct HirBlock {
    /// Guest address this block was lifted from
    pub address: u32,
    pub insts: Vec<Inst>,
    pub terminator: Terminator,
}

/// Unit of compilation
#[derive(Debug, Clone)]
pub struct HirFunction {
    pub entry: u32,
    pub blocks: Vec<HirBlock>,
}

impl HirFunction {
    /// Whether `addr` names a block inside this function
    pub fn is_internal(&self, addr: u32) -> bool {
        self.blocks.iter().any(|b| b.address == addr)
    }
}

/// Emits instructions for one block, numbering values function-wide
pub struct BlockBuilder<'a> {
    next_value: &'a mut u32,
    insts: Vec<Inst>,
}

impl<'a> BlockBuilder<'a> {
    pub fn new(next_value: &'a mut u32) -> Self {
        Self {
            next_value,
            insts: Vec::new(),
        }
    }

    fn fresh(&mut self) -> ValueId {
        let id = ValueId(*self.next_value);
        *self.next_value += 1;
        id
    }

    pub fn push(&mut self, inst: Inst) {
        self.insts.push(inst);
    }

    pub fn constant(&mut self, value: u64) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Const { dst, value });
        dst
    }

    pub fn read_reg(&mut self, reg: Reg) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::ReadReg { dst, reg });
        dst
    }

    pub fn write_reg(&mut self, reg: Reg, src: ValueId) {
        self.push(Inst::WriteReg { reg, src });
    }

    pub fn add(&mut self, a: ValueId, b: ValueId) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Add { dst, a, b });
        dst
    }

    pub fn sub(&mut self, a: ValueId, b: ValueId) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Sub { dst, a, b });
        dst
    }

    pub fn mul(&mut self, a: ValueId, b: ValueId) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Mul { dst, a, b });
        dst
    }

    pub fn and(&mut self, a: ValueId, b: ValueId) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::And { dst, a, b });
        dst
    }

    pub fn or(&mut self, a: ValueId, b: ValueId) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Or { dst, a, b });
        dst
    }

    pub fn xor(&mut self, a: ValueId, b: ValueId) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Xor { dst, a, b });
        dst
    }

    pub fn shl(&mut self, a: ValueId, b: ValueId) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Shl { dst, a, b });
        dst
    }

    pub fn shr(&mut self, a: ValueId, b: ValueId) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Shr { dst, a, b });
        dst
    }

    pub fn sar(&mut self, a: ValueId, b: ValueId) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Sar { dst, a, b });
        dst
    }

    pub fn icmp(&mut self, cond: CmpCond, a: ValueId, b: ValueId) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Icmp { dst, cond, a, b });
        dst
    }

    pub fn sext(&mut self, from: Type, src: ValueId) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Sext { dst, from, src });
        dst
    }

    pub fn load(&mut self, ty: Type, addr: ValueId) -> ValueId {
        let dst = self.fresh();
        self.push(Inst::Load { dst, ty, addr });
        dst
    }

    pub fn store(&mut self, ty: Type, addr: ValueId, src: ValueId) {
        self.push(Inst::Store { ty, addr, src });
    }

    pub fn finish(self, address: u32, terminator: Terminator) -> HirBlock {
        HirBlock {
            address,
            insts: self.insts,
            terminator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_numbers_values_across_blocks() {
        let mut counter = 0;
        let mut b1 = BlockBuilder::new(&mut counter);
        let a = b1.constant(1);
        let c = b1.constant(2);
        let sum = b1.add(a, c);
        let block1 = b1.finish(0x100, Terminator::Jump { target: 0x200 });

        let mut b2 = BlockBuilder::new(&mut counter);
        let d = b2.constant(3);
        let block2 = b2.finish(0x200, Terminator::Exit { target: ExitTarget::Value(d) });

        assert_eq!(sum, ValueId(2));
        assert_eq!(d, ValueId(3));
        assert_eq!(block1.insts.len(), 3);
        assert_eq!(block2.insts.len(), 1);
    }

    #[test]
    fn test_is_internal() {
        let func = HirFunction {
            entry: 0x100,
            blocks: vec![HirBlock {
                address: 0x100,
                insts: vec![],
                terminator: Terminator::Exit { target: ExitTarget::Addr(0x200) },
            }],
        };
        assert!(func.is_internal(0x100));
        assert!(!func.is_internal(0x200));
    }
}
