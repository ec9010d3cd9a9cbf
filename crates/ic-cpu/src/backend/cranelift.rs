//! Cranelift lowering
//!
//! Lowers IR functions to native code through `cranelift-jit`. Guest
//! registers live in the `PpuState` block and are addressed by byte
//! offset from the state pointer; guest memory accesses go through the
//! flat reservation as `mem_base + (addr & 0xFFFF_FFFF)` with explicit
//! byte swaps for the big-endian guest.

use std::collections::HashMap;
use std::mem::offset_of;

use cranelift_codegen::entity::EntityRef;
use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{types, AbiParam, Block, InstBuilder, MemFlags, Value};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext, Variable};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{default_libcall_names, Linkage, Module};

use crate::hir::{CmpCond, ExitTarget, HirFunction, Inst, Reg, Terminator, Type, ValueId};
use crate::ppu::state::PpuState;

use super::{Backend, CompileError, CompiledFunction, EntryFn, EXIT_BRANCH, EXIT_SYSCALL};

/// Function-wide SSA variables holding the two entry arguments
#[derive(Clone, Copy)]
struct Env {
    state: Variable,
    mem: Variable,
}

/// JIT backend holding the module all compiled code lives in
pub struct CraneliftBackend {
    module: JITModule,
}

impl CraneliftBackend {
    pub fn new() -> Result<Self, CompileError> {
        let mut flags = settings::builder();
        flags
            .set("opt_level", "speed")
            .map_err(|e| CompileError::Host(e.to_string()))?;
        let isa = cranelift_native::builder()
            .map_err(|e| CompileError::Host(e.to_string()))?
            .finish(settings::Flags::new(flags))
            .map_err(|e| CompileError::Host(e.to_string()))?;

        let builder = JITBuilder::with_isa(isa, default_libcall_names());
        Ok(Self {
            module: JITModule::new(builder),
        })
    }
}

impl Backend for CraneliftBackend {
    fn compile(&mut self, func: &HirFunction) -> Result<CompiledFunction, CompileError> {
        let mut ctx = self.module.make_context();
        ctx.func.signature.params.push(AbiParam::new(types::I64));
        ctx.func.signature.params.push(AbiParam::new(types::I64));
        ctx.func.signature.returns.push(AbiParam::new(types::I64));

        let mut fbc = FunctionBuilderContext::new();
        {
            let mut b = FunctionBuilder::new(&mut ctx.func, &mut fbc);
            lower_function(&mut b, func);
            b.seal_all_blocks();
            b.finalize();
        }

        let name = format!("guest_{:08x}", func.entry);
        let id = self
            .module
            .declare_function(&name, Linkage::Export, &ctx.func.signature)
            .map_err(|e| CompileError::Codegen(e.to_string()))?;
        self.module
            .define_function(id, &mut ctx)
            .map_err(|e| CompileError::Codegen(e.to_string()))?;
        self.module.clear_context(&mut ctx);
        self.module
            .finalize_definitions()
            .map_err(|e| CompileError::Codegen(e.to_string()))?;

        let ptr = self.module.get_finalized_function(id);
        // SAFETY: the function was defined with exactly the EntryFn
        // signature above.
        let entry = unsafe { std::mem::transmute::<*const u8, EntryFn>(ptr) };
        tracing::debug!(target: "cpu", "compiled guest function 0x{:08x} ({} blocks)", func.entry, func.blocks.len());

        Ok(CompiledFunction {
            entry: func.entry,
            func: entry,
        })
    }
}

fn lower_function(b: &mut FunctionBuilder, func: &HirFunction) {
    let env = Env {
        state: Variable::new(0),
        mem: Variable::new(1),
    };
    b.declare_var(env.state, types::I64);
    b.declare_var(env.mem, types::I64);

    let prologue = b.create_block();
    b.append_block_params_for_function_params(prologue);
    b.switch_to_block(prologue);
    let state = b.block_params(prologue)[0];
    let mem = b.block_params(prologue)[1];
    b.def_var(env.state, state);
    b.def_var(env.mem, mem);

    // One host block per guest block, plus lazily created exit stubs
    // for branch targets outside the function.
    let mut host_blocks: HashMap<u32, Block> = HashMap::new();
    for hir_block in &func.blocks {
        host_blocks.insert(hir_block.address, b.create_block());
    }
    let mut exit_stubs: HashMap<u32, Block> = HashMap::new();

    let entry_block = host_blocks[&func.entry];
    b.ins().jump(entry_block, &[]);

    for hir_block in &func.blocks {
        b.switch_to_block(host_blocks[&hir_block.address]);
        let mut values: HashMap<ValueId, Value> = HashMap::new();

        for inst in &hir_block.insts {
            lower_inst(b, env, inst, &mut values);
        }

        let mut dest = |b: &mut FunctionBuilder, addr: u32| -> Block {
            if let Some(&block) = host_blocks.get(&addr) {
                block
            } else {
                *exit_stubs.entry(addr).or_insert_with(|| b.create_block())
            }
        };

        match hir_block.terminator {
            Terminator::Jump { target } => {
                let block = dest(b, target);
                b.ins().jump(block, &[]);
            }
            Terminator::Branch {
                cond,
                taken,
                fallthrough,
            } => {
                let taken_block = dest(b, taken);
                let fall_block = dest(b, fallthrough);
                let cond = values[&cond];
                b.ins().brif(cond, taken_block, &[], fall_block, &[]);
            }
            Terminator::Exit { target } => {
                let target = match target {
                    ExitTarget::Addr(addr) => b.ins().iconst(types::I64, addr as i64),
                    ExitTarget::Value(v) => values[&v],
                };
                emit_return(b, env, target, EXIT_BRANCH);
            }
            Terminator::Syscall { next } => {
                let target = b.ins().iconst(types::I64, next as i64);
                emit_return(b, env, target, EXIT_SYSCALL);
            }
        }
    }

    for (addr, block) in exit_stubs {
        b.switch_to_block(block);
        let target = b.ins().iconst(types::I64, addr as i64);
        emit_return(b, env, target, EXIT_BRANCH);
    }
}

/// Store the resume address into `cia` and leave the compiled function
fn emit_return(b: &mut FunctionBuilder, env: Env, target: Value, code: i64) {
    let state = b.use_var(env.state);
    b.ins().store(
        MemFlags::trusted(),
        target,
        state,
        offset_of!(PpuState, cia) as i32,
    );
    let code = b.ins().iconst(types::I64, code);
    b.ins().return_(&[code]);
}

fn reg_offset(reg: Reg) -> i32 {
    (match reg {
        Reg::Gpr(i) => offset_of!(PpuState, gpr) + 8 * i as usize,
        Reg::Lr => offset_of!(PpuState, lr),
        Reg::Ctr => offset_of!(PpuState, ctr),
        Reg::Xer => offset_of!(PpuState, xer),
        Reg::Cr => offset_of!(PpuState, cr),
    }) as i32
}

fn cl_type(ty: Type) -> types::Type {
    match ty {
        Type::I8 => types::I8,
        Type::I16 => types::I16,
        Type::I32 => types::I32,
        Type::I64 => types::I64,
        Type::F64 => types::F64,
        Type::V128 => types::I64X2,
    }
}

fn cl_cond(cond: CmpCond) -> IntCC {
    match cond {
        CmpCond::Eq => IntCC::Equal,
        CmpCond::Ne => IntCC::NotEqual,
        CmpCond::Slt => IntCC::SignedLessThan,
        CmpCond::Ult => IntCC::UnsignedLessThan,
        CmpCond::Sgt => IntCC::SignedGreaterThan,
        CmpCond::Ugt => IntCC::UnsignedGreaterThan,
    }
}

fn lower_inst(b: &mut FunctionBuilder, env: Env, inst: &Inst, values: &mut HashMap<ValueId, Value>) {
    match *inst {
        Inst::Const { dst, value } => {
            let v = b.ins().iconst(types::I64, value as i64);
            values.insert(dst, v);
        }
        Inst::ReadReg { dst, reg } => {
            let state = b.use_var(env.state);
            let v = match reg {
                Reg::Cr => {
                    let raw =
                        b.ins()
                            .load(types::I32, MemFlags::trusted(), state, reg_offset(reg));
                    b.ins().uextend(types::I64, raw)
                }
                _ => b
                    .ins()
                    .load(types::I64, MemFlags::trusted(), state, reg_offset(reg)),
            };
            values.insert(dst, v);
        }
        Inst::WriteReg { reg, src } => {
            let state = b.use_var(env.state);
            let src = values[&src];
            match reg {
                Reg::Cr => {
                    let narrow = b.ins().ireduce(types::I32, src);
                    b.ins()
                        .store(MemFlags::trusted(), narrow, state, reg_offset(reg));
                }
                _ => {
                    b.ins()
                        .store(MemFlags::trusted(), src, state, reg_offset(reg));
                }
            }
        }
        Inst::Add { dst, a, b: rhs } => {
            let v = b.ins().iadd(values[&a], values[&rhs]);
            values.insert(dst, v);
        }
        Inst::Sub { dst, a, b: rhs } => {
            let v = b.ins().isub(values[&a], values[&rhs]);
            values.insert(dst, v);
        }
        Inst::Mul { dst, a, b: rhs } => {
            let v = b.ins().imul(values[&a], values[&rhs]);
            values.insert(dst, v);
        }
        Inst::And { dst, a, b: rhs } => {
            let v = b.ins().band(values[&a], values[&rhs]);
            values.insert(dst, v);
        }
        Inst::Or { dst, a, b: rhs } => {
            let v = b.ins().bor(values[&a], values[&rhs]);
            values.insert(dst, v);
        }
        Inst::Xor { dst, a, b: rhs } => {
            let v = b.ins().bxor(values[&a], values[&rhs]);
            values.insert(dst, v);
        }
        Inst::Shl { dst, a, b: rhs } => {
            let v = b.ins().ishl(values[&a], values[&rhs]);
            values.insert(dst, v);
        }
        Inst::Shr { dst, a, b: rhs } => {
            let v = b.ins().ushr(values[&a], values[&rhs]);
            values.insert(dst, v);
        }
        Inst::Sar { dst, a, b: rhs } => {
            let v = b.ins().sshr(values[&a], values[&rhs]);
            values.insert(dst, v);
        }
        Inst::Icmp { dst, cond, a, b: rhs } => {
            let flag = b.ins().icmp(cl_cond(cond), values[&a], values[&rhs]);
            let v = b.ins().uextend(types::I64, flag);
            values.insert(dst, v);
        }
        Inst::Sext { dst, from, src } => {
            let narrow = b.ins().ireduce(cl_type(from), values[&src]);
            let v = b.ins().sextend(types::I64, narrow);
            values.insert(dst, v);
        }
        Inst::Load { dst, ty, addr } => {
            let host = host_addr(b, env, values[&addr]);
            let cl_ty = cl_type(ty);
            let raw = b.ins().load(cl_ty, MemFlags::new(), host, 0);
            let native = if cl_ty == types::I8 {
                raw
            } else {
                b.ins().bswap(raw)
            };
            let v = if cl_ty == types::I64 {
                native
            } else {
                b.ins().uextend(types::I64, native)
            };
            values.insert(dst, v);
        }
        Inst::Store { ty, addr, src } => {
            let host = host_addr(b, env, values[&addr]);
            let cl_ty = cl_type(ty);
            let src = values[&src];
            let narrow = if cl_ty == types::I64 {
                src
            } else {
                b.ins().ireduce(cl_ty, src)
            };
            let wire = if cl_ty == types::I8 {
                narrow
            } else {
                b.ins().bswap(narrow)
            };
            b.ins().store(MemFlags::new(), wire, host, 0);
        }
    }
}

/// Host address for a guest address value
fn host_addr(b: &mut FunctionBuilder, env: Env, guest: Value) -> Value {
    let masked = b.ins().band_imm(guest, 0xFFFF_FFFF);
    let base = b.use_var(env.mem);
    b.ins().iadd(base, masked)
}
