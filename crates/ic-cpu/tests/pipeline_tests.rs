//! End-to-end pipeline tests: guest code through decode, analysis,
//! lifting, compilation and the engine loop, with a stub kernel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ic_core::config::CpuConfig;
use ic_cpu::{Cell, ExecContext, SyscallDisposition, SyscallHandler, ThreadKind, ThreadParams};
use ic_memory::constants::MAIN_MEM_BASE;
use ic_memory::MemoryManager;

/// Minimal kernel stand-in: syscall 1 doubles r3, syscall 3 exits the
/// process with r3 as the status.
struct StubKernel {
    calls: AtomicU64,
}

impl StubKernel {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU64::new(0),
        })
    }
}

impl SyscallHandler for StubKernel {
    fn dispatch(&self, ctx: &mut ExecContext<'_>) -> SyscallDisposition {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match ctx.state.gpr(11) {
            1 => {
                let doubled = ctx.state.gpr(3) * 2;
                ctx.state.set_gpr(3, doubled);
                SyscallDisposition::Continue
            }
            3 => SyscallDisposition::ExitProcess {
                status: ctx.state.gpr(3) as i32,
            },
            other => {
                panic!("unexpected syscall {other}");
            }
        }
    }
}

fn build_cell(program: &[(u32, &[u32])]) -> (Arc<Cell>, Arc<StubKernel>) {
    let memory = MemoryManager::new().unwrap();
    for (base, words) in program {
        for (i, word) in words.iter().enumerate() {
            memory.write_be32(base + i as u32 * 4, *word).unwrap();
        }
    }
    let cell = Cell::new(memory, &CpuConfig::default());
    let kernel = StubKernel::new();
    cell.set_syscall_handler(kernel.clone());
    (cell, kernel)
}

#[test]
fn test_call_and_return_across_functions() {
    // main:              helper (at +0x100):
    //   li   r3, 20        addi r3, r3, 1
    //   bl   helper        blr
    //   li   r11, 3
    //   sc
    let main = [0x38600014, 0x480000FD, 0x39600003, 0x44000002];
    let helper = [0x38630001, 0x4E800020];
    let (cell, _) = build_cell(&[
        (MAIN_MEM_BASE, &main),
        (MAIN_MEM_BASE + 0x100, &helper),
    ]);

    let status = cell
        .run_main(&ThreadParams {
            entry: MAIN_MEM_BASE,
            ..ThreadParams::default()
        })
        .unwrap();
    assert_eq!(status, 21);
}

#[test]
fn test_syscall_result_feeds_guest_code() {
    // li r3, 8 ; li r11, 1 ; sc ; addi r3, r3, 1 ; li r11, 3 ; sc
    let program = [
        0x38600008, 0x39600001, 0x44000002, 0x38630001, 0x39600003, 0x44000002,
    ];
    let (cell, kernel) = build_cell(&[(MAIN_MEM_BASE, &program)]);

    let status = cell
        .run_main(&ThreadParams {
            entry: MAIN_MEM_BASE,
            ..ThreadParams::default()
        })
        .unwrap();
    // 8 doubled by the kernel, then incremented by guest code
    assert_eq!(status, 17);
    assert_eq!(kernel.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_guest_stack_usage() {
    // Spill a value through the stack frame:
    //   stw r3, -4(r1) ; li r3, 0 ; lwz r3, -4(r1) ; li r11, 3 ; sc
    let program = [
        0x9061FFFC, 0x38600000, 0x8061FFFC, 0x39600003, 0x44000002,
    ];
    let (cell, _) = build_cell(&[(MAIN_MEM_BASE, &program)]);

    let thread = cell
        .add_thread(
            ThreadKind::Ppu,
            &ThreadParams {
                entry: MAIN_MEM_BASE,
                arg: 99,
                ..ThreadParams::default()
            },
        )
        .unwrap();
    cell.start_thread(thread.id).unwrap();
    let exit = thread.join().unwrap();
    assert_eq!(exit, ic_cpu::ThreadExit::ProcessExit { status: 99 });
}

#[test]
fn test_thread_id_reuse_after_removal() {
    let memory = MemoryManager::new().unwrap();
    let cell = Cell::new(memory, &CpuConfig::default());
    let params = ThreadParams {
        entry: MAIN_MEM_BASE,
        ..ThreadParams::default()
    };

    let a = cell.add_thread(ThreadKind::Ppu, &params).unwrap();
    let b = cell.add_thread(ThreadKind::Ppu, &params).unwrap();
    let c = cell.add_thread(ThreadKind::Ppu, &params).unwrap();
    assert_eq!((a.id, b.id, c.id), (1, 2, 3));

    cell.remove_thread(b.id).unwrap();
    let d = cell.add_thread(ThreadKind::Ppu, &params).unwrap();
    assert_eq!(d.id, 2);
}
