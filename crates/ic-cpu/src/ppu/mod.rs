//! PPU frontend: decoding, block discovery, lifting, register state

pub mod analyzer;
pub mod instruction;
pub mod interpreter;
pub mod state;
pub mod translate;

pub use instruction::Instruction;
pub use state::PpuState;
