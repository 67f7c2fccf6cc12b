//! Instruction set tables and opcode classification.

mod opcode;
mod semantics;
mod version;

pub use opcode::{Instruction, InstructionInfo, Tier};
pub use version::EvmVersion;
