pub mod error;
pub mod instruction;
pub mod item;
pub mod location;
pub mod util;

// Tree node plus its builder surface
pub mod assembly;
mod assembler;
pub mod linker;

pub mod optimiser;

// Views and front-end stand-ins
pub mod description;
pub mod disasm;
pub mod printer;

pub use assembly::Assembly;
pub use error::{AsmResult, AssemblyError, AssemblyViolation, OptimizerViolation};
pub use instruction::{EvmVersion, Instruction};
pub use item::{AssemblyItem, AssemblyItems, ItemKind, JumpType, TagRef};
pub use linker::LinkerObject;
pub use location::SourceLocation;
pub use optimiser::OptimiserSettings;
