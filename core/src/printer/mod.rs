//! Read-only views of a finished assembly tree.

pub mod json;
pub mod text;

pub use json::{SourceIndices, assembly_json};
pub use text::{AssemblyText, SourceCodes};
