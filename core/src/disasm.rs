//! Linear decoding of bytecode back into instructions.

use std::fmt;

use primitive_types::U256;

use crate::instruction::Instruction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisassembledInstruction {
    pub offset: usize,
    pub instruction: Instruction,
    /// Push immediate, zero-padded on the right when the code ends early.
    pub immediate: Option<U256>,
    pub truncated: bool,
}

impl fmt::Display for DisassembledInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}: {}", self.offset, self.instruction)?;
        if let Some(value) = self.immediate {
            write!(f, " 0x{value:x}")?;
        }
        if self.truncated {
            f.write_str(" (truncated)")?;
        }
        Ok(())
    }
}

pub fn disassemble(bytes: &[u8]) -> Vec<DisassembledInstruction> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let instruction = Instruction::from_byte(bytes[offset]);
        let size = instruction.push_size();
        let (immediate, truncated) = if instruction.is_push() {
            let start = offset + 1;
            let end = (start + size).min(bytes.len());
            let mut word = vec![0u8; size];
            word[..end - start].copy_from_slice(&bytes[start..end]);
            (Some(U256::from_big_endian(&word)), end - start < size)
        } else {
            (None, false)
        };
        out.push(DisassembledInstruction {
            offset,
            instruction,
            immediate,
            truncated,
        });
        offset += 1 + size;
    }
    out
}

/// One instruction per line.
pub fn disassemble_to_string(bytes: &[u8]) -> String {
    let mut text = String::new();
    for instruction in disassemble(bytes) {
        text.push_str(&instruction.to_string());
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_pushes_and_offsets() {
        let code = disassemble(&[0x60, 0x03, 0x61, 0x01, 0x00, 0x5b, 0x00]);
        let offsets: Vec<usize> = code.iter().map(|i| i.offset).collect();
        assert_eq!(offsets, vec![0, 2, 5, 6]);
        assert_eq!(code[0].immediate, Some(U256::from(3u64)));
        assert_eq!(code[1].immediate, Some(U256::from(0x100u64)));
        assert_eq!(code[2].instruction, Instruction::JUMPDEST);
        assert!(code.iter().all(|i| !i.truncated));
    }

    #[test]
    fn truncated_push_is_padded_and_flagged() {
        let code = disassemble(&[0x61, 0xab]);
        assert_eq!(code.len(), 1);
        assert_eq!(code[0].immediate, Some(U256::from(0xab00u64)));
        assert!(code[0].truncated);
    }

    #[test]
    fn text_lists_one_instruction_per_line() {
        let text = disassemble_to_string(&[0x60, 0x2a, 0x00, 0x0c]);
        assert_eq!(text, "0000: PUSH1 0x2a\n0002: STOP\n0003: INVALID_0x0c\n");
    }
}
