//! Semantic classification of opcodes used by the optimiser passes.

use super::Instruction;

impl Instruction {
    /// Ends straight-line execution (conditionally or not).
    pub fn alters_control_flow(self) -> bool {
        matches!(
            self,
            Instruction::JUMP
                | Instruction::JUMPI
                | Instruction::STOP
                | Instruction::RETURN
                | Instruction::REVERT
                | Instruction::INVALID
                | Instruction::SELFDESTRUCT
        )
    }

    /// Execution never falls through to the next item.
    pub fn terminates_block(self) -> bool {
        self.alters_control_flow() && self != Instruction::JUMPI
    }

    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Instruction::ADD | Instruction::MUL | Instruction::EQ | Instruction::AND | Instruction::OR | Instruction::XOR
        )
    }

    /// Reads state that another instruction of the same block could change.
    pub fn reads_mutable_state(self) -> bool {
        matches!(
            self,
            Instruction::SLOAD
                | Instruction::MLOAD
                | Instruction::KECCAK256
                | Instruction::BALANCE
                | Instruction::SELFBALANCE
                | Instruction::EXTCODESIZE
                | Instruction::EXTCODEHASH
                | Instruction::RETURNDATASIZE
        )
    }

    /// Result depends only on the inputs; the instruction can be removed when unused.
    pub fn is_movable(self) -> bool {
        let Some(info) = self.info() else {
            return false;
        };
        !info.side_effects
            && !self.reads_mutable_state()
            && !matches!(self, Instruction::GAS | Instruction::PC | Instruction::MSIZE)
    }
}
