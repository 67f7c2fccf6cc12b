use primitive_types::U256;

use crate::instruction::Instruction;

/// Evaluates `instruction` on literal operands; `args[0]` is the top of the stack.
pub(crate) fn fold(instruction: Instruction, args: &[U256]) -> Option<U256> {
    let bool_word = |b: bool| if b { U256::one() } else { U256::zero() };
    match (instruction, args) {
        (Instruction::NOT, [a]) => Some(!*a),
        (Instruction::ISZERO, [a]) => Some(bool_word(a.is_zero())),
        (Instruction::ADD, [a, b]) => Some(a.overflowing_add(*b).0),
        (Instruction::MUL, [a, b]) => Some(a.overflowing_mul(*b).0),
        (Instruction::SUB, [a, b]) => Some(a.overflowing_sub(*b).0),
        (Instruction::DIV, [a, b]) => Some(if b.is_zero() { U256::zero() } else { *a / *b }),
        (Instruction::MOD, [a, b]) => Some(if b.is_zero() { U256::zero() } else { *a % *b }),
        (Instruction::AND, [a, b]) => Some(*a & *b),
        (Instruction::OR, [a, b]) => Some(*a | *b),
        (Instruction::XOR, [a, b]) => Some(*a ^ *b),
        (Instruction::EQ, [a, b]) => Some(bool_word(a == b)),
        (Instruction::LT, [a, b]) => Some(bool_word(a < b)),
        (Instruction::GT, [a, b]) => Some(bool_word(a > b)),
        (Instruction::SHL, [shift, value]) => Some(shift_amount(*shift).map_or(U256::zero(), |s| *value << s)),
        (Instruction::SHR, [shift, value]) => Some(shift_amount(*shift).map_or(U256::zero(), |s| *value >> s)),
        _ => None,
    }
}

fn shift_amount(shift: U256) -> Option<usize> {
    (shift < U256::from(256u64)).then(|| shift.low_u64() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_wraps() {
        assert_eq!(fold(Instruction::ADD, &[U256::MAX, U256::one()]), Some(U256::zero()));
        assert_eq!(fold(Instruction::SUB, &[U256::zero(), U256::one()]), Some(U256::MAX));
        assert_eq!(fold(Instruction::DIV, &[U256::one(), U256::zero()]), Some(U256::zero()));
    }

    #[test]
    fn operands_follow_stack_order() {
        let (top, second) = (U256::from(2u64), U256::from(5u64));
        assert_eq!(fold(Instruction::SUB, &[top, second]), Some(U256::MAX - U256::from(2u64)));
        assert_eq!(fold(Instruction::LT, &[top, second]), Some(U256::one()));
        assert_eq!(fold(Instruction::SHL, &[U256::from(8u64), U256::one()]), Some(U256::from(256u64)));
        assert_eq!(fold(Instruction::SHL, &[U256::from(300u64), U256::one()]), Some(U256::zero()));
        assert_eq!(fold(Instruction::SLOAD, &[top]), None);
    }
}
