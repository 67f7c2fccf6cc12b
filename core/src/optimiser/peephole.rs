//! Windowed rewrite rules run to a fixed point.
//!
//! Every rule strictly lowers the weight `2 * (non-POP items) + (POP items)`,
//! so repeated passes cannot cycle.

use primitive_types::U256;
use tracing::trace;

use super::fold::fold;
use crate::error::{AsmResult, OptimizerViolation};
use crate::instruction::Instruction;
use crate::item::{AssemblyItem, ItemKind, TagRef};

/// Rewrite produced by a rule: the number of consumed items and their replacement.
type Rewrite = (usize, Vec<AssemblyItem>);

type Rule = fn(&[AssemblyItem]) -> Option<Rewrite>;

const RULES: &[(&str, Rule)] = &[
    ("push_pop", push_pop),
    ("op_pop", op_pop),
    ("double_swap", double_swap),
    ("commutative_swap", commutative_swap),
    ("swap_comparison", swap_comparison),
    ("constant_fold", constant_fold),
    ("iszero_iszero_jumpi", iszero_iszero_jumpi),
    ("jump_to_next", jump_to_next),
    ("unreachable_code", unreachable_code),
];

pub fn weight(items: &[AssemblyItem]) -> usize {
    items
        .iter()
        .map(|item| if item.is_operation(Instruction::POP) { 1 } else { 2 })
        .sum()
}

/// One left-to-right pass; returns whether any rule fired.
pub fn optimise_once(items: &mut Vec<AssemblyItem>) -> bool {
    let mut out = Vec::with_capacity(items.len());
    let mut changed = false;
    let mut i = 0;
    'scan: while i < items.len() {
        for (name, rule) in RULES {
            if let Some((consumed, replacement)) = rule(&items[i..]) {
                trace!(target: "evmasm::optimiser", rule = *name, at = i, consumed, "peephole");
                out.extend(replacement);
                i += consumed;
                changed = true;
                continue 'scan;
            }
        }
        out.push(items[i].clone());
        i += 1;
    }
    if changed {
        *items = out;
    }
    changed
}

/// Repeats [`optimise_once`] until nothing fires. Returns the number of productive passes.
pub fn optimise(items: &mut Vec<AssemblyItem>, iteration_limit: usize) -> AsmResult<usize> {
    let mut iterations = 0;
    while optimise_once(items) {
        iterations += 1;
        if iterations >= iteration_limit {
            return Err(OptimizerViolation::PeepholeStuck { iterations }.into());
        }
    }
    Ok(iterations)
}

fn op(instruction: Instruction, like: &AssemblyItem) -> AssemblyItem {
    AssemblyItem::operation(instruction).with_location(like.location().clone())
}

/// Pushes with no effect besides the stack slot they fill.
fn is_pure_push(item: &AssemblyItem) -> bool {
    match item.kind() {
        ItemKind::Operation(i) => i.is_dup(),
        ItemKind::Tag(_) | ItemKind::AssignImmutable(_) => false,
        _ => true,
    }
}

fn push_pop(window: &[AssemblyItem]) -> Option<Rewrite> {
    match window {
        [push, pop, ..] if is_pure_push(push) && pop.is_operation(Instruction::POP) => Some((2, Vec::new())),
        _ => None,
    }
}

/// `op POP` becomes one `POP` per argument for pure operations of at most two arguments.
fn op_pop(window: &[AssemblyItem]) -> Option<Rewrite> {
    let [first, pop, ..] = window else {
        return None;
    };
    let instruction = first.instruction()?;
    let info = instruction.info()?;
    if !pop.is_operation(Instruction::POP) || !instruction.is_movable() || info.ret != 1 || info.args > 2 {
        return None;
    }
    if instruction.is_dup() || instruction.is_swap() {
        return None;
    }
    Some((2, (0..info.args).map(|_| op(Instruction::POP, pop)).collect()))
}

fn double_swap(window: &[AssemblyItem]) -> Option<Rewrite> {
    let [a, b, ..] = window else {
        return None;
    };
    let swap = a.instruction().filter(|i| i.is_swap())?;
    b.is_operation(swap).then(|| (2, Vec::new()))
}

fn commutative_swap(window: &[AssemblyItem]) -> Option<Rewrite> {
    let [swap, binary, ..] = window else {
        return None;
    };
    let instruction = binary.instruction().filter(|i| i.is_commutative())?;
    swap.is_operation(Instruction::SWAP1).then(|| (2, vec![op(instruction, binary)]))
}

fn swap_comparison(window: &[AssemblyItem]) -> Option<Rewrite> {
    let [swap, cmp, ..] = window else {
        return None;
    };
    if !swap.is_operation(Instruction::SWAP1) {
        return None;
    }
    let flipped = match cmp.instruction()? {
        Instruction::LT => Instruction::GT,
        Instruction::GT => Instruction::LT,
        Instruction::SLT => Instruction::SGT,
        Instruction::SGT => Instruction::SLT,
        _ => return None,
    };
    Some((2, vec![op(flipped, cmp)]))
}

fn literal(item: &AssemblyItem) -> Option<U256> {
    match item.kind() {
        ItemKind::Push(value) => Some(*value),
        _ => None,
    }
}

fn constant_fold(window: &[AssemblyItem]) -> Option<Rewrite> {
    let folded = |value: U256, like: &AssemblyItem| AssemblyItem::push(value).with_location(like.location().clone());
    match window {
        [a, b, operation, ..] if literal(a).is_some() && literal(b).is_some() => {
            let (a, b) = (literal(a)?, literal(b)?);
            let value = fold(operation.instruction()?, &[b, a])?;
            Some((3, vec![folded(value, operation)]))
        }
        [a, operation, ..] => {
            let value = fold(operation.instruction()?, &[literal(a)?])?;
            Some((2, vec![folded(value, operation)]))
        }
        _ => None,
    }
}

fn iszero_iszero_jumpi(window: &[AssemblyItem]) -> Option<Rewrite> {
    match window {
        [z1, z2, push, jumpi, ..]
            if z1.is_operation(Instruction::ISZERO)
                && z2.is_operation(Instruction::ISZERO)
                && push.tag_ref().is_some()
                && jumpi.is_operation(Instruction::JUMPI) =>
        {
            Some((4, vec![push.clone(), jumpi.clone()]))
        }
        _ => None,
    }
}

/// `PUSH [tag] JUMP(I) tag:` where the jump lands on the very next item.
fn jump_to_next(window: &[AssemblyItem]) -> Option<Rewrite> {
    let [push, jump, tag, ..] = window else {
        return None;
    };
    let TagRef { sub: None, tag: target } = push.tag_ref()? else {
        return None;
    };
    if tag.tag_id() != Some(target) {
        return None;
    }
    match jump.instruction()? {
        Instruction::JUMP => Some((3, vec![tag.clone()])),
        Instruction::JUMPI => Some((3, vec![op(Instruction::POP, jump), tag.clone()])),
        _ => None,
    }
}

/// Items between a block terminator and the next tag can never execute.
fn unreachable_code(window: &[AssemblyItem]) -> Option<Rewrite> {
    let terminator = window.first()?;
    if !terminator.instruction().is_some_and(Instruction::terminates_block) {
        return None;
    }
    let dead = window[1..].iter().take_while(|item| !item.is_tag()).count();
    (dead > 0).then(|| (1 + dead, vec![terminator.clone()]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(instructions: &[Instruction]) -> Vec<AssemblyItem> {
        instructions.iter().copied().map(AssemblyItem::operation).collect()
    }

    #[test]
    fn folds_literal_addition() {
        let mut items = vec![
            AssemblyItem::push(1u64),
            AssemblyItem::push(2u64),
            AssemblyItem::operation(Instruction::ADD),
        ];
        assert!(optimise_once(&mut items));
        assert_eq!(items, vec![AssemblyItem::push(3u64)]);
    }

    #[test]
    fn subtraction_uses_top_as_minuend() {
        let mut items = vec![
            AssemblyItem::push(3u64),
            AssemblyItem::push(10u64),
            AssemblyItem::operation(Instruction::SUB),
        ];
        optimise(&mut items, 100).expect("converges");
        assert_eq!(items, vec![AssemblyItem::push(7u64)]);
    }

    #[test]
    fn pure_values_before_pop_vanish() {
        let mut items = vec![
            AssemblyItem::operation(Instruction::CALLER),
            AssemblyItem::operation(Instruction::dup(1)),
            AssemblyItem::operation(Instruction::POP),
            AssemblyItem::operation(Instruction::ISZERO),
            AssemblyItem::operation(Instruction::POP),
        ];
        optimise(&mut items, 100).expect("converges");
        assert!(items.is_empty());
    }

    #[test]
    fn side_effects_survive_pop() {
        let mut items = ops(&[Instruction::CALLDATASIZE, Instruction::SLOAD, Instruction::POP]);
        assert!(!optimise_once(&mut items));
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn swaps_cancel_and_comparisons_flip() {
        let mut items = ops(&[
            Instruction::swap(2),
            Instruction::swap(2),
            Instruction::SWAP1,
            Instruction::LT,
            Instruction::SWAP1,
            Instruction::ADD,
        ]);
        optimise(&mut items, 100).expect("converges");
        assert_eq!(items, ops(&[Instruction::GT, Instruction::ADD]));
    }

    #[test]
    fn jump_to_next_tag_is_dropped() {
        let mut items = vec![
            AssemblyItem::push_tag(1),
            AssemblyItem::operation(Instruction::JUMP),
            AssemblyItem::tag(1),
            AssemblyItem::push_tag(2),
            AssemblyItem::operation(Instruction::JUMPI),
            AssemblyItem::tag(2),
        ];
        optimise(&mut items, 100).expect("converges");
        assert_eq!(
            items,
            vec![
                AssemblyItem::tag(1),
                AssemblyItem::operation(Instruction::POP),
                AssemblyItem::tag(2)
            ]
        );
    }

    #[test]
    fn dead_code_after_terminator_is_removed() {
        let mut items = vec![
            AssemblyItem::operation(Instruction::STOP),
            AssemblyItem::push(1u64),
            AssemblyItem::operation(Instruction::SLOAD),
            AssemblyItem::tag(4),
            AssemblyItem::operation(Instruction::STOP),
        ];
        optimise(&mut items, 100).expect("converges");
        assert_eq!(
            items,
            vec![
                AssemblyItem::operation(Instruction::STOP),
                AssemblyItem::tag(4),
                AssemblyItem::operation(Instruction::STOP)
            ]
        );
    }

    #[test]
    fn double_iszero_before_jumpi_is_removed() {
        let mut items = vec![
            AssemblyItem::operation(Instruction::ISZERO),
            AssemblyItem::operation(Instruction::ISZERO),
            AssemblyItem::push_tag(3),
            AssemblyItem::operation(Instruction::JUMPI),
        ];
        assert!(optimise_once(&mut items));
        assert_eq!(items, vec![AssemblyItem::push_tag(3), AssemblyItem::operation(Instruction::JUMPI)]);
    }

    #[test]
    fn fixed_point_is_idempotent_and_lowers_weight() {
        let mut items = vec![
            AssemblyItem::push(4u64),
            AssemblyItem::push(5u64),
            AssemblyItem::operation(Instruction::MUL),
            AssemblyItem::operation(Instruction::NOT),
            AssemblyItem::operation(Instruction::ISZERO),
            AssemblyItem::operation(Instruction::POP),
            AssemblyItem::push_tag(1),
            AssemblyItem::operation(Instruction::JUMP),
            AssemblyItem::operation(Instruction::CALLER),
            AssemblyItem::tag(1),
            AssemblyItem::operation(Instruction::STOP),
        ];
        let before = weight(&items);
        let passes = optimise(&mut items, 64_000).expect("converges");
        assert!(passes > 0);
        assert!(weight(&items) < before);
        let snapshot = items.clone();
        assert_eq!(optimise(&mut items, 64_000).expect("still converges"), 0);
        assert_eq!(items, snapshot);
    }

    #[test]
    fn ceiling_is_an_error() {
        let mut items = vec![
            AssemblyItem::push(1u64),
            AssemblyItem::push(2u64),
            AssemblyItem::operation(Instruction::ADD),
            AssemblyItem::operation(Instruction::POP),
        ];
        let err = optimise(&mut items, 1).expect_err("limit of one pass");
        assert!(err.to_string().contains("stuck"));
    }
}
