//! Cheaper encodings for large literal pushes.

use primitive_types::U256;
use tracing::trace;

use crate::instruction::{EvmVersion, Instruction};
use crate::item::{AssemblyItem, AssemblyItems, ItemKind};
use crate::util::bytes_required;

const CREATION_DATA_GAS: u64 = 200;
const RUNTIME_DATA_GAS: u64 = 68;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantParams {
    pub is_creation: bool,
    /// Expected executions of every item; creation code runs once.
    pub runs: u64,
    pub evm_version: EvmVersion,
}

impl ConstantParams {
    fn data_gas(&self) -> u64 {
        if self.is_creation { CREATION_DATA_GAS } else { RUNTIME_DATA_GAS }
    }
}

/// Rewrites literal pushes in place; returns the number of rewritten pushes.
pub trait ConstantOptimiser {
    fn optimise_constants(&self, params: &ConstantParams, items: &mut AssemblyItems) -> usize;
}

/// Picks, per literal, the encoding with the lowest combined execution and code-deposit gas.
#[derive(Debug, Clone, Copy, Default)]
pub struct GasConstantOptimiser;

struct Candidate {
    items: Vec<AssemblyItem>,
    gas: u64,
    bytes: u64,
}

impl Candidate {
    fn cost(&self, params: &ConstantParams) -> u64 {
        params
            .runs
            .saturating_mul(self.gas)
            .saturating_add(self.bytes * params.data_gas())
    }
}

fn push_bytes(value: U256) -> u64 {
    1 + bytes_required(value).max(1) as u64
}

fn push_gas() -> u64 {
    Instruction::push(1).info().map_or(3, |info| info.tier.gas())
}

fn op_gas(instruction: Instruction) -> u64 {
    instruction.info().map_or(3, |info| info.tier.gas())
}

fn candidates(value: U256, params: &ConstantParams) -> Vec<Candidate> {
    let mut found = vec![Candidate {
        items: vec![AssemblyItem::push(value)],
        gas: push_gas(),
        bytes: push_bytes(value),
    }];
    let inverted = !value;
    found.push(Candidate {
        items: vec![AssemblyItem::push(inverted), AssemblyItem::operation(Instruction::NOT)],
        gas: push_gas() + op_gas(Instruction::NOT),
        bytes: push_bytes(inverted) + 1,
    });
    let shift = value.trailing_zeros() as usize;
    if params.evm_version.has_bitwise_shifting() && shift > 8 {
        let mantissa = value >> shift;
        let shift = U256::from(shift as u64);
        found.push(Candidate {
            items: vec![
                AssemblyItem::push(mantissa),
                AssemblyItem::push(shift),
                AssemblyItem::operation(Instruction::SHL),
            ],
            gas: 2 * push_gas() + op_gas(Instruction::SHL),
            bytes: push_bytes(mantissa) + push_bytes(shift) + 1,
        });
    }
    found
}

impl ConstantOptimiser for GasConstantOptimiser {
    fn optimise_constants(&self, params: &ConstantParams, items: &mut AssemblyItems) -> usize {
        let mut rewritten = 0;
        let mut out = Vec::with_capacity(items.len());
        for item in items.drain(..) {
            let ItemKind::Push(value) = *item.kind() else {
                out.push(item);
                continue;
            };
            if value.is_zero() {
                out.push(item);
                continue;
            }
            let mut options = candidates(value, params);
            let literal_cost = options[0].cost(params);
            let best = (1..options.len())
                .filter(|&index| options[index].cost(params) < literal_cost)
                .min_by_key(|&index| options[index].cost(params));
            let Some(best) = best else {
                out.push(item);
                continue;
            };
            trace!(target: "evmasm::optimiser", value = %format_args!("0x{value:x}"), pieces = options[best].items.len(), "constant rewritten");
            for mut replacement in options.swap_remove(best).items {
                replacement.set_location(item.location().clone());
                replacement.set_modifier_depth(item.modifier_depth());
                out.push(replacement);
            }
            rewritten += 1;
        }
        *items = out;
        rewritten
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(is_creation: bool, runs: u64, evm_version: EvmVersion) -> ConstantParams {
        ConstantParams { is_creation, runs, evm_version }
    }

    #[test]
    fn mostly_ones_becomes_not() {
        let value = !U256::from(0x1234u64);
        let mut items = vec![AssemblyItem::push(value)];
        let count = GasConstantOptimiser.optimise_constants(&params(false, 200, EvmVersion::Istanbul), &mut items);
        assert_eq!(count, 1);
        assert_eq!(
            items,
            vec![AssemblyItem::push(0x1234u64), AssemblyItem::operation(Instruction::NOT)]
        );
    }

    #[test]
    fn shifted_mantissa_needs_shift_support() {
        let value = U256::from(0xffu64) << 240;
        let mut items = vec![AssemblyItem::push(value)];
        GasConstantOptimiser.optimise_constants(&params(true, 1, EvmVersion::Istanbul), &mut items);
        assert_eq!(
            items,
            vec![
                AssemblyItem::push(0xffu64),
                AssemblyItem::push(240u64),
                AssemblyItem::operation(Instruction::SHL),
            ]
        );

        let mut items = vec![AssemblyItem::push(value)];
        let count = GasConstantOptimiser.optimise_constants(&params(true, 1, EvmVersion::Byzantium), &mut items);
        assert_eq!(count, 0);
        assert_eq!(items, vec![AssemblyItem::push(value)]);
    }

    #[test]
    fn small_literals_and_zero_stay() {
        let mut items = vec![
            AssemblyItem::push(0u64),
            AssemblyItem::push(0x42u64),
            AssemblyItem::operation(Instruction::ADD),
        ];
        let before = items.clone();
        assert_eq!(
            GasConstantOptimiser.optimise_constants(&params(true, 1, EvmVersion::Istanbul), &mut items),
            0
        );
        assert_eq!(items, before);
    }

    #[test]
    fn many_runs_favour_the_literal() {
        // 0x..ff00..: NOT saves 30 bytes but costs 3 extra gas per execution.
        let value = !U256::from(0xffu64);
        let mut items = vec![AssemblyItem::push(value)];
        let count =
            GasConstantOptimiser.optimise_constants(&params(false, 1_000_000, EvmVersion::Byzantium), &mut items);
        assert_eq!(count, 0);
    }

    #[test]
    fn rewrite_keeps_location() {
        let location = crate::location::SourceLocation::new("c.sol", 3, 9);
        let mut items = vec![AssemblyItem::push(!U256::one()).with_location(location.clone())];
        GasConstantOptimiser.optimise_constants(&params(false, 1, EvmVersion::Istanbul), &mut items);
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.location() == &location));
    }
}
