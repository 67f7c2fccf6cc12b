//! Optimisation passes and the tree driver that runs them to a fixed point.

pub mod constants;
pub mod cse;
pub mod dedup;
mod fold;
pub mod jumpdest;
pub mod peephole;


use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::assembly::Assembly;
use crate::error::{AsmResult, OptimizerViolation};
use crate::instruction::EvmVersion;
use crate::util::{FastHashSet, fast_hash_set_new};
use constants::{ConstantOptimiser, ConstantParams, GasConstantOptimiser};
use dedup::{apply_tag_replacement, deduplicate, resolve};
use jumpdest::{referenced_tags, remove_unused_tags};

pub const DEFAULT_RUNS: u64 = 200;
pub const DEFAULT_PEEPHOLE_ITERATION_LIMIT: usize = 64_000;

/// Which passes run and how the constant optimiser weighs code size against execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimiserSettings {
    pub run_jumpdest_remover: bool,
    pub run_peephole: bool,
    pub run_deduplicate: bool,
    pub run_cse: bool,
    pub run_constant_optimiser: bool,
    /// Whether the root is creation code; sub-assemblies are always runtime code.
    pub is_creation: bool,
    pub evm_version: EvmVersion,
    pub expected_executions_per_deployment: u64,
    pub peephole_iteration_limit: usize,
}

impl Default for OptimiserSettings {
    fn default() -> Self {
        Self::minimal()
    }
}

impl OptimiserSettings {
    pub fn minimal() -> Self {
        Self {
            run_jumpdest_remover: true,
            run_peephole: true,
            run_deduplicate: false,
            run_cse: false,
            run_constant_optimiser: false,
            is_creation: true,
            evm_version: EvmVersion::default(),
            expected_executions_per_deployment: DEFAULT_RUNS,
            peephole_iteration_limit: DEFAULT_PEEPHOLE_ITERATION_LIMIT,
        }
    }

    pub fn full() -> Self {
        Self {
            run_deduplicate: true,
            run_cse: true,
            run_constant_optimiser: true,
            ..Self::minimal()
        }
    }

    fn for_sub_assembly(&self) -> Self {
        Self {
            is_creation: false,
            ..self.clone()
        }
    }
}

impl Assembly {
    /// Optimises the tree with the gas-based constant optimiser.
    pub fn optimise(&mut self, settings: &OptimiserSettings) -> AsmResult<()> {
        self.optimise_using(settings, &GasConstantOptimiser)
    }

    pub fn optimise_using(&mut self, settings: &OptimiserSettings, constants: &dyn ConstantOptimiser) -> AsmResult<()> {
        self.optimise_internal(settings, constants, &fast_hash_set_new())?;
        Ok(())
    }

    /// `enable` selects every pass, otherwise only jumpdest removal and peephole run.
    pub fn optimise_with(
        &mut self,
        enable: bool,
        evm_version: EvmVersion,
        is_creation: bool,
        runs: u64,
    ) -> AsmResult<()> {
        let base = if enable { OptimiserSettings::full() } else { OptimiserSettings::minimal() };
        let settings = OptimiserSettings {
            evm_version,
            is_creation,
            expected_executions_per_deployment: runs,
            ..base
        };
        self.optimise(&settings)
    }

    /// Optimises sub-assemblies first, then this node. Returns this node's tag replacements,
    /// resolved to their final survivors.
    fn optimise_internal(
        &mut self,
        settings: &OptimiserSettings,
        constants: &dyn ConstantOptimiser,
        tags_referenced_from_outside: &FastHashSet<usize>,
    ) -> AsmResult<BTreeMap<usize, usize>> {
        self.ensure_mutable()?;

        let sub_settings = settings.for_sub_assembly();
        for index in 0..self.subs.len() {
            let referenced = referenced_tags(&self.items, Some(index));
            let replacements = self.subs[index].optimise_internal(&sub_settings, constants, &referenced)?;
            apply_tag_replacement(&mut self.items, &replacements, Some(index));
        }

        let mut outside = tags_referenced_from_outside.clone();
        let mut replacements: BTreeMap<usize, usize> = BTreeMap::new();
        let mut round = 0usize;
        loop {
            round += 1;
            let before = self.items.len();
            let mut changed = false;

            if settings.run_jumpdest_remover {
                changed |= remove_unused_tags(&mut self.items, &outside);
            }
            if settings.run_peephole {
                changed |= peephole::optimise(&mut self.items, settings.peephole_iteration_limit)? > 0;
            }
            if settings.run_deduplicate {
                let dedup = deduplicate(&mut self.items);
                changed |= dedup.changed;
                for (&from, &to) in &dedup.replacements {
                    if from == to {
                        return Err(OptimizerViolation::InvalidTagReplacement { from, to }.into());
                    }
                    if let Some(&known) = replacements.get(&from) {
                        if resolve(&replacements, known) != resolve(&replacements, to) {
                            return Err(OptimizerViolation::ReplacementAlreadyKnown { tag: from }.into());
                        }
                        continue;
                    }
                    replacements.insert(from, to);
                    if outside.remove(&from) {
                        outside.insert(resolve(&replacements, to));
                        changed = true;
                    }
                }
            }
            if settings.run_cse {
                changed |= cse::eliminate(&mut self.items);
            }

            debug!(target: "evmasm::optimiser", round, before, after = self.items.len(), changed, "optimiser round");
            if !changed {
                break;
            }
        }

        if settings.run_constant_optimiser {
            let params = ConstantParams {
                is_creation: settings.is_creation,
                runs: if settings.is_creation { 1 } else { settings.expected_executions_per_deployment },
                evm_version: settings.evm_version,
            };
            let rewritten = constants.optimise_constants(&params, &mut self.items);
            debug!(target: "evmasm::optimiser", rewritten, "constants");
        }

        Ok(replacements
            .keys()
            .map(|&from| (from, resolve(&replacements, from)))
            .collect())
    }
}
