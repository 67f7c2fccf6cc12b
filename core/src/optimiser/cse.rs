//! Common subexpression elimination over straight-line chunks.
//!
//! Each chunk is executed symbolically: stack slots, storage and memory contents
//! become nodes of a hash-consed expression graph. The chunk is then regenerated
//! from the graph, emitting the recorded stores in their original order followed
//! by the code that rebuilds the final stack. Chunks whose regeneration fails or
//! is not shorter are kept verbatim.

use std::collections::BTreeMap;

use primitive_types::U256;
use tracing::trace;

use super::fold::fold;
use crate::instruction::Instruction;
use crate::item::{AssemblyItem, AssemblyItems, ItemKind};
use crate::location::SourceLocation;
use crate::util::{FastHashMap, FastHashSet, fast_hash_set_new};

const MAX_CHUNK: usize = 2000;
const STACK_LIMIT: usize = 16;
/// Generator slot of an initial stack entry the chunk never looked at.
const UNTOUCHED: usize = usize::MAX;

type ExprId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CseFailure {
    /// A value would have to be reached deeper than `DUP16`/`SWAP16`.
    StackTooDeep,
    /// A value is needed that the regenerated code cannot reproduce.
    ItemNotAvailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Expr {
    /// Slot of the stack as it was when the chunk started; 0 is the top.
    Initial(i64),
    Constant(U256),
    /// Push with a value only known at assembly time.
    Leaf(ItemKind),
    /// `sequence` orders loads against the stores recorded before them.
    Op {
        instruction: Instruction,
        args: Vec<ExprId>,
        sequence: usize,
    },
}

#[derive(Default)]
struct ExpressionPool {
    exprs: Vec<Expr>,
    locations: Vec<SourceLocation>,
    ids: FastHashMap<Expr, ExprId>,
}

impl ExpressionPool {
    fn intern(&mut self, expr: Expr, location: &SourceLocation) -> ExprId {
        if let Some(&id) = self.ids.get(&expr) {
            return id;
        }
        let id = self.exprs.len();
        self.exprs.push(expr.clone());
        self.locations.push(location.clone());
        self.ids.insert(expr, id);
        id
    }

    fn constant(&self, id: ExprId) -> Option<U256> {
        match self.exprs[id] {
            Expr::Constant(value) => Some(value),
            _ => None,
        }
    }

    fn operation(&mut self, instruction: Instruction, mut args: Vec<ExprId>, sequence: usize, location: &SourceLocation) -> ExprId {
        let literals: Option<Vec<U256>> = args.iter().map(|&arg| self.constant(arg)).collect();
        if let Some(literals) = literals
            && let Some(value) = fold(instruction, &literals)
        {
            return self.intern(Expr::Constant(value), location);
        }
        if instruction.is_commutative() {
            args.sort_unstable();
        }
        self.intern(Expr::Op { instruction, args, sequence }, location)
    }

    fn is_load(&self, id: ExprId) -> bool {
        matches!(
            self.exprs[id],
            Expr::Op { instruction: Instruction::SLOAD | Instruction::MLOAD, .. }
        )
    }
}

#[derive(Clone, Copy)]
struct Store {
    instruction: Instruction,
    key: ExprId,
    value: ExprId,
}

/// Symbolic machine state of one chunk.
struct KnownState {
    pool: ExpressionPool,
    stack: BTreeMap<i64, ExprId>,
    /// Position of the current top; the initial top sits at 0.
    height: i64,
    /// Lowest position read or written so far.
    lowest: i64,
    storage: BTreeMap<ExprId, ExprId>,
    memory: BTreeMap<ExprId, ExprId>,
    stores: Vec<Store>,
    model_memory: bool,
    location: SourceLocation,
}

impl KnownState {
    fn new(model_memory: bool) -> Self {
        Self {
            pool: ExpressionPool::default(),
            stack: BTreeMap::new(),
            height: 0,
            lowest: 1,
            storage: BTreeMap::new(),
            memory: BTreeMap::new(),
            stores: Vec::new(),
            model_memory,
            location: SourceLocation::unknown(),
        }
    }

    fn can_model(&self, item: &AssemblyItem) -> bool {
        match item.kind() {
            ItemKind::Tag(_) | ItemKind::AssignImmutable(_) => false,
            ItemKind::Operation(instruction) => {
                let instruction = *instruction;
                let Some(info) = instruction.info() else {
                    return false;
                };
                match instruction {
                    Instruction::SLOAD | Instruction::SSTORE => true,
                    Instruction::MLOAD | Instruction::MSTORE => self.model_memory,
                    _ if instruction.is_dup() || instruction.is_swap() || instruction == Instruction::POP => true,
                    _ => instruction.is_movable() && info.ret <= 1,
                }
            }
            _ => true,
        }
    }

    fn slot(&mut self, position: i64) -> ExprId {
        self.lowest = self.lowest.min(position);
        if let Some(&id) = self.stack.get(&position) {
            return id;
        }
        let id = self.pool.intern(Expr::Initial(position), &SourceLocation::unknown());
        self.stack.insert(position, id);
        id
    }

    fn push(&mut self, id: ExprId) {
        self.height += 1;
        self.stack.insert(self.height, id);
    }

    fn pop(&mut self) -> ExprId {
        let id = self.slot(self.height);
        self.stack.remove(&self.height);
        self.height -= 1;
        id
    }

    fn feed(&mut self, item: &AssemblyItem) {
        if !self.location.is_valid() {
            self.location = item.location().clone();
        }
        let location = item.location();
        let instruction = match *item.kind() {
            ItemKind::Operation(instruction) => instruction,
            ItemKind::Push(value) => {
                let id = self.pool.intern(Expr::Constant(value), location);
                self.push(id);
                return;
            }
            kind => {
                let id = self.pool.intern(Expr::Leaf(kind), location);
                self.push(id);
                return;
            }
        };
        if instruction.is_dup() {
            let id = self.slot(self.height + 1 - instruction.dup_depth() as i64);
            self.push(id);
            return;
        }
        if instruction.is_swap() {
            let other = self.height - instruction.swap_depth() as i64;
            let (top, below) = (self.slot(self.height), self.slot(other));
            self.stack.insert(self.height, below);
            self.stack.insert(other, top);
            return;
        }
        match instruction {
            Instruction::POP => {
                self.pop();
            }
            Instruction::SLOAD | Instruction::MLOAD => {
                let key = self.pop();
                let known = self.table_mut(instruction).get(&key).copied();
                let value = match known {
                    Some(value) => value,
                    None => {
                        let value = self.pool.operation(instruction, vec![key], self.stores.len(), location);
                        self.table_mut(instruction).insert(key, value);
                        value
                    }
                };
                self.push(value);
            }
            Instruction::SSTORE | Instruction::MSTORE => {
                let key = self.pop();
                let value = self.pop();
                if self.table_mut(instruction).get(&key) == Some(&value) {
                    return;
                }
                let pool = &self.pool;
                let distinct = |other: ExprId| match (pool.constant(key), pool.constant(other)) {
                    (Some(a), Some(b)) if instruction == Instruction::SSTORE => a != b,
                    (Some(a), Some(b)) => {
                        let gap = if a > b { a - b } else { b - a };
                        gap >= U256::from(32u64)
                    }
                    _ => false,
                };
                let table = if instruction == Instruction::SSTORE { &mut self.storage } else { &mut self.memory };
                table.retain(|&other, _| distinct(other));
                table.insert(key, value);
                self.stores.push(Store { instruction, key, value });
            }
            _ => {
                let info = instruction.info();
                let (args, ret) = info.map_or((0, 0), |info| (info.args, info.ret));
                let operands: Vec<ExprId> = (0..args).map(|_| self.pop()).collect();
                if ret == 1 {
                    let id = self.pool.operation(instruction, operands, 0, location);
                    self.push(id);
                }
            }
        }
    }

    fn table_mut(&mut self, instruction: Instruction) -> &mut BTreeMap<ExprId, ExprId> {
        if matches!(instruction, Instruction::SLOAD | Instruction::SSTORE) {
            &mut self.storage
        } else {
            &mut self.memory
        }
    }

    /// Regenerates the chunk, followed by `breaking` if the chunk ended on one.
    fn generate(&self, breaking: Option<&AssemblyItem>) -> Result<AssemblyItems, CseFailure> {
        let base = self.lowest.min(self.height + 1);
        let mut generator = CodeGenerator {
            pool: &self.pool,
            stack: Vec::new(),
            items: Vec::new(),
            stores_emitted: 0,
            location: self.location.clone(),
        };
        for position in base..=0 {
            generator.stack.push(self.initial(position));
        }

        let targets: Vec<ExprId> = (base..=self.height).map(|position| self.stack_value(position)).collect();
        let mut roots: Vec<ExprId> = targets.clone();
        for store in &self.stores {
            roots.push(store.key);
            roots.push(store.value);
        }
        let loads = self.needed_loads(&roots);

        for (index, store) in self.stores.iter().enumerate() {
            for &load in loads.iter().filter(|&&load| self.load_sequence(load) == Some(index)) {
                if !generator.stack.contains(&load) {
                    generator.generate(load)?;
                }
            }
            generator.generate(store.value)?;
            generator.generate(store.key)?;
            generator.emit(AssemblyItem::operation(store.instruction));
            generator.stack.truncate(generator.stack.len() - 2);
            generator.stores_emitted += 1;
        }

        for (index, &target) in targets.iter().enumerate() {
            if generator.stack.get(index) == Some(&target) {
                continue;
            }
            generator.generate(target)?;
            let top = generator.stack.len() - 1;
            if top == index {
                continue;
            }
            let depth = top - index;
            if depth > STACK_LIMIT {
                return Err(CseFailure::StackTooDeep);
            }
            generator.emit(AssemblyItem::operation(Instruction::swap(depth)));
            generator.stack.swap(index, top);
        }
        while generator.stack.len() > targets.len() {
            generator.emit(AssemblyItem::operation(Instruction::POP));
            generator.stack.pop();
        }
        if let Some(item) = breaking {
            generator.items.push(item.clone());
        }
        Ok(generator.items)
    }

    fn initial(&self, position: i64) -> ExprId {
        self.pool.ids.get(&Expr::Initial(position)).copied().unwrap_or(UNTOUCHED)
    }

    fn stack_value(&self, position: i64) -> ExprId {
        match self.stack.get(&position) {
            Some(&id) => id,
            None => self.initial(position),
        }
    }

    fn load_sequence(&self, id: ExprId) -> Option<usize> {
        match &self.pool.exprs[id] {
            Expr::Op { instruction: Instruction::SLOAD | Instruction::MLOAD, sequence, .. } => Some(*sequence),
            _ => None,
        }
    }

    /// Loads reachable from `roots`, in creation order.
    fn needed_loads(&self, roots: &[ExprId]) -> Vec<ExprId> {
        let mut visited: FastHashSet<ExprId> = fast_hash_set_new();
        let mut pending: Vec<ExprId> = roots.iter().copied().filter(|&id| id < self.pool.exprs.len()).collect();
        while let Some(id) = pending.pop() {
            if !visited.insert(id) {
                continue;
            }
            if let Expr::Op { args, .. } = &self.pool.exprs[id] {
                pending.extend(args.iter().copied());
            }
        }
        let mut loads: Vec<ExprId> = visited.into_iter().filter(|&id| self.pool.is_load(id)).collect();
        loads.sort_unstable();
        loads
    }
}

struct CodeGenerator<'a> {
    pool: &'a ExpressionPool,
    /// Expression held by every slot, bottom first.
    stack: Vec<ExprId>,
    items: AssemblyItems,
    stores_emitted: usize,
    location: SourceLocation,
}

impl CodeGenerator<'_> {
    fn emit(&mut self, item: AssemblyItem) {
        let item = if item.location().is_valid() {
            item
        } else {
            item.with_location(self.location.clone())
        };
        self.items.push(item);
    }

    /// Leaves a copy of `id` on top of the stack.
    fn generate(&mut self, id: ExprId) -> Result<(), CseFailure> {
        if let Some(index) = self.stack.iter().rposition(|&slot| slot == id) {
            let depth = self.stack.len() - index;
            if depth > STACK_LIMIT {
                return Err(CseFailure::StackTooDeep);
            }
            self.emit(AssemblyItem::operation(Instruction::dup(depth)));
            self.stack.push(id);
            return Ok(());
        }
        let pool = self.pool;
        let location = pool.locations.get(id).cloned().unwrap_or_default();
        match pool.exprs.get(id).ok_or(CseFailure::ItemNotAvailable)? {
            Expr::Initial(_) => return Err(CseFailure::ItemNotAvailable),
            Expr::Constant(value) => self.emit(AssemblyItem::push(*value).with_location(location)),
            Expr::Leaf(kind) => self.emit(AssemblyItem::new(*kind).with_location(location)),
            Expr::Op { instruction, args, sequence } => {
                if pool.is_load(id) && *sequence != self.stores_emitted {
                    return Err(CseFailure::ItemNotAvailable);
                }
                for &arg in args.iter().rev() {
                    self.generate(arg)?;
                }
                self.emit(AssemblyItem::operation(*instruction).with_location(location));
                self.stack.truncate(self.stack.len() - args.len());
            }
        }
        self.stack.push(id);
        Ok(())
    }
}

/// Runs elimination over every chunk of `items`; returns whether the sequence shrank.
pub fn eliminate(items: &mut AssemblyItems) -> bool {
    let model_memory = !items.iter().any(|item| item.is_operation(Instruction::MSIZE));
    let mut out: AssemblyItems = Vec::with_capacity(items.len());
    let mut start = 0;
    while start < items.len() {
        let mut state = KnownState::new(model_memory);
        let mut end = start;
        while end < items.len() && end - start < MAX_CHUNK && state.can_model(&items[end]) {
            state.feed(&items[end]);
            end += 1;
        }
        let breaking = (end < items.len() && end - start < MAX_CHUNK).then(|| &items[end]);
        if breaking.is_some() {
            end += 1;
        }
        match state.generate(breaking) {
            Ok(chunk) if chunk.len() < end - start => {
                trace!(target: "evmasm::optimiser", start, original = end - start, optimised = chunk.len(), "cse chunk");
                out.extend(chunk);
            }
            Ok(_) => out.extend_from_slice(&items[start..end]),
            Err(failure) => {
                trace!(target: "evmasm::optimiser", start, ?failure, "cse chunk kept");
                out.extend_from_slice(&items[start..end]);
            }
        }
        start = end;
    }
    let shrank = out.len() < items.len();
    if shrank {
        *items = out;
    }
    shrank
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(instruction: Instruction) -> AssemblyItem {
        AssemblyItem::operation(instruction)
    }

    #[test]
    fn folds_constants_before_jump() {
        let mut items = vec![
            AssemblyItem::push(1u64),
            AssemblyItem::push(2u64),
            op(Instruction::ADD),
            AssemblyItem::push_tag(1),
            op(Instruction::JUMP),
            AssemblyItem::tag(1),
            op(Instruction::STOP),
        ];
        assert!(eliminate(&mut items));
        assert_eq!(
            items,
            vec![
                AssemblyItem::push(3u64),
                AssemblyItem::push_tag(1),
                op(Instruction::JUMP),
                AssemblyItem::tag(1),
                op(Instruction::STOP),
            ]
        );
    }

    #[test]
    fn repeated_loads_are_shared() {
        let mut items = vec![
            op(Instruction::CALLER),
            op(Instruction::SLOAD),
            op(Instruction::CALLER),
            op(Instruction::SLOAD),
            op(Instruction::ADD),
            op(Instruction::STOP),
        ];
        assert!(eliminate(&mut items));
        assert_eq!(
            items,
            vec![
                op(Instruction::CALLER),
                op(Instruction::SLOAD),
                op(Instruction::DUP1),
                op(Instruction::ADD),
                op(Instruction::STOP),
            ]
        );
    }

    #[test]
    fn load_after_store_reuses_stored_value() {
        let mut items = vec![
            op(Instruction::CALLVALUE),
            AssemblyItem::push(5u64),
            op(Instruction::SSTORE),
            AssemblyItem::push(5u64),
            op(Instruction::SLOAD),
            op(Instruction::STOP),
        ];
        assert!(eliminate(&mut items));
        assert_eq!(
            items,
            vec![
                op(Instruction::CALLVALUE),
                AssemblyItem::push(5u64),
                op(Instruction::SSTORE),
                op(Instruction::CALLVALUE),
                op(Instruction::STOP),
            ]
        );
    }

    #[test]
    fn redundant_store_is_dropped() {
        let mut items = vec![
            AssemblyItem::push(1u64),
            op(Instruction::SLOAD),
            AssemblyItem::push(1u64),
            op(Instruction::SSTORE),
            op(Instruction::STOP),
        ];
        assert!(eliminate(&mut items));
        assert_eq!(items, vec![op(Instruction::STOP)]);
    }

    #[test]
    fn popped_initial_slot_is_reproduced() {
        let mut state = KnownState::new(true);
        state.feed(&op(Instruction::POP));
        assert_eq!(state.generate(None), Ok(vec![op(Instruction::POP)]));
    }

    #[test]
    fn deep_swap_is_too_deep_to_rebuild() {
        let mut state = KnownState::new(true);
        state.feed(&op(Instruction::swap(16)));
        assert_eq!(state.generate(None), Err(CseFailure::StackTooDeep));

        let mut items = vec![op(Instruction::swap(16))];
        assert!(!eliminate(&mut items));
        assert_eq!(items, vec![op(Instruction::swap(16))]);
    }

    #[test]
    fn loads_stay_ordered_against_stores() {
        // x := sload(k); sstore(k', 1); x + sload(k)
        let mut items = vec![
            op(Instruction::CALLER),
            op(Instruction::SLOAD),
            AssemblyItem::push(1u64),
            op(Instruction::CALLVALUE),
            op(Instruction::SSTORE),
            op(Instruction::CALLER),
            op(Instruction::SLOAD),
            op(Instruction::ADD),
            op(Instruction::STOP),
        ];
        let before = items.clone();
        eliminate(&mut items);
        let store = items.iter().position(|i| i.is_operation(Instruction::SSTORE)).expect("store kept");
        let loads: Vec<usize> = items
            .iter()
            .enumerate()
            .filter(|(_, i)| i.is_operation(Instruction::SLOAD))
            .map(|(index, _)| index)
            .collect();
        assert_eq!(loads.len(), 2);
        assert!(loads[0] < store && loads[1] > store);
        assert!(items.len() <= before.len());
    }

    #[test]
    fn msize_disables_memory_modelling() {
        let mut items = vec![
            AssemblyItem::push(1u64),
            AssemblyItem::push(0u64),
            op(Instruction::MSTORE),
            op(Instruction::MSIZE),
            op(Instruction::POP),
        ];
        let before = items.clone();
        assert!(!eliminate(&mut items));
        assert_eq!(items, before);
    }
}
