//! Merging of structurally identical blocks.
//!
//! A block starts at a tag and runs (skipping further tags) up to and including the
//! first instruction that ends straight-line execution. Later blocks equal to an
//! earlier one are redirected to it by rewriting the tag pushes that target them.

use std::collections::BTreeMap;

use tracing::trace;

use crate::item::{AssemblyItem, ItemKind, TagRef};
use crate::util::{FastHashMap, fast_hash_map_new};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum BlockElement {
    /// Push of the block's own entry tag.
    SelfTag,
    Item(ItemKind),
}

#[derive(Debug, Default)]
pub struct Deduplication {
    /// Eliminated entry tag to surviving tag, chains already resolved.
    pub replacements: BTreeMap<usize, usize>,
    /// Whether any local tag push was rewritten.
    pub changed: bool,
}

fn block_signature(items: &[AssemblyItem], entry: usize, tag: usize) -> Vec<BlockElement> {
    let mut signature = Vec::new();
    for item in items[entry + 1..].iter().filter(|item| !item.is_tag()) {
        let element = match *item.kind() {
            ItemKind::PushTag(TagRef { sub: None, tag: target }) if target == tag => BlockElement::SelfTag,
            kind => BlockElement::Item(kind),
        };
        signature.push(element);
        if item.instruction().is_some_and(|i| i.terminates_block()) {
            break;
        }
    }
    signature
}

/// Follows `replacements` from `tag` to the tag that finally survives.
pub fn resolve(replacements: &BTreeMap<usize, usize>, mut tag: usize) -> usize {
    let mut steps = 0;
    while let Some(&next) = replacements.get(&tag) {
        if next == tag || steps > replacements.len() {
            break;
        }
        tag = next;
        steps += 1;
    }
    tag
}

pub fn deduplicate(items: &mut [AssemblyItem]) -> Deduplication {
    let mut result = Deduplication::default();
    loop {
        let mut seen: FastHashMap<Vec<BlockElement>, usize> = fast_hash_map_new();
        for (index, item) in items.iter().enumerate() {
            let Some(tag) = item.tag_id() else {
                continue;
            };
            let signature = block_signature(items, index, tag);
            match seen.get(&signature) {
                Some(&first) if first != tag => {
                    result.replacements.insert(tag, first);
                }
                Some(_) => {}
                None => {
                    seen.insert(signature, tag);
                }
            }
        }
        let resolved: BTreeMap<usize, usize> = result
            .replacements
            .keys()
            .map(|&from| (from, resolve(&result.replacements, from)))
            .collect();
        result.replacements = resolved;
        if !apply_tag_replacement(items, &result.replacements, None) {
            break;
        }
        result.changed = true;
    }
    if !result.replacements.is_empty() {
        trace!(target: "evmasm::optimiser", replaced = result.replacements.len(), "deduplicated blocks");
    }
    result
}

/// Rewrites pushes of tags living in `sub` according to `replacements`.
pub fn apply_tag_replacement(
    items: &mut [AssemblyItem],
    replacements: &BTreeMap<usize, usize>,
    sub: Option<usize>,
) -> bool {
    let mut changed = false;
    for item in items.iter_mut() {
        if let ItemKind::PushTag(TagRef { sub: owner, tag }) = item.kind_mut()
            && *owner == sub
            && let Some(&target) = replacements.get(&*tag)
            && target != *tag
        {
            *tag = target;
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;

    fn block(tag: usize, target: usize) -> Vec<AssemblyItem> {
        vec![
            AssemblyItem::tag(tag),
            AssemblyItem::push(1u64),
            AssemblyItem::operation(Instruction::SLOAD),
            AssemblyItem::push_tag(target),
            AssemblyItem::operation(Instruction::JUMP),
        ]
    }

    #[test]
    fn identical_blocks_merge_into_the_first() {
        let mut items = vec![
            AssemblyItem::push_tag(1),
            AssemblyItem::push_tag(2),
            AssemblyItem::operation(Instruction::JUMPI),
            AssemblyItem::operation(Instruction::STOP),
        ];
        items.extend(block(1, 9));
        items.extend(block(2, 9));
        items.push(AssemblyItem::tag(9));
        items.push(AssemblyItem::operation(Instruction::STOP));
        let result = deduplicate(&mut items);
        assert!(result.changed);
        assert_eq!(result.replacements.get(&2), Some(&1));
        assert_eq!(items[1], AssemblyItem::push_tag(1));
    }

    #[test]
    fn self_loops_compare_equal() {
        let mut items = vec![AssemblyItem::push_tag(7)];
        items.extend(block(3, 3));
        items.extend(block(7, 7));
        let result = deduplicate(&mut items);
        assert_eq!(result.replacements.get(&7), Some(&3));
        assert_eq!(items[0], AssemblyItem::push_tag(3));
    }

    #[test]
    fn different_bodies_stay_apart() {
        let mut items = block(1, 5);
        items.extend(block(2, 6));
        let result = deduplicate(&mut items);
        assert!(result.replacements.is_empty());
        assert!(!result.changed);
    }

    #[test]
    fn replacements_apply_per_sub() {
        let mut items = vec![
            AssemblyItem::new(ItemKind::PushTag(TagRef::foreign(0, 4))),
            AssemblyItem::push_tag(4),
        ];
        let mut map = BTreeMap::new();
        map.insert(4, 2);
        assert!(apply_tag_replacement(&mut items, &map, Some(0)));
        assert_eq!(items[0].tag_ref(), Some(TagRef::foreign(0, 2)));
        assert_eq!(items[1].tag_ref(), Some(TagRef::local(4)));
    }

    #[test]
    fn chains_resolve_to_the_survivor() {
        let mut map = BTreeMap::new();
        map.insert(5, 3);
        map.insert(3, 1);
        assert_eq!(resolve(&map, 5), 1);
        assert_eq!(resolve(&map, 8), 8);
    }
}
