//! Removal of jump destinations nothing can jump to.

use tracing::trace;

use crate::item::{AssemblyItem, ItemKind, TagRef};
use crate::util::{FastHashSet, fast_hash_set_new};

/// Tags pushed by `items` that live in `sub` (`None` for the items' own assembly).
pub fn referenced_tags(items: &[AssemblyItem], sub: Option<usize>) -> FastHashSet<usize> {
    let mut tags = fast_hash_set_new();
    for item in items {
        if let ItemKind::PushTag(TagRef { sub: owner, tag }) = *item.kind()
            && owner == sub
        {
            tags.insert(tag);
        }
    }
    tags
}

/// Drops every `Tag` that is neither pushed locally nor referenced from outside.
///
/// A tag at index 0 is kept so that offset 0 stays a jump destination.
pub fn remove_unused_tags(items: &mut Vec<AssemblyItem>, referenced_from_outside: &FastHashSet<usize>) -> bool {
    let mut referenced = referenced_tags(items, None);
    referenced.extend(referenced_from_outside.iter().copied());
    let before = items.len();
    let mut index = 0;
    items.retain(|item| {
        let keep = index == 0
            || match item.tag_id() {
                Some(tag) => referenced.contains(&tag),
                None => true,
            };
        index += 1;
        keep
    });
    let removed = before - items.len();
    if removed > 0 {
        trace!(target: "evmasm::optimiser", removed, "unused tags");
    }
    removed > 0
}
