//! Small shared helpers: fast hash containers and big-endian byte encoding.

pub mod bytes;

pub type FastHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

pub type FastHashSet<K> = rustc_hash::FxHashSet<K>;

#[inline]
pub fn fast_hash_map_new<K, V>() -> FastHashMap<K, V> {
    rustc_hash::FxHashMap::default()
}

#[inline]
pub fn fast_hash_set_new<K>() -> FastHashSet<K> {
    rustc_hash::FxHashSet::default()
}

pub use bytes::{bytes_required, bytes_required_usize, keccak256, to_compact_big_endian, write_big_endian};
