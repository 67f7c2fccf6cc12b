//! Assembled bytecode plus the references a deploy-time linker still has to patch.

use std::collections::BTreeMap;

use primitive_types::U256;
use serde::ser::{Serialize, SerializeStruct, Serializer};

use crate::util::{keccak256, write_big_endian};

pub const ADDRESS_WIDTH: usize = 20;
pub const IMMUTABLE_WIDTH: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkerObject {
    pub bytecode: Vec<u8>,
    /// Byte offset of every unresolved 20-byte library address slot.
    pub link_references: BTreeMap<usize, String>,
    /// Offsets of the 32-byte slots to patch per immutable key.
    pub immutable_references: BTreeMap<U256, Vec<usize>>,
}

impl LinkerObject {
    pub fn new(bytecode: Vec<u8>) -> Self {
        Self {
            bytecode,
            ..Self::default()
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytecode.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytecode.is_empty()
    }

    /// Appends `other`, shifting its library references by the current length.
    pub fn append(&mut self, other: &LinkerObject) {
        let base = self.bytecode.len();
        for (offset, name) in &other.link_references {
            self.link_references.insert(base + offset, name.clone());
        }
        self.bytecode.extend_from_slice(&other.bytecode);
    }

    /// Writes known library addresses into their slots and drops the resolved references.
    pub fn link(&mut self, libraries: &BTreeMap<String, [u8; ADDRESS_WIDTH]>) {
        let bytecode = &mut self.bytecode;
        self.link_references.retain(|&offset, name| match libraries.get(name.as_str()) {
            Some(address) if offset + ADDRESS_WIDTH <= bytecode.len() => {
                bytecode[offset..offset + ADDRESS_WIDTH].copy_from_slice(address);
                false
            }
            _ => true,
        });
    }

    /// Overwrites every slot of immutable `key` with `value`; returns the number of patched slots.
    pub fn patch_immutable(&mut self, key: U256, value: U256) -> usize {
        let Some(offsets) = self.immutable_references.get(&key) else {
            return 0;
        };
        let mut patched = 0;
        for &offset in offsets {
            if let Some(slot) = self.bytecode.get_mut(offset..offset + IMMUTABLE_WIDTH) {
                write_big_endian(value, slot);
                patched += 1;
            }
        }
        patched
    }

    /// Hex rendering with `__$<hash>$__` placeholders in unresolved library slots.
    pub fn to_hex(&self) -> String {
        let mut out = hex::encode(&self.bytecode);
        for (&offset, name) in &self.link_references {
            let start = offset * 2;
            let end = start + ADDRESS_WIDTH * 2;
            if end <= out.len() {
                out.replace_range(start..end, &library_placeholder(name));
            }
        }
        out
    }
}

/// 40-character marker for a library address slot, derived from the library name.
pub fn library_placeholder(name: &str) -> String {
    let hash = hex::encode(keccak256(name.as_bytes()).to_big_endian());
    format!("__${}$__", &hash[..34])
}

impl Serialize for LinkerObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let links: BTreeMap<String, &str> = self
            .link_references
            .iter()
            .map(|(offset, name)| (offset.to_string(), name.as_str()))
            .collect();
        let immutables: BTreeMap<String, &Vec<usize>> = self
            .immutable_references
            .iter()
            .map(|(key, offsets)| (format!("0x{}", hex::encode(key.to_big_endian())), offsets))
            .collect();
        let mut state = serializer.serialize_struct("LinkerObject", 3)?;
        state.serialize_field("bytecode", &self.to_hex())?;
        state.serialize_field("linkReferences", &links)?;
        state.serialize_field("immutableReferences", &immutables)?;
        state.end()
    }
}
