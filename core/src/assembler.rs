//! Fixed-point byte layout and linking of an assembly tree.
//!
//! Reference widths depend on the final code size and the code size depends on
//! the reference widths. Layout therefore walks candidate widths upwards until
//! the size estimate fits, then emits every item once and patches the recorded
//! references after sub-programs, data and auxiliary bytes are appended.

use std::collections::BTreeMap;

use primitive_types::U256;
use tracing::{debug, trace};

use crate::assembly::Assembly;
use crate::error::{AsmResult, AssemblyViolation};
use crate::instruction::Instruction;
use crate::item::{ItemKind, TagRef};
use crate::linker::{ADDRESS_WIDTH, IMMUTABLE_WIDTH, LinkerObject};
use crate::util::{bytes_required, bytes_required_usize, to_compact_big_endian, write_big_endian};

/// Immutable slots a sub-program reads, with the names it registered them under.
#[derive(Default)]
struct SubImmutables {
    offsets: BTreeMap<U256, Vec<usize>>,
    names: BTreeMap<U256, String>,
}

impl Assembly {
    /// Assembles the tree, reusing the cached object of an earlier call.
    pub fn assemble(&mut self) -> AsmResult<&LinkerObject> {
        let object = match self.compiled.take() {
            Some(object) => object,
            None => self.link()?,
        };
        Ok(self.compiled.insert(object))
    }

    pub fn assembled(&self) -> Option<&LinkerObject> {
        self.compiled.as_ref()
    }

    /// Smallest reference width, at least `min_width`, for which the size
    /// estimate of the whole output fits in that width. Returns `(width, estimate)`.
    pub fn reference_width(&self, min_width: usize, appended: usize) -> (usize, usize) {
        let mut width = min_width.max(1);
        loop {
            let code: usize = self.items.iter().map(|item| item.bytes_required(width)).sum();
            let total = code + 1 + appended;
            if bytes_required_usize(total) <= width {
                return (width, total);
            }
            width += 1;
        }
    }

    fn link(&mut self) -> AsmResult<LinkerObject> {
        let mut appended = self.data.values().map(Vec::len).sum::<usize>() + self.auxiliary_data.len();
        let mut min_width = 1;
        let mut sub_immutables: Option<SubImmutables> = None;
        for sub in &mut self.subs {
            appended += sub.assemble()?.len();
            let Some(object) = &sub.compiled else {
                continue;
            };
            if !object.immutable_references.is_empty() {
                if sub_immutables.is_some() {
                    return Err(AssemblyViolation::MultipleSubsReferenceImmutables.into());
                }
                sub_immutables = Some(SubImmutables {
                    offsets: object.immutable_references.clone(),
                    names: sub.immutables.clone(),
                });
            }
            if let Some(&max) = sub.tag_positions.iter().flatten().max() {
                min_width = min_width.max(bytes_required_usize(max));
            }
        }
        let sub_immutables = sub_immutables.unwrap_or_default();

        let pushes = self.items.iter().any(|item| matches!(item.kind(), ItemKind::PushImmutable(_)));
        let assigns = self.items.iter().any(|item| matches!(item.kind(), ItemKind::AssignImmutable(_)));
        if assigns && pushes {
            return Err(AssemblyViolation::ImmutableReadWriteConflict.into());
        }
        for item in &mut self.items {
            let ItemKind::AssignImmutable(key) = *item.kind() else {
                continue;
            };
            // Reads may have been optimised away, but some sub must still declare the immutable.
            if !self.subs.iter().any(|sub| sub.immutables.contains_key(&key)) {
                let name = self.immutables.get(&key).cloned().unwrap_or_else(|| format!("0x{key:x}"));
                return Err(AssemblyViolation::ImmutableAssignedButNeverRead { name }.into());
            }
            item.set_immutable_occurrences(sub_immutables.offsets.get(&key).map_or(0, Vec::len));
        }

        let (width, estimate) = self.reference_width(min_width, appended);
        debug!(
            target: "evmasm::assembler",
            items = self.items.len(),
            subs = self.subs.len(),
            width,
            estimate,
            "layout"
        );

        let max_tag = self.items.iter().filter_map(|item| item.tag_id()).max().unwrap_or(0);
        self.tag_positions = vec![None; self.used_tags.max(max_tag + 1)];

        let mut object = LinkerObject::new(Vec::with_capacity(estimate));
        let mut tag_refs: Vec<(usize, TagRef)> = Vec::new();
        let mut data_refs: Vec<(usize, U256)> = Vec::new();
        let mut sub_refs: Vec<(usize, usize)> = Vec::new();
        let mut size_refs: Vec<usize> = Vec::new();
        let mut assigned: Vec<U256> = Vec::new();

        for item in &mut self.items {
            let code = &mut object.bytecode;
            if !item.is_tag() && self.tag_positions[0].is_none() {
                self.tag_positions[0] = Some(code.len());
            }
            let kind = *item.kind();
            match kind {
                ItemKind::Operation(instruction) => code.push(instruction.byte()),
                ItemKind::Push(value) => push_literal(code, value),
                ItemKind::PushString(key) => {
                    let text = self
                        .strings
                        .get(&key)
                        .ok_or(AssemblyViolation::UnknownTableKey { key })?;
                    code.push(Instruction::PUSH32.byte());
                    let mut slot = [0u8; 32];
                    let len = text.len().min(32);
                    slot[..len].copy_from_slice(&text.as_bytes()[..len]);
                    code.extend_from_slice(&slot);
                }
                ItemKind::PushTag(tag) => tag_refs.push((push_placeholder(code, width), tag)),
                ItemKind::PushData(key) => {
                    if !self.data.contains_key(&key) {
                        return Err(AssemblyViolation::UnknownDataKey { key }.into());
                    }
                    data_refs.push((push_placeholder(code, width), key));
                }
                ItemKind::PushSub(sub) => {
                    check_sub(sub, self.subs.len())?;
                    sub_refs.push((push_placeholder(code, width), sub));
                }
                ItemKind::PushSubSize(sub) => {
                    check_sub(sub, self.subs.len())?;
                    let size = self.subs[sub].compiled.as_ref().map_or(0, LinkerObject::len);
                    let value = U256::from(size as u64);
                    item.set_pushed_value(value);
                    push_literal(code, value);
                }
                ItemKind::PushProgramSize => size_refs.push(push_placeholder(code, width)),
                ItemKind::PushLibraryAddress(key) => {
                    let name = self
                        .libraries
                        .get(&key)
                        .ok_or(AssemblyViolation::UnknownTableKey { key })?;
                    let offset = push_placeholder(code, ADDRESS_WIDTH);
                    object.link_references.insert(offset, name.clone());
                }
                ItemKind::PushDeployTimeAddress => {
                    push_placeholder(code, ADDRESS_WIDTH);
                }
                ItemKind::PushImmutable(key) => {
                    let offset = push_placeholder(code, IMMUTABLE_WIDTH);
                    object.immutable_references.entry(key).or_default().push(offset);
                }
                ItemKind::AssignImmutable(key) => {
                    for &offset in sub_immutables.offsets.get(&key).into_iter().flatten() {
                        code.push(Instruction::DUP1.byte());
                        push_literal(code, U256::from(offset as u64));
                        code.push(Instruction::MSTORE.byte());
                    }
                    code.push(Instruction::POP.byte());
                    assigned.push(key);
                }
                ItemKind::Tag(tag) => {
                    if tag == 0 {
                        return Err(AssemblyViolation::InvalidTag.into());
                    }
                    if self.tag_positions[tag].is_some() {
                        return Err(AssemblyViolation::DuplicateTagPosition { tag }.into());
                    }
                    self.tag_positions[tag] = Some(code.len());
                    code.push(Instruction::JUMPDEST.byte());
                }
            }
        }

        if let Some((key, _)) = sub_immutables.offsets.iter().find(|(key, _)| !assigned.contains(key)) {
            let name = sub_immutables.names.get(key).cloned().unwrap_or_else(|| format!("0x{key:x}"));
            return Err(AssemblyViolation::ImmutableReadButNeverAssigned { name }.into());
        }

        if !self.subs.is_empty() || !self.data.is_empty() || !self.auxiliary_data.is_empty() {
            object.bytecode.push(Instruction::INVALID.byte());
        }

        for (idx, sub) in self.subs.iter().enumerate() {
            let start = object.len();
            for &(offset, _) in sub_refs.iter().filter(|(_, s)| *s == idx) {
                write_big_endian(U256::from(start as u64), &mut object.bytecode[offset..offset + width]);
            }
            if let Some(compiled) = &sub.compiled {
                object.append(compiled);
            }
        }

        for &(offset, tag) in &tag_refs {
            let positions = match tag.sub {
                None => &self.tag_positions,
                Some(sub) => {
                    check_sub(sub, self.subs.len())?;
                    &self.subs[sub].tag_positions
                }
            };
            let position = positions
                .get(tag.tag)
                .ok_or(AssemblyViolation::ReferenceToMissingTag { sub: tag.sub, tag: tag.tag })?
                .ok_or(AssemblyViolation::TagWithoutPosition { sub: tag.sub, tag: tag.tag })?;
            if bytes_required_usize(position) > width {
                return Err(AssemblyViolation::TagTooLarge { tag: tag.tag, position, width }.into());
            }
            write_big_endian(U256::from(position as u64), &mut object.bytecode[offset..offset + width]);
        }

        for (key, blob) in &self.data {
            let start = object.len();
            for &(offset, _) in data_refs.iter().filter(|(_, k)| k == key) {
                write_big_endian(U256::from(start as u64), &mut object.bytecode[offset..offset + width]);
            }
            trace!(target: "evmasm::assembler", key = %format!("{key:x}"), start, len = blob.len(), "data");
            object.bytecode.extend_from_slice(blob);
        }

        object.bytecode.extend_from_slice(&self.auxiliary_data);

        let total = U256::from(object.len() as u64);
        for &offset in &size_refs {
            write_big_endian(total, &mut object.bytecode[offset..offset + width]);
        }

        debug!(
            target: "evmasm::assembler",
            size = object.len(),
            estimate,
            libraries = object.link_references.len(),
            immutables = object.immutable_references.len(),
            "assembled"
        );
        Ok(object)
    }
}

fn check_sub(sub: usize, subs: usize) -> AsmResult<()> {
    if sub >= subs {
        return Err(AssemblyViolation::InvalidSubId { sub, subs }.into());
    }
    Ok(())
}

fn push_literal(code: &mut Vec<u8>, value: U256) {
    let width = bytes_required(value).max(1);
    code.push(Instruction::push(width).byte());
    code.extend_from_slice(&to_compact_big_endian(value, 1));
}

/// Emits `PUSH<width>` followed by `width` zero bytes and returns the offset of the immediate.
fn push_placeholder(code: &mut Vec<u8>, width: usize) -> usize {
    code.push(Instruction::push(width).byte());
    let offset = code.len();
    code.resize(offset + width, 0);
    offset
}
