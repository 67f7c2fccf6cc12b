//! Assembly tree node: an item sequence plus the sub-programs, data and
//! identifier tables it owns.

use std::collections::BTreeMap;

use primitive_types::U256;

use crate::error::{AsmResult, AssemblyError, AssemblyViolation};
use crate::instruction::Instruction;
use crate::item::{AssemblyItem, AssemblyItems, ItemKind};
use crate::linker::LinkerObject;
use crate::location::SourceLocation;
use crate::util::{FastHashMap, fast_hash_map_new, keccak256};

#[derive(Debug, Clone)]
pub struct Assembly {
    pub(crate) items: AssemblyItems,
    pub(crate) subs: Vec<Assembly>,
    pub(crate) data: BTreeMap<U256, Vec<u8>>,
    pub(crate) strings: BTreeMap<U256, String>,
    pub(crate) libraries: BTreeMap<U256, String>,
    pub(crate) immutables: BTreeMap<U256, String>,
    named_tags: FastHashMap<String, usize>,
    pub(crate) auxiliary_data: Vec<u8>,
    /// Next free tag id; id 0 is the invalid jump destination.
    pub(crate) used_tags: usize,
    deposit: i64,
    current_location: SourceLocation,
    current_modifier_depth: usize,
    pub(crate) compiled: Option<LinkerObject>,
    pub(crate) tag_positions: Vec<Option<usize>>,
}

impl Default for Assembly {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembly {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            subs: Vec::new(),
            data: BTreeMap::new(),
            strings: BTreeMap::new(),
            libraries: BTreeMap::new(),
            immutables: BTreeMap::new(),
            named_tags: fast_hash_map_new(),
            auxiliary_data: Vec::new(),
            used_tags: 1,
            deposit: 0,
            current_location: SourceLocation::unknown(),
            current_modifier_depth: 0,
            compiled: None,
            tag_positions: Vec::new(),
        }
    }

    pub(crate) fn ensure_mutable(&self) -> AsmResult<()> {
        if self.compiled.is_some() {
            return Err(AssemblyViolation::AlreadyAssembled.into());
        }
        Ok(())
    }

    /// Appends an item, stamping the current location and modifier depth.
    ///
    /// Fails if the running stack height would drop below zero.
    pub fn append(&mut self, item: impl Into<AssemblyItem>) -> AsmResult<&mut AssemblyItem> {
        self.ensure_mutable()?;
        let mut item = item.into();
        let deposit = self.deposit + item.deposit();
        if deposit < 0 {
            return Err(AssemblyError::StackUnderflow {
                deposit: self.deposit,
                item: item.to_assembly_text(),
            });
        }
        self.deposit = deposit;
        if !item.location().is_valid() && self.current_location.is_valid() {
            item.set_location(self.current_location.clone());
        }
        item.set_modifier_depth(self.current_modifier_depth);
        let idx = self.items.len();
        self.items.push(item);
        Ok(&mut self.items[idx])
    }

    pub fn append_push(&mut self, value: impl Into<U256>) -> AsmResult<&mut AssemblyItem> {
        self.append(AssemblyItem::push(value))
    }

    fn next_tag_id(&mut self) -> AsmResult<usize> {
        self.ensure_mutable()?;
        let id = self.used_tags;
        self.used_tags += 1;
        Ok(id)
    }

    pub fn new_tag(&mut self) -> AsmResult<AssemblyItem> {
        Ok(AssemblyItem::tag(self.next_tag_id()?))
    }

    pub fn new_push_tag(&mut self) -> AsmResult<AssemblyItem> {
        Ok(AssemblyItem::push_tag(self.next_tag_id()?))
    }

    /// Tag registered under `name`; repeated calls return the same id.
    pub fn named_tag(&mut self, name: &str) -> AsmResult<AssemblyItem> {
        self.ensure_mutable()?;
        if name.is_empty() {
            return Err(AssemblyViolation::EmptyTagName.into());
        }
        if let Some(&id) = self.named_tags.get(name) {
            return Ok(AssemblyItem::tag(id));
        }
        let id = self.next_tag_id()?;
        self.named_tags.insert(name.to_string(), id);
        Ok(AssemblyItem::tag(id))
    }

    pub fn named_tag_id(&self, name: &str) -> Option<usize> {
        self.named_tags.get(name).copied()
    }

    /// Registers a data blob keyed by its hash and returns a push of its offset.
    pub fn new_data(&mut self, bytes: Vec<u8>) -> AsmResult<AssemblyItem> {
        self.ensure_mutable()?;
        let key = keccak256(&bytes);
        self.data.insert(key, bytes);
        Ok(AssemblyItem::new(ItemKind::PushData(key)))
    }

    pub fn new_push_string(&mut self, value: &str) -> AsmResult<AssemblyItem> {
        self.ensure_mutable()?;
        let key = keccak256(value.as_bytes());
        self.strings.insert(key, value.to_string());
        Ok(AssemblyItem::new(ItemKind::PushString(key)))
    }

    /// Takes ownership of `sub` and returns its index.
    pub fn append_sub(&mut self, sub: Assembly) -> AsmResult<usize> {
        self.ensure_mutable()?;
        self.subs.push(sub);
        Ok(self.subs.len() - 1)
    }

    /// Takes ownership of `sub` and returns a push of its offset.
    pub fn new_sub(&mut self, sub: Assembly) -> AsmResult<AssemblyItem> {
        let idx = self.append_sub(sub)?;
        Ok(AssemblyItem::new(ItemKind::PushSub(idx)))
    }

    pub fn new_push_sub_size(&self, sub: usize) -> AssemblyItem {
        AssemblyItem::new(ItemKind::PushSubSize(sub))
    }

    pub fn new_push_library_address(&mut self, name: &str) -> AsmResult<AssemblyItem> {
        self.ensure_mutable()?;
        let key = register(&mut self.libraries, name);
        Ok(AssemblyItem::new(ItemKind::PushLibraryAddress(key)))
    }

    pub fn new_push_immutable(&mut self, name: &str) -> AsmResult<AssemblyItem> {
        self.ensure_mutable()?;
        let key = register(&mut self.immutables, name);
        Ok(AssemblyItem::new(ItemKind::PushImmutable(key)))
    }

    pub fn new_immutable_assignment(&mut self, name: &str) -> AsmResult<AssemblyItem> {
        self.ensure_mutable()?;
        let key = register(&mut self.immutables, name);
        Ok(AssemblyItem::new(ItemKind::AssignImmutable(key)))
    }

    pub fn append_program_size(&mut self) -> AsmResult<&mut AssemblyItem> {
        self.append(AssemblyItem::new(ItemKind::PushProgramSize))
    }

    pub fn append_library_address(&mut self, name: &str) -> AsmResult<&mut AssemblyItem> {
        let item = self.new_push_library_address(name)?;
        self.append(item)
    }

    pub fn append_immutable(&mut self, name: &str) -> AsmResult<&mut AssemblyItem> {
        let item = self.new_push_immutable(name)?;
        self.append(item)
    }

    pub fn append_immutable_assignment(&mut self, name: &str) -> AsmResult<&mut AssemblyItem> {
        let item = self.new_immutable_assignment(name)?;
        self.append(item)
    }

    pub fn append_deploy_time_address(&mut self) -> AsmResult<&mut AssemblyItem> {
        self.append(AssemblyItem::new(ItemKind::PushDeployTimeAddress))
    }

    /// `PUSH [tag] JUMP`; `tag` is a `Tag` or `PushTag` item.
    pub fn append_jump(&mut self, tag: &AssemblyItem) -> AsmResult<&mut AssemblyItem> {
        self.append(push_of(tag))?;
        self.append(Instruction::JUMP)
    }

    pub fn append_jumpi(&mut self, tag: &AssemblyItem) -> AsmResult<&mut AssemblyItem> {
        self.append(push_of(tag))?;
        self.append(Instruction::JUMPI)
    }

    /// Inserts `item` before every other item, without stack bookkeeping.
    pub fn inject_start(&mut self, item: AssemblyItem) -> AsmResult<()> {
        self.ensure_mutable()?;
        self.items.insert(0, item);
        Ok(())
    }

    pub fn append_auxiliary_data_to_end(&mut self, bytes: &[u8]) -> AsmResult<()> {
        self.ensure_mutable()?;
        self.auxiliary_data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn set_source_location(&mut self, location: SourceLocation) {
        self.current_location = location;
    }

    pub fn current_source_location(&self) -> &SourceLocation {
        &self.current_location
    }

    pub fn set_modifier_depth(&mut self, depth: usize) {
        self.current_modifier_depth = depth;
    }

    #[inline]
    pub fn deposit(&self) -> i64 {
        self.deposit
    }

    pub fn adjust_deposit(&mut self, adjustment: i64) {
        self.deposit += adjustment;
    }

    pub fn set_deposit(&mut self, deposit: i64) {
        self.deposit = deposit;
    }

    #[inline]
    pub fn items(&self) -> &[AssemblyItem] {
        &self.items
    }

    #[inline]
    pub fn subs(&self) -> &[Assembly] {
        &self.subs
    }

    pub fn sub(&self, idx: usize) -> Option<&Assembly> {
        self.subs.get(idx)
    }

    pub fn sub_mut(&mut self, idx: usize) -> Option<&mut Assembly> {
        self.subs.get_mut(idx)
    }

    #[inline]
    pub fn num_subs(&self) -> usize {
        self.subs.len()
    }

    pub fn data(&self) -> &BTreeMap<U256, Vec<u8>> {
        &self.data
    }

    pub fn strings(&self) -> &BTreeMap<U256, String> {
        &self.strings
    }

    pub fn libraries(&self) -> &BTreeMap<U256, String> {
        &self.libraries
    }

    pub fn immutables(&self) -> &BTreeMap<U256, String> {
        &self.immutables
    }

    pub fn auxiliary_data(&self) -> &[u8] {
        &self.auxiliary_data
    }

    #[inline]
    pub fn is_assembled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Byte offset of every tag id after `assemble()`; index 0 is the invalid jump destination.
    pub fn tag_positions(&self) -> &[Option<usize>] {
        &self.tag_positions
    }
}

fn register(table: &mut BTreeMap<U256, String>, name: &str) -> U256 {
    let key = keccak256(name.as_bytes());
    table.entry(key).or_insert_with(|| name.to_string());
    key
}

fn push_of(tag: &AssemblyItem) -> AssemblyItem {
    tag.to_push_tag().unwrap_or_else(|| tag.clone())
}
