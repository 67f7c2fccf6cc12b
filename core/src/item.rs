//! The atomic IR unit: one operation, push, or jump target.

use std::fmt;

use primitive_types::U256;

use crate::instruction::Instruction;
use crate::location::SourceLocation;
use crate::util::bytes_required;

/// Reference to a tag, optionally living in a direct sub-assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagRef {
    pub sub: Option<usize>,
    pub tag: usize,
}

impl TagRef {
    pub const fn local(tag: usize) -> Self {
        Self { sub: None, tag }
    }

    pub const fn foreign(sub: usize, tag: usize) -> Self {
        Self { sub: Some(sub), tag }
    }

    /// 256-bit payload view: the sub id (plus one) lives above bit 64.
    pub fn payload(self) -> U256 {
        let sub = self.sub.map(|s| s as u64 + 1).unwrap_or(0);
        (U256::from(sub) << 64) | U256::from(self.tag as u64)
    }

    pub fn from_payload(payload: U256) -> Self {
        let tag = payload.low_u64() as usize;
        let sub = (payload >> 64).low_u64();
        Self {
            sub: sub.checked_sub(1).map(|s| s as usize),
            tag,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Operation(Instruction),
    Push(U256),
    /// Key into the string table; pushed as a 32-byte literal.
    PushString(U256),
    PushTag(TagRef),
    /// Byte offset of a sub-assembly inside this assembly's output.
    PushSub(usize),
    PushSubSize(usize),
    PushProgramSize,
    PushLibraryAddress(U256),
    PushDeployTimeAddress,
    PushImmutable(U256),
    AssignImmutable(U256),
    Tag(usize),
    PushData(U256),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JumpType {
    #[default]
    Ordinary,
    IntoFunction,
    OutOfFunction,
}

impl JumpType {
    pub fn as_json_str(self) -> &'static str {
        match self {
            JumpType::Ordinary => "",
            JumpType::IntoFunction => "[in]",
            JumpType::OutOfFunction => "[out]",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssemblyItem {
    kind: ItemKind,
    location: SourceLocation,
    jump_type: JumpType,
    modifier_depth: usize,
    pushed_value: Option<U256>,
    immutable_occurrences: Option<usize>,
}

/// Items compare by what they encode, not where they came from.
impl PartialEq for AssemblyItem {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for AssemblyItem {}

impl From<Instruction> for AssemblyItem {
    fn from(value: Instruction) -> Self {
        AssemblyItem::operation(value)
    }
}

impl AssemblyItem {
    pub fn new(kind: ItemKind) -> Self {
        Self {
            kind,
            location: SourceLocation::unknown(),
            jump_type: JumpType::Ordinary,
            modifier_depth: 0,
            pushed_value: None,
            immutable_occurrences: None,
        }
    }

    pub fn operation(instruction: Instruction) -> Self {
        Self::new(ItemKind::Operation(instruction))
    }

    pub fn push(value: impl Into<U256>) -> Self {
        Self::new(ItemKind::Push(value.into()))
    }

    pub fn tag(id: usize) -> Self {
        Self::new(ItemKind::Tag(id))
    }

    pub fn push_tag(id: usize) -> Self {
        Self::new(ItemKind::PushTag(TagRef::local(id)))
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = location;
        self
    }

    pub fn with_jump_type(mut self, jump_type: JumpType) -> Self {
        self.jump_type = jump_type;
        self
    }

    #[inline]
    pub fn kind(&self) -> &ItemKind {
        &self.kind
    }

    #[inline]
    pub fn kind_mut(&mut self) -> &mut ItemKind {
        &mut self.kind
    }

    pub fn instruction(&self) -> Option<Instruction> {
        match self.kind {
            ItemKind::Operation(i) => Some(i),
            _ => None,
        }
    }

    #[inline]
    pub fn is_operation(&self, instruction: Instruction) -> bool {
        self.kind == ItemKind::Operation(instruction)
    }

    pub fn is_tag(&self) -> bool {
        matches!(self.kind, ItemKind::Tag(_))
    }

    /// Tag id of a `Tag` item.
    pub fn tag_id(&self) -> Option<usize> {
        match self.kind {
            ItemKind::Tag(id) => Some(id),
            _ => None,
        }
    }

    pub fn tag_ref(&self) -> Option<TagRef> {
        match self.kind {
            ItemKind::PushTag(r) => Some(r),
            _ => None,
        }
    }

    /// `PushTag` referring to this `Tag`.
    pub fn to_push_tag(&self) -> Option<AssemblyItem> {
        self.tag_id()
            .map(|id| AssemblyItem::push_tag(id).with_location(self.location.clone()))
    }

    /// Turns a local tag or push-tag into a push of that tag as seen from the parent of `sub`.
    pub fn to_sub_assembly_tag(&self, sub: usize) -> Option<AssemblyItem> {
        let tag = match self.kind {
            ItemKind::Tag(id) => id,
            ItemKind::PushTag(TagRef { sub: None, tag }) => tag,
            _ => return None,
        };
        Some(AssemblyItem::new(ItemKind::PushTag(TagRef::foreign(sub, tag))).with_location(self.location.clone()))
    }

    #[inline]
    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    pub fn set_location(&mut self, location: SourceLocation) {
        self.location = location;
    }

    #[inline]
    pub fn jump_type(&self) -> JumpType {
        self.jump_type
    }

    pub fn set_jump_type(&mut self, jump_type: JumpType) {
        self.jump_type = jump_type;
    }

    #[inline]
    pub fn modifier_depth(&self) -> usize {
        self.modifier_depth
    }

    pub fn set_modifier_depth(&mut self, depth: usize) {
        self.modifier_depth = depth;
    }

    /// Value a sub-size push resolved to, once known.
    pub fn pushed_value(&self) -> Option<U256> {
        self.pushed_value
    }

    pub fn set_pushed_value(&mut self, value: U256) {
        self.pushed_value = Some(value);
    }

    pub fn immutable_occurrences(&self) -> Option<usize> {
        self.immutable_occurrences
    }

    pub fn set_immutable_occurrences(&mut self, occurrences: usize) {
        self.immutable_occurrences = Some(occurrences);
    }

    pub fn arguments(&self) -> usize {
        match self.kind {
            ItemKind::Operation(i) => i.info().map(|info| info.args).unwrap_or(0),
            ItemKind::AssignImmutable(_) => 1,
            _ => 0,
        }
    }

    pub fn return_values(&self) -> usize {
        match self.kind {
            ItemKind::Operation(i) => i.info().map(|info| info.ret).unwrap_or(0),
            ItemKind::Tag(_) | ItemKind::AssignImmutable(_) => 0,
            _ => 1,
        }
    }

    /// Net stack height change.
    pub fn deposit(&self) -> i64 {
        self.return_values() as i64 - self.arguments() as i64
    }

    /// Can be shown as a nested call expression by the text printer.
    pub fn can_be_functional(&self) -> bool {
        if self.jump_type != JumpType::Ordinary {
            return false;
        }
        match self.kind {
            ItemKind::Operation(i) => !i.is_dup() && !i.is_swap(),
            ItemKind::Push(_)
            | ItemKind::PushString(_)
            | ItemKind::PushTag(_)
            | ItemKind::PushData(_)
            | ItemKind::PushSub(_)
            | ItemKind::PushSubSize(_)
            | ItemKind::PushProgramSize
            | ItemKind::PushLibraryAddress(_)
            | ItemKind::PushImmutable(_) => true,
            ItemKind::Tag(_) | ItemKind::PushDeployTimeAddress | ItemKind::AssignImmutable(_) => false,
        }
    }

    /// Upper bound of the encoded size given the width reserved for tag and data references.
    pub fn bytes_required(&self, tag_width: usize) -> usize {
        match self.kind {
            ItemKind::Operation(_) | ItemKind::Tag(_) => 1,
            ItemKind::Push(value) => 1 + bytes_required(value).max(1),
            ItemKind::PushString(_) | ItemKind::PushImmutable(_) => 1 + 32,
            ItemKind::PushTag(_) | ItemKind::PushData(_) | ItemKind::PushSub(_) | ItemKind::PushProgramSize => {
                1 + tag_width
            }
            ItemKind::PushSubSize(_) => 1 + 4,
            ItemKind::PushLibraryAddress(_) | ItemKind::PushDeployTimeAddress => 1 + 20,
            // DUP1 PUSHn <offset> MSTORE per occurrence, then POP.
            ItemKind::AssignImmutable(_) => 1 + (3 + 32) * self.immutable_occurrences.unwrap_or(0),
        }
    }

    pub fn to_assembly_text(&self) -> String {
        let mut text = match &self.kind {
            ItemKind::Operation(i) => i.name().to_ascii_lowercase(),
            ItemKind::Push(value) => format!("0x{}", hex::encode(crate::util::to_compact_big_endian(*value, 1))),
            ItemKind::PushString(key) | ItemKind::PushData(key) => format!("data_{key:x}"),
            ItemKind::PushTag(TagRef { sub: None, tag }) => format!("tag_{tag}"),
            ItemKind::PushTag(TagRef { sub: Some(sub), tag }) => format!("tag_{sub}_{tag}"),
            ItemKind::Tag(tag) => format!("tag_{tag}:"),
            ItemKind::PushSub(sub) => format!("dataOffset(sub_{sub})"),
            ItemKind::PushSubSize(sub) => format!("dataSize(sub_{sub})"),
            ItemKind::PushProgramSize => "bytecodeSize".to_string(),
            ItemKind::PushLibraryAddress(key) => format!("linkerSymbol(\"{key:x}\")"),
            ItemKind::PushDeployTimeAddress => "deployTimeAddress()".to_string(),
            ItemKind::PushImmutable(key) => format!("immutable(\"0x{}\")", hex::encode(key.to_big_endian())),
            ItemKind::AssignImmutable(key) => {
                format!("assignImmutable(\"0x{}\")", hex::encode(key.to_big_endian()))
            }
        };
        match self.jump_type {
            JumpType::Ordinary => {}
            JumpType::IntoFunction => text.push_str("\t// in"),
            JumpType::OutOfFunction => text.push_str("\t// out"),
        }
        text
    }
}

impl fmt::Display for AssemblyItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_assembly_text())
    }
}

pub type AssemblyItems = Vec<AssemblyItem>;
