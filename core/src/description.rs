//! JSON description of an assembly tree, built through the regular builder API.
//!
//! ```json
//! {
//!   "code": [
//!     {"kind": "push", "value": "0x2a"},
//!     {"kind": "pushTag", "name": "end"},
//!     {"kind": "op", "name": "JUMP", "jumpType": "in"},
//!     {"kind": "tag", "name": "end", "source": "a.sol", "begin": 0, "end": 4},
//!     {"kind": "op", "name": "STOP"}
//!   ],
//!   "data": {"blob": "cafe"},
//!   "subs": [],
//!   "auxdata": "a165"
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, ensure};
use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::assembly::Assembly;
use crate::instruction::Instruction;
use crate::item::{AssemblyItem, ItemKind, JumpType};
use crate::location::SourceLocation;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyDescription {
    pub code: Vec<ItemDescription>,
    /// Hex blobs by name; `pushData` items refer to them by that name.
    pub data: BTreeMap<String, String>,
    pub subs: Vec<AssemblyDescription>,
    pub auxdata: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDescription {
    #[serde(flatten)]
    pub kind: ItemKindDescription,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jump_type: Option<JumpTypeDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ItemKindDescription {
    Op {
        name: String,
    },
    /// Decimal, or hex with a `0x` prefix.
    Push {
        value: String,
    },
    Tag {
        name: String,
    },
    /// With `sub`, the named tag of that sub-assembly.
    PushTag {
        name: String,
        #[serde(default)]
        sub: Option<usize>,
    },
    PushData {
        name: String,
    },
    PushSub {
        sub: usize,
    },
    PushSubSize {
        sub: usize,
    },
    PushProgramSize,
    PushLibrary {
        name: String,
    },
    PushDeployAddress,
    PushImmutable {
        name: String,
    },
    AssignImmutable {
        name: String,
    },
    PushString {
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JumpTypeDescription {
    Ordinary,
    In,
    Out,
}

impl From<JumpTypeDescription> for JumpType {
    fn from(value: JumpTypeDescription) -> Self {
        match value {
            JumpTypeDescription::Ordinary => JumpType::Ordinary,
            JumpTypeDescription::In => JumpType::IntoFunction,
            JumpTypeDescription::Out => JumpType::OutOfFunction,
        }
    }
}

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits = text.trim().trim_start_matches("0x");
    hex::decode(digits).with_context(|| format!("invalid hex '{text}'"))
}

fn parse_number(text: &str) -> Result<U256> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x") {
        Some(digits) => U256::from_str_radix(digits, 16).ok(),
        None => U256::from_dec_str(text).ok(),
    };
    parsed.ok_or_else(|| anyhow!("invalid number '{text}'"))
}

impl AssemblyDescription {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("failed to parse assembly description")
    }

    /// Builds the tree; sub-assemblies are built before the code that refers to them.
    pub fn build(&self) -> Result<Assembly> {
        let mut assembly = Assembly::new();
        for (index, sub) in self.subs.iter().enumerate() {
            let built = sub.build().with_context(|| format!("in sub-assembly {index}"))?;
            assembly.append_sub(built)?;
        }
        let mut data = BTreeMap::new();
        for (name, blob) in &self.data {
            let bytes = parse_hex(blob).with_context(|| format!("data '{name}'"))?;
            data.insert(name.as_str(), assembly.new_data(bytes)?);
        }
        for (index, item) in self.code.iter().enumerate() {
            item.append_to(&mut assembly, &data)
                .with_context(|| format!("code item {index}"))?;
        }
        if let Some(auxdata) = &self.auxdata {
            assembly.append_auxiliary_data_to_end(&parse_hex(auxdata).context("auxdata")?)?;
        }
        Ok(assembly)
    }
}

impl ItemDescription {
    fn location(&self) -> Option<SourceLocation> {
        if self.source.is_none() && self.begin.is_none() && self.end.is_none() {
            return None;
        }
        Some(SourceLocation {
            source: self.source.as_deref().map(Arc::from),
            start: self.begin.map_or(-1, |b| b as i64),
            end: self.end.map_or(-1, |e| e as i64),
        })
    }

    fn to_item(&self, assembly: &mut Assembly, data: &BTreeMap<&str, AssemblyItem>) -> Result<AssemblyItem> {
        let item = match &self.kind {
            ItemKindDescription::Op { name } => {
                let instruction =
                    Instruction::from_name(name).ok_or_else(|| anyhow!("unknown instruction '{name}'"))?;
                ensure!(!instruction.is_push(), "'{name}' needs an immediate; use a push item");
                AssemblyItem::operation(instruction)
            }
            ItemKindDescription::Push { value } => AssemblyItem::push(parse_number(value)?),
            ItemKindDescription::Tag { name } => assembly.named_tag(name)?,
            ItemKindDescription::PushTag { name, sub: None } => {
                let tag = assembly.named_tag(name)?;
                tag.to_push_tag().ok_or_else(|| anyhow!("'{name}' is not a tag"))?
            }
            ItemKindDescription::PushTag { name, sub: Some(sub) } => {
                let child = assembly
                    .sub(*sub)
                    .ok_or_else(|| anyhow!("no sub-assembly {sub}"))?;
                let id = child
                    .named_tag_id(name)
                    .ok_or_else(|| anyhow!("sub-assembly {sub} has no tag named '{name}'"))?;
                AssemblyItem::tag(id)
                    .to_sub_assembly_tag(*sub)
                    .ok_or_else(|| anyhow!("'{name}' is not a tag"))?
            }
            ItemKindDescription::PushData { name } => data
                .get(name.as_str())
                .cloned()
                .ok_or_else(|| anyhow!("no data named '{name}'"))?,
            ItemKindDescription::PushSub { sub } => {
                ensure!(*sub < assembly.num_subs(), "no sub-assembly {sub}");
                AssemblyItem::new(ItemKind::PushSub(*sub))
            }
            ItemKindDescription::PushSubSize { sub } => {
                ensure!(*sub < assembly.num_subs(), "no sub-assembly {sub}");
                assembly.new_push_sub_size(*sub)
            }
            ItemKindDescription::PushProgramSize => AssemblyItem::new(ItemKind::PushProgramSize),
            ItemKindDescription::PushLibrary { name } => assembly.new_push_library_address(name)?,
            ItemKindDescription::PushDeployAddress => AssemblyItem::new(ItemKind::PushDeployTimeAddress),
            ItemKindDescription::PushImmutable { name } => assembly.new_push_immutable(name)?,
            ItemKindDescription::AssignImmutable { name } => assembly.new_immutable_assignment(name)?,
            ItemKindDescription::PushString { value } => assembly.new_push_string(value)?,
        };
        Ok(item)
    }

    fn append_to(&self, assembly: &mut Assembly, data: &BTreeMap<&str, AssemblyItem>) -> Result<()> {
        if let Some(location) = self.location() {
            assembly.set_source_location(location);
        }
        let item = self.to_item(assembly, data)?;
        let appended = assembly.append(item)?;
        if let Some(jump_type) = self.jump_type {
            appended.set_jump_type(jump_type.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: &str = r#"{
        "code": [
            {"kind": "push", "value": "0x2a"},
            {"kind": "pushTag", "name": "end"},
            {"kind": "op", "name": "jump", "jumpType": "in"},
            {"kind": "tag", "name": "end", "source": "a.sol", "begin": 0, "end": 4},
            {"kind": "pushData", "name": "blob"},
            {"kind": "op", "name": "STOP"}
        ],
        "data": {"blob": "cafe"},
        "auxdata": "0xa165"
    }"#;

    #[test]
    fn builds_named_tags_data_and_locations() {
        let assembly = AssemblyDescription::from_json(PROGRAM).unwrap().build().unwrap();
        let items = assembly.items();
        assert_eq!(items.len(), 6);
        assert_eq!(items[0], AssemblyItem::push(0x2au64));
        assert_eq!(items[1], AssemblyItem::push_tag(1));
        assert_eq!(items[2].jump_type(), JumpType::IntoFunction);
        assert_eq!(items[3], AssemblyItem::tag(1));
        assert_eq!(items[3].location(), &SourceLocation::new("a.sol", 0, 4));
        assert!(items[4].location().is_valid());
        assert_eq!(assembly.data().len(), 1);
        assert_eq!(assembly.auxiliary_data(), &[0xa1, 0x65]);
    }

    #[test]
    fn foreign_tags_resolve_by_name() {
        let json = r#"{
            "subs": [{"code": [{"kind": "tag", "name": "entry"}, {"kind": "op", "name": "STOP"}]}],
            "code": [
                {"kind": "pushTag", "name": "entry", "sub": 0},
                {"kind": "pushSubSize", "sub": 0},
                {"kind": "op", "name": "STOP"}
            ]
        }"#;
        let assembly = AssemblyDescription::from_json(json).unwrap().build().unwrap();
        assert_eq!(
            assembly.items()[0].kind(),
            &ItemKind::PushTag(crate::item::TagRef::foreign(0, 1))
        );
        assert_eq!(assembly.num_subs(), 1);
    }

    #[test]
    fn errors_name_the_offending_item() {
        let json = r#"{"code": [{"kind": "op", "name": "ADD"}]}"#;
        let err = AssemblyDescription::from_json(json).unwrap().build().unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("code item 0"), "{message}");
        assert!(message.contains("stack underflow"), "{message}");

        let json = r#"{"code": [{"kind": "op", "name": "PUSH1"}]}"#;
        let err = AssemblyDescription::from_json(json).unwrap().build().unwrap_err();
        assert!(format!("{err:#}").contains("use a push item"));

        let json = r#"{"code": [{"kind": "pushTag", "name": "x", "sub": 3}]}"#;
        let err = AssemblyDescription::from_json(json).unwrap().build().unwrap_err();
        assert!(format!("{err:#}").contains("no sub-assembly 3"));
    }
}
