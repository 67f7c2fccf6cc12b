//! Structured dump of an assembly tree for tooling.

use std::collections::BTreeMap;

use primitive_types::U256;
use serde_json::{Map, Value, json};

use crate::assembly::Assembly;
use crate::error::{AsmResult, AssemblyViolation};
use crate::item::{AssemblyItem, ItemKind, TagRef};

/// Index of every source name; items from unlisted sources report `-1`.
pub type SourceIndices = BTreeMap<String, usize>;

fn upper_hex(value: U256) -> String {
    format!("{value:X}")
}

fn lookup(table: &BTreeMap<U256, String>, key: U256) -> AsmResult<String> {
    table
        .get(&key)
        .cloned()
        .ok_or_else(|| AssemblyViolation::UnknownTableKey { key }.into())
}

fn entry(name: &str, item: &AssemblyItem, indices: &SourceIndices, value: Option<String>) -> Value {
    let location = item.location();
    let source = location
        .source_name()
        .and_then(|name| indices.get(name))
        .map_or(-1, |&index| index as i64);
    let mut object = Map::new();
    object.insert("name".into(), json!(name));
    object.insert("source".into(), json!(source));
    object.insert("begin".into(), json!(location.start));
    object.insert("end".into(), json!(location.end));
    if let Some(value) = value.filter(|value| !value.is_empty()) {
        object.insert("value".into(), json!(value));
    }
    let jump_type = item.jump_type().as_json_str();
    if !jump_type.is_empty() {
        object.insert("jumpType".into(), json!(jump_type));
    }
    Value::Object(object)
}

fn code_entries(assembly: &Assembly, item: &AssemblyItem, indices: &SourceIndices) -> AsmResult<Vec<Value>> {
    let one = |name: &str, value: Option<String>| vec![entry(name, item, indices, value)];
    let entries = match *item.kind() {
        ItemKind::Operation(instruction) => one(&instruction.name(), None),
        ItemKind::Push(value) => one("PUSH", Some(upper_hex(value))),
        ItemKind::PushString(key) => one("PUSH tag", Some(lookup(assembly.strings(), key)?)),
        ItemKind::PushTag(TagRef { tag: 0, .. }) => one("PUSH [ErrorTag]", None),
        ItemKind::PushTag(TagRef { sub: None, tag }) => one("PUSH [tag]", Some(tag.to_string())),
        ItemKind::PushTag(TagRef { sub: Some(sub), tag }) => one("PUSH [tag]", Some(format!("{sub}:{tag}"))),
        ItemKind::PushSub(sub) => one("PUSH [$]", Some(format!("{sub:064x}"))),
        ItemKind::PushSubSize(sub) => one("PUSH #[$]", Some(format!("{sub:064x}"))),
        ItemKind::PushProgramSize => one("PUSHSIZE", None),
        ItemKind::PushLibraryAddress(key) => one("PUSHLIB", Some(lookup(assembly.libraries(), key)?)),
        ItemKind::PushDeployTimeAddress => one("PUSHDEPLOYADDRESS", None),
        ItemKind::PushImmutable(key) => one("PUSHIMMUTABLE", Some(lookup(assembly.immutables(), key)?)),
        ItemKind::AssignImmutable(key) => one("ASSIGNIMMUTABLE", Some(lookup(assembly.immutables(), key)?)),
        ItemKind::Tag(tag) => vec![
            entry("tag", item, indices, Some(tag.to_string())),
            entry("JUMPDEST", item, indices, None),
        ],
        ItemKind::PushData(key) => one("PUSH data", Some(upper_hex(key))),
    };
    Ok(entries)
}

/// `.code`, `.data` (blobs and nested sub-assemblies) and `.auxdata` of `assembly`.
/// `.data` keys are unpadded uppercase hex, of the blob hash or of the sub index.
pub fn assembly_json(assembly: &Assembly, indices: &SourceIndices) -> AsmResult<Value> {
    let mut code = Vec::with_capacity(assembly.items().len());
    for item in assembly.items() {
        code.extend(code_entries(assembly, item, indices)?);
    }
    let mut root = Map::new();
    root.insert(".code".into(), Value::Array(code));

    if !assembly.data().is_empty() || !assembly.subs().is_empty() {
        let mut data = Map::new();
        for (key, blob) in assembly.data() {
            data.insert(upper_hex(*key), json!(hex::encode(blob)));
        }
        for (index, sub) in assembly.subs().iter().enumerate() {
            data.insert(format!("{index:X}"), assembly_json(sub, indices)?);
        }
        root.insert(".data".into(), Value::Object(data));
    }
    if !assembly.auxiliary_data().is_empty() {
        root.insert(".auxdata".into(), json!(hex::encode(assembly.auxiliary_data())));
    }
    Ok(Value::Object(root))
}

impl Assembly {
    pub fn assembly_json(&self, indices: &SourceIndices) -> AsmResult<Value> {
        assembly_json(self, indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;
    use crate::item::JumpType;
    use crate::location::SourceLocation;

    #[test]
    fn entries_carry_names_locations_and_jump_types() {
        let mut asm = Assembly::new();
        asm.set_source_location(SourceLocation::new("a.sol", 4, 10));
        asm.append_push(0xabu64).unwrap();
        let tag = asm.new_tag().unwrap();
        asm.append(tag.to_push_tag().unwrap()).unwrap();
        asm.append(Instruction::JUMP).unwrap().set_jump_type(JumpType::IntoFunction);
        asm.set_source_location(SourceLocation::unknown());
        asm.append(tag).unwrap();

        let mut indices = SourceIndices::new();
        indices.insert("a.sol".to_string(), 3);
        let value = asm.assembly_json(&indices).unwrap();
        let code = value[".code"].as_array().unwrap();
        assert_eq!(code.len(), 5);
        assert_eq!(code[0], json!({"name": "PUSH", "source": 3, "begin": 4, "end": 10, "value": "AB"}));
        assert_eq!(code[1]["name"], "PUSH [tag]");
        assert_eq!(code[1]["value"], "1");
        assert_eq!(code[2]["name"], "JUMP");
        assert_eq!(code[2]["jumpType"], "[in]");
        assert_eq!(code[3], json!({"name": "tag", "source": -1, "begin": -1, "end": -1, "value": "1"}));
        assert_eq!(code[4]["name"], "JUMPDEST");
        assert!(value.get(".data").is_none());
    }

    #[test]
    fn named_tables_resolve_to_their_names() {
        let mut asm = Assembly::new();
        asm.append_library_address("Math").unwrap();
        asm.append_immutable("owner").unwrap();
        let value = asm.assembly_json(&SourceIndices::new()).unwrap();
        assert_eq!(value[".code"][0]["name"], "PUSHLIB");
        assert_eq!(value[".code"][0]["value"], "Math");
        assert_eq!(value[".code"][1]["name"], "PUSHIMMUTABLE");
        assert_eq!(value[".code"][1]["value"], "owner");
    }

    #[test]
    fn data_holds_blobs_and_subs() {
        let mut sub = Assembly::new();
        sub.append(Instruction::STOP).unwrap();
        let mut asm = Assembly::new();
        let push = asm.new_sub(sub).unwrap();
        asm.append(push).unwrap();
        let data = asm.new_data(vec![0xde, 0xad]).unwrap();
        asm.append(data.clone()).unwrap();
        asm.append_auxiliary_data_to_end(&[0x01]).unwrap();

        let value = asm.assembly_json(&SourceIndices::new()).unwrap();
        let ItemKind::PushData(key) = *data.kind() else {
            panic!("data push expected");
        };
        assert_eq!(value[".data"][upper_hex(key)], "dead");
        assert_eq!(value[".data"]["0"][".code"][0]["name"], "STOP");
        assert_eq!(value[".code"][0]["name"], "PUSH [$]");
        assert_eq!(value[".code"][1]["name"], "PUSH data");
        assert_eq!(value[".auxdata"], "01");
    }

    #[test]
    fn data_keys_share_one_hex_case() {
        let mut asm = Assembly::new();
        for _ in 0..11 {
            let mut sub = Assembly::new();
            sub.append(Instruction::STOP).unwrap();
            asm.append_sub(sub).unwrap();
        }
        asm.new_data(vec![0xab; 4]).unwrap();

        let value = asm.assembly_json(&SourceIndices::new()).unwrap();
        let data = value[".data"].as_object().unwrap();
        assert_eq!(data.len(), 12);
        assert!(data.contains_key("A"));
        assert!(!data.contains_key("a"));
        assert!(data.keys().all(|key| !key.chars().any(|c| c.is_ascii_lowercase())));
    }
}
