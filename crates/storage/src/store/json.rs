#![forbid(unsafe_code)]

use kb_core::{AttributeValue, ItemEvent, ObjectRef};
use serde_json::{Map, Value, json};

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn ref_to_json(reference: &ObjectRef) -> Value {
    let mut map = Map::new();
    map.insert("id".into(), Value::String(reference.id.as_str().to_string()));
    if let Some(type_name) = &reference.type_name {
        map.insert("type".into(), Value::String(type_name.as_str().to_string()));
    }
    if let Some(revision) = reference.revision {
        map.insert("revision".into(), json!(revision.as_i64()));
    }
    if let Some(branch) = reference.branch {
        map.insert("branch".into(), json!(branch.as_i64()));
    }
    Value::Object(map)
}

fn value_to_json(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::Long(v) => json!(v),
        AttributeValue::Double(v) => json!(v),
        AttributeValue::Text(v) => Value::String(v.clone()),
        AttributeValue::Clob(v) => json!({ "clob": v }),
        AttributeValue::Blob(v) => json!({ "blob": hex_string(v) }),
        AttributeValue::Ref(v) => json!({ "ref": ref_to_json(v) }),
    }
}

fn opt_value_to_json(value: &Option<AttributeValue>) -> Value {
    match value {
        Some(value) => value_to_json(value),
        None => Value::Null,
    }
}

/// Stable JSON rendering of one diff event, for logs and export files.
///
/// Binary payloads are hex-encoded; `null` stands for an absent old or new
/// value, never for a stored value.
pub fn event_to_json(event: &ItemEvent) -> Value {
    let object = event.object();
    let mut values = Map::new();
    for (attr, delta) in event.values() {
        values.insert(
            attr.as_str().to_string(),
            json!({
                "old": opt_value_to_json(&delta.old),
                "new": opt_value_to_json(&delta.new),
            }),
        );
    }
    json!({
        "kind": event.kind_name(),
        "object": {
            "branch": object.branch.as_i64(),
            "type": object.type_name.as_str(),
            "id": object.id.as_str(),
        },
        "values": Value::Object(values),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use kb_core::{
        AttributeName, BranchId, ItemChange, ObjectBranchId, ObjectId, TypeName, ValueDelta,
    };

    use super::*;

    #[test]
    fn deletion_renders_old_values_and_null_new() {
        let mut values = BTreeMap::new();
        values.insert(
            AttributeName::try_new("payload").expect("attr name"),
            ValueDelta::new(Some(AttributeValue::Blob(vec![0xde, 0xad])), None),
        );
        let change = ItemChange {
            object: ObjectBranchId {
                branch: BranchId::TRUNK,
                type_name: TypeName::try_new("doc").expect("type name"),
                id: ObjectId::try_new("x1").expect("object id"),
            },
            values,
        };
        let rendered = event_to_json(&ItemEvent::Deletion(change));
        assert_eq!(rendered["kind"], "deletion");
        assert_eq!(rendered["object"]["type"], "doc");
        assert_eq!(rendered["values"]["payload"]["old"]["blob"], "dead");
        assert!(rendered["values"]["payload"]["new"].is_null());
    }
}
