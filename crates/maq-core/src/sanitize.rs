use serde_json::Value;

/// Recursively removes null-valued members from JSON objects. The remote
/// document store cannot represent "no value" as a first-class value, so
/// absence of the key is used instead. Array elements are recursed into but
/// never removed, to keep positional data intact.
pub fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, member)| !member.is_null())
                .map(|(key, member)| (key, strip_nulls(member)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(strip_nulls).collect()),
        other => other,
    }
}
