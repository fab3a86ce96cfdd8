use serde_json::Value;

pub const ADVICE_FALLBACK: &str = "Coach is analyzing…";
const MAX_DEPTH: usize = 4;

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn normalize_at(payload: &Value, depth: usize) -> String {
    if depth > MAX_DEPTH {
        return ADVICE_FALLBACK.to_string();
    }
    match payload {
        Value::String(text) => text.clone(),
        Value::Null => ADVICE_FALLBACK.to_string(),
        Value::Object(map) => {
            for key in ["advice", "recommendation"] {
                if let Some(field) = map.get(key).filter(|field| is_truthy(field)) {
                    return normalize_at(field, depth + 1);
                }
            }
            serialize_or_fallback(payload)
        }
        other => serialize_or_fallback(other),
    }
}

fn serialize_or_fallback(payload: &Value) -> String {
    serde_json::to_string(payload).unwrap_or_else(|_| ADVICE_FALLBACK.to_string())
}

/// Extracts a readable coaching string from an `affina_advice` payload.
///
/// Never fails: shapes it cannot make sense of resolve to [`ADVICE_FALLBACK`].
pub fn normalize_advice(payload: &Value) -> String {
    normalize_at(payload, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_string_is_verbatim() {
        assert_eq!(normalize_advice(&json!("hello")), "hello");
    }

    #[test]
    fn advice_field_wins_over_recommendation() {
        assert_eq!(normalize_advice(&json!({"advice": "x"})), "x");
        assert_eq!(
            normalize_advice(&json!({"advice": "x", "recommendation": "y"})),
            "x"
        );
        assert_eq!(normalize_advice(&json!({"recommendation": "y"})), "y");
    }

    #[test]
    fn empty_advice_falls_through_to_recommendation() {
        assert_eq!(
            normalize_advice(&json!({"advice": "", "recommendation": "slow down"})),
            "slow down"
        );
    }

    #[test]
    fn nested_payload_is_unwrapped() {
        assert_eq!(
            normalize_advice(&json!({"advice": {"recommendation": "ask a question"}})),
            "ask a question"
        );
    }

    #[test]
    fn unrecognized_object_is_serialized() {
        assert_eq!(normalize_advice(&json!({"foo": 1})), r#"{"foo":1}"#);
        assert_eq!(normalize_advice(&json!([1, 2])), "[1,2]");
    }

    #[test]
    fn null_resolves_to_fallback() {
        assert_eq!(normalize_advice(&Value::Null), ADVICE_FALLBACK);
    }

    #[test]
    fn runaway_nesting_resolves_to_fallback() {
        let deep = json!({"advice": {"advice": {"advice": {"advice": {"advice": {"advice": "deep"}}}}}});
        assert_eq!(normalize_advice(&deep), ADVICE_FALLBACK);
    }
}
