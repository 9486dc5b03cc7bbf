//! Lenient accessors over upstream JSON objects.

use chrono::{DateTime, NaiveDate};
use serde_json::Value;

/// Trimmed non-empty string at `key`; numbers are rendered as text.
pub(crate) fn str_field(obj: &Value, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Date at `key`, accepting `YYYY-MM-DD` or a full RFC 3339 timestamp.
pub(crate) fn date_field(obj: &Value, key: &str) -> Option<NaiveDate> {
    let raw = str_field(obj, key)?;
    parse_date(&raw)
}

pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.date_naive());
    }
    raw.get(..10)
        .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
}

/// Yes/no style answer as a boolean.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "yes" | "y" | "true" | "1"
        ),
        _ => false,
    }
}

/// The list inside `{ "items": [...] }`, or the value itself when it is a list.
pub(crate) fn items(payload: &Value) -> &[Value] {
    match payload {
        Value::Array(list) => list,
        Value::Object(obj) => obj
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_fields_are_trimmed() {
        let obj = json!({"a": "  x ", "b": "   ", "c": 12, "d": null});
        assert_eq!(str_field(&obj, "a").as_deref(), Some("x"));
        assert_eq!(str_field(&obj, "b"), None);
        assert_eq!(str_field(&obj, "c").as_deref(), Some("12"));
        assert_eq!(str_field(&obj, "d"), None);
        assert_eq!(str_field(&obj, "missing"), None);
    }

    #[test]
    fn dates_accept_common_shapes() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 10);
        assert_eq!(parse_date("2025-03-10"), expected);
        assert_eq!(parse_date("2025-03-10T09:30:00Z"), expected);
        assert_eq!(parse_date("2025-03-10T09:30:00"), expected);
        assert_eq!(parse_date("March 10"), None);
    }

    #[test]
    fn truthiness() {
        assert!(truthy(&json!("Yes")));
        assert!(truthy(&json!(true)));
        assert!(truthy(&json!(1)));
        assert!(!truthy(&json!("No")));
        assert!(!truthy(&json!(null)));
    }

    #[test]
    fn items_unwraps_envelopes() {
        assert_eq!(items(&json!({"items": [1, 2]})).len(), 2);
        assert_eq!(items(&json!([1])).len(), 1);
        assert!(items(&json!({"other": 1})).is_empty());
    }
}
