use serde::Deserialize;
use serde_json::Value;

/// Key-based range/order options carried on a `read` request.
///
/// Unknown fields are ignored; a malformed options object degrades to the
/// default (no filtering) rather than failing the read.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryOptions {
    pub order_by: Option<String>,
    pub start_at: Option<Value>,
    pub end_at: Option<Value>,
    pub equal_to: Option<Value>,
    pub limit_to_last: Option<Value>,
}

impl QueryOptions {
    /// Parse options from the request payload, tolerating malformed input.
    pub fn from_payload(payload: &Value) -> Self {
        payload
            .get("query")
            .cloned()
            .map(|q| serde_json::from_value(q).unwrap_or_default())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn is_noop(&self) -> bool {
        self.order_by.is_none()
            && self.start_at.is_none()
            && self.end_at.is_none()
            && self.equal_to.is_none()
            && self.limit_to_last.is_none()
    }
}

/// Apply query options to a value.
///
/// Only object values are filtered; scalars, arrays and null pass through
/// unchanged. Options apply in a fixed order regardless of how the client
/// spelled them: sort, startAt, endAt, equalTo, limitToLast.
pub fn apply(value: Value, options: &QueryOptions) -> Value {
    let Value::Object(map) = value else {
        return value;
    };
    let mut entries: Vec<(String, Value)> = map.into_iter().collect();

    if options.order_by.as_deref() == Some("key") {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
    }
    if let Some(bound) = options.start_at.as_ref().map(key_bound) {
        entries.retain(|(key, _)| *key >= bound);
    }
    if let Some(bound) = options.end_at.as_ref().map(key_bound) {
        entries.retain(|(key, _)| *key <= bound);
    }
    if let Some(bound) = options.equal_to.as_ref().map(key_bound) {
        entries.retain(|(key, _)| *key == bound);
    }
    if let Some(limit) = options.limit_to_last.as_ref().and_then(parse_limit) {
        if entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
    }

    Value::Object(entries.into_iter().collect())
}

/// Coerce a scalar bound to its key-comparison form.
fn key_bound(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse `limitToLast`; non-positive or unparsable limits are ignored.
fn parse_limit(value: &Value) -> Option<usize> {
    let n = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    (n > 0).then_some(n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn keys(value: &Value) -> Vec<String> {
        value
            .as_object()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_order_by_key_sorts_lexicographically() {
        let result = apply(
            json!({"b": 2, "a": 1, "c": 3}),
            &QueryOptions {
                order_by: Some("key".into()),
                ..Default::default()
            },
        );
        assert_eq!(keys(&result), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_order_by_with_limit_to_last() {
        let result = apply(
            json!({"b": 2, "a": 1, "c": 3}),
            &QueryOptions {
                order_by: Some("key".into()),
                limit_to_last: Some(json!(2)),
                ..Default::default()
            },
        );
        assert_eq!(result, json!({"b": 2, "c": 3}));
    }

    #[test]
    fn test_start_and_end_bounds() {
        let options = QueryOptions {
            start_at: Some(json!("b")),
            end_at: Some(json!("b")),
            ..Default::default()
        };
        assert_eq!(apply(json!({"a": 1, "b": 2, "c": 3}), &options), json!({"b": 2}));
    }

    #[test]
    fn test_equal_to_matches_range_narrowing() {
        let doc = json!({"a": 1, "b": 2, "c": 3});
        let ranged = apply(
            doc.clone(),
            &QueryOptions {
                start_at: Some(json!("b")),
                end_at: Some(json!("b")),
                ..Default::default()
            },
        );
        let equal = apply(
            doc,
            &QueryOptions {
                equal_to: Some(json!("b")),
                ..Default::default()
            },
        );
        assert_eq!(ranged, equal);
    }

    #[test]
    fn test_numeric_bounds_coerce_to_strings() {
        let result = apply(
            json!({"1": "a", "2": "b", "3": "c"}),
            &QueryOptions {
                start_at: Some(json!(2)),
                ..Default::default()
            },
        );
        assert_eq!(keys(&result), vec!["2", "3"]);
    }

    #[rstest]
    #[case(json!(0))]
    #[case(json!(-3))]
    #[case(json!("nope"))]
    #[case(json!(["1"]))]
    fn test_bad_limit_is_ignored(#[case] limit: Value) {
        let doc = json!({"a": 1, "b": 2});
        let result = apply(
            doc.clone(),
            &QueryOptions {
                limit_to_last: Some(limit),
                ..Default::default()
            },
        );
        assert_eq!(result, doc);
    }

    #[test]
    fn test_limit_accepts_numeric_strings() {
        let result = apply(
            json!({"a": 1, "b": 2, "c": 3}),
            &QueryOptions {
                limit_to_last: Some(json!("1")),
                ..Default::default()
            },
        );
        assert_eq!(result, json!({"c": 3}));
    }

    #[test]
    fn test_non_object_values_pass_through() {
        let options = QueryOptions {
            order_by: Some("key".into()),
            ..Default::default()
        };
        assert_eq!(apply(json!(42), &options), json!(42));
        assert_eq!(apply(json!([1, 2]), &options), json!([1, 2]));
        assert_eq!(apply(Value::Null, &options), Value::Null);
    }

    #[test]
    fn test_from_payload_tolerates_malformed_query() {
        let options = QueryOptions::from_payload(&json!({"query": "not-an-object"}));
        assert!(options.is_noop());
        let options = QueryOptions::from_payload(&json!({}));
        assert!(options.is_noop());
        let options = QueryOptions::from_payload(&json!({"query": {"orderBy": "key"}}));
        assert_eq!(options.order_by.as_deref(), Some("key"));
    }
}
