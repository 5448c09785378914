pub mod details;
pub mod restaurant;
pub mod review;

use serde_json::Value;

// Lenient accessors over raw API entries. Missing keys and wrong JSON types
// fall back to the empty value instead of failing the whole entry.

fn text(v: &Value, key: &str) -> String {
    match v.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

pub(crate) fn float(v: &Value, key: &str) -> f64 {
    match v.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
        Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
        _ => 0.0,
    }
}

pub(crate) fn int(v: &Value, key: &str) -> i64 {
    match v.get(key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or_default(),
        // "1,204 reviews" style counts
        Some(Value::String(s)) => s
            .chars()
            .filter(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .unwrap_or_default(),
        _ => 0,
    }
}

fn object(v: &Value, key: &str) -> Value {
    match v.get(key) {
        Some(o @ Value::Object(_)) => o.clone(),
        _ => Value::Object(Default::default()),
    }
}

fn array(v: &Value, key: &str) -> Vec<Value> {
    match v.get(key) {
        Some(Value::Array(a)) => a.clone(),
        _ => Vec::new(),
    }
}

/// List of labels: accepts bare strings or objects carrying a `title`.
pub(crate) fn labels(v: &Value, key: &str) -> Vec<String> {
    array(v, key)
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Object(_) => Some(text(item, "title")),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}
