//! Context serialization. Two interchangeable encodings: plain JSON and
//! "toon", a compact indentation layout that folds uniform object arrays
//! into tabular rows.

use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextFormat {
    #[default]
    Json,
    Toon,
}

impl ContextFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "json" => Some(Self::Json),
            "toon" => Some(Self::Toon),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Toon => "toon",
        }
    }
}

pub fn encode_context(value: &Value, format: ContextFormat) -> String {
    match format {
        ContextFormat::Json => serde_json::to_string_pretty(value).unwrap_or_default(),
        ContextFormat::Toon => toon_encode(value),
    }
}

/// Size comparison between the two encodings for one object.
pub fn compare_formats(value: &Value) -> Value {
    let json_text = encode_context(value, ContextFormat::Json);
    let toon_text = encode_context(value, ContextFormat::Toon);
    let json_bytes = json_text.len();
    let toon_bytes = toon_text.len();
    let saved_pct = if json_bytes == 0 {
        0.0
    } else {
        (json_bytes as f64 - toon_bytes as f64) / json_bytes as f64 * 100.0
    };
    json!({
        "jsonBytes": json_bytes,
        "toonBytes": toon_bytes,
        "savedPct": (saved_pct * 10.0).round() / 10.0,
        "recommended": if toon_bytes < json_bytes { "toon" } else { "json" },
    })
}

pub fn toon_encode(value: &Value) -> String {
    let mut out = String::new();
    toon_value(value, 0, &mut out);
    out.trim_end().to_string()
}

fn toon_value(value: &Value, indent: usize, out: &mut String) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map {
                toon_field(key, entry, indent, out);
            }
        }
        other => {
            push_indent(indent, out);
            out.push_str(&inline(other));
            out.push('\n');
        }
    }
}

fn toon_field(key: &str, value: &Value, indent: usize, out: &mut String) {
    match value {
        Value::Object(map) if map.is_empty() => {
            push_indent(indent, out);
            out.push_str(key);
            out.push_str(": {}\n");
        }
        Value::Object(_) => {
            push_indent(indent, out);
            out.push_str(key);
            out.push_str(":\n");
            toon_value(value, indent + 1, out);
        }
        Value::Array(items) => toon_array(key, items, indent, out),
        primitive => {
            push_indent(indent, out);
            out.push_str(key);
            out.push_str(": ");
            out.push_str(&inline(primitive));
            out.push('\n');
        }
    }
}

fn toon_array(key: &str, items: &[Value], indent: usize, out: &mut String) {
    if items.is_empty() {
        push_indent(indent, out);
        out.push_str(key);
        out.push_str(": []\n");
        return;
    }

    if items.iter().all(|item| !item.is_object() && !item.is_array()) {
        let joined: Vec<String> = items.iter().map(inline).collect();
        push_indent(indent, out);
        out.push_str(&format!("{key}: [{}]\n", joined.join(",")));
        return;
    }

    // Arrays of uniform objects collapse into a header row plus one
    // comma-joined line per element.
    if let Some(columns) = uniform_keys(items) {
        push_indent(indent, out);
        out.push_str(&format!("{key}[{}]{{{}}}:\n", items.len(), columns.join(",")));
        for item in items {
            let row: Vec<String> = columns
                .iter()
                .map(|column| inline(item.get(column).unwrap_or(&Value::Null)))
                .collect();
            push_indent(indent + 1, out);
            out.push_str(&row.join(","));
            out.push('\n');
        }
        return;
    }

    push_indent(indent, out);
    out.push_str(key);
    out.push_str(":\n");
    for item in items {
        push_indent(indent + 1, out);
        out.push_str("- ");
        match item {
            Value::Object(_) | Value::Array(_) => {
                out.push('\n');
                toon_value(item, indent + 2, out);
            }
            primitive => {
                out.push_str(&inline(primitive));
                out.push('\n');
            }
        }
    }
}

/// All elements are objects with identical key sets (and only primitive
/// values), in which case the tabular form applies.
fn uniform_keys(items: &[Value]) -> Option<Vec<String>> {
    let first = items.first()?.as_object()?;
    let keys: Vec<String> = first.keys().cloned().collect();
    if keys.is_empty() {
        return None;
    }
    for item in items {
        let object = item.as_object()?;
        if object.len() != keys.len() {
            return None;
        }
        for key in &keys {
            let value = object.get(key)?;
            if value.is_object() || value.is_array() {
                return None;
            }
        }
    }
    Some(keys)
}

fn inline(value: &Value) -> String {
    match value {
        Value::Null => "null".into(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => {
            if s.is_empty()
                || s.contains(',')
                || s.contains('\n')
                || s.contains(':')
                || s.starts_with(' ')
                || s.ends_with(' ')
            {
                format!("{s:?}")
            } else {
                s.clone()
            }
        }
        other => other.to_string(),
    }
}

fn push_indent(indent: usize, out: &mut String) {
    for _ in 0..indent {
        out.push_str("  ");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_names() {
        assert_eq!(ContextFormat::from_name("toon"), Some(ContextFormat::Toon));
        assert_eq!(ContextFormat::from_name("yaml"), None);
        assert_eq!(ContextFormat::Json.name(), "json");
    }

    #[test]
    fn test_toon_flat_object() {
        // serde_json maps iterate in sorted key order.
        let value = json!({"name": "runner", "count": 3, "active": true});
        assert_eq!(toon_encode(&value), "active: true\ncount: 3\nname: runner");
    }

    #[test]
    fn test_toon_nested_object_and_primitive_array() {
        let value = json!({"task": {"id": 7, "tags": ["a", "b"]}});
        assert_eq!(toon_encode(&value), "task:\n  id: 7\n  tags: [a,b]");
    }

    #[test]
    fn test_toon_tabular_uniform_objects() {
        let value = json!({"files": [
            {"path": "a.rs", "lines": 10},
            {"path": "b.rs", "lines": 20}
        ]});
        assert_eq!(
            toon_encode(&value),
            "files[2]{lines,path}:\n  10,a.rs\n  20,b.rs"
        );
    }

    #[test]
    fn test_toon_quotes_awkward_strings() {
        let value = json!({"note": "a, b: c"});
        assert_eq!(toon_encode(&value), "note: \"a, b: c\"");
    }

    #[test]
    fn test_compare_formats_reports_sizes() {
        let value = json!({"items": [
            {"k": 1, "v": "x"},
            {"k": 2, "v": "y"},
            {"k": 3, "v": "z"}
        ]});
        let report = compare_formats(&value);
        let json_bytes = report["jsonBytes"].as_u64().unwrap();
        let toon_bytes = report["toonBytes"].as_u64().unwrap();
        assert!(toon_bytes < json_bytes);
        assert_eq!(report["recommended"], "toon");
    }
}
