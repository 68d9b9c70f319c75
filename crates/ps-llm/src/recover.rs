//! JSON recovery for model replies: fenced-block extraction, lenient
//! cleanup, and salvage of truncated WRITE_FILE payloads.

use std::sync::LazyLock;

use ps_core::{Action, Plan};
use regex::Regex;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*\n(.*?)```").expect("valid regex")
});

static BARE_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)(\s*:)"#).expect("valid regex")
});

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("valid regex"));

static WRITE_ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""action"\s*:\s*"WRITE_FILE""#).expect("valid regex")
});

static PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""path"\s*:\s*"([^"]+)""#).expect("valid regex"));

static CONTENT_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""content"\s*:\s*""#).expect("valid regex"));

/// Pull the JSON payload out of a reply: a fenced code block if present,
/// otherwise the first balanced `{...}` substring.
pub fn extract_json(raw: &str) -> Option<String> {
    if let Some(captures) = FENCE_RE.captures(raw) {
        let inner = captures.get(1)?.as_str().trim();
        if !inner.is_empty() {
            return Some(inner.to_string());
        }
    }
    first_balanced_object(raw)
}

fn first_balanced_object(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in raw[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(raw[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Repair the common model mistakes: trailing commas, single-quoted
/// strings, and bare object keys.
pub fn clean_json(raw: &str) -> String {
    let requoted = requote_single_quoted(raw);
    let keyed = BARE_KEY_RE.replace_all(&requoted, "$1\"$2\"$3");
    TRAILING_COMMA_RE.replace_all(&keyed, "$1").into_owned()
}

/// Convert single-quoted strings to double-quoted, leaving apostrophes
/// inside double-quoted strings alone.
fn requote_single_quoted(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    let mut in_double = false;
    let mut escaped = false;

    while let Some(ch) = chars.next() {
        if in_double {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_double = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_double = true;
                out.push(ch);
            }
            '\'' => {
                out.push('"');
                for inner in chars.by_ref() {
                    match inner {
                        '\'' => break,
                        '"' => out.push_str("\\\""),
                        other => out.push(other),
                    }
                }
                out.push('"');
            }
            other => out.push(other),
        }
    }
    out
}

/// Salvage a WRITE_FILE plan from a reply whose JSON was cut off inside
/// the `content` string. The content is taken through the last `</html>`
/// when one is present, otherwise trailing JSON tail fragments are
/// trimmed heuristically.
pub fn recover_truncated_write(raw: &str) -> Option<Plan> {
    if !WRITE_ACTION_RE.is_match(raw) {
        return None;
    }
    let path = PATH_RE.captures(raw)?.get(1)?.as_str().to_string();
    let content_start = CONTENT_OPEN_RE.find(raw)?.end();
    let tail = &raw[content_start..];

    let escaped_content = match tail.rfind("</html>") {
        Some(position) => &tail[..position + "</html>".len()],
        None => trim_json_tail(tail),
    };

    let content = unescape_json_string(escaped_content);
    Some(Plan::new(
        Action::WriteFile {
            path,
            content,
            mode: None,
        },
        false,
    ))
}

/// Strip whatever remains of the JSON envelope after the content string:
/// closing quotes, braces, commas, `"done"`-style fields, and whitespace.
fn trim_json_tail(tail: &str) -> &str {
    let mut end = tail.len();
    let bytes = tail.as_bytes();
    while end > 0 {
        let ch = bytes[end - 1] as char;
        if ch.is_whitespace() || matches!(ch, '"' | '}' | ']' | ',') {
            end -= 1;
        } else {
            break;
        }
    }
    // A truncated "done": true / false tail is part of the envelope too.
    let trimmed = &tail[..end];
    for marker in ["\"done\"", "\"confidence\"", "\"reason\""] {
        if let Some(position) = trimmed.rfind(marker)
            && trimmed[position..].len() < 40
        {
            return trim_quote_comma(&trimmed[..position]);
        }
    }
    trimmed
}

fn trim_quote_comma(text: &str) -> &str {
    text.trim_end_matches(|ch: char| ch.is_whitespace() || matches!(ch, '"' | '}' | ']' | ','))
}

/// Minimal JSON string unescape: the content was captured from inside a
/// JSON string literal, so escape sequences are still encoded.
pub fn unescape_json_string(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                if let Ok(code) = u32::from_str_radix(&hex, 16)
                    && let Some(decoded) = char::from_u32(code)
                {
                    out.push(decoded);
                }
            }
            Some(other) => out.push(other),
            None => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_fenced_block() {
        let raw = "Here is the plan:\n```json\n{\"action\": \"REPORT\"}\n```\nDone.";
        assert_eq!(extract_json(raw).unwrap(), "{\"action\": \"REPORT\"}");
    }

    #[test]
    fn test_extract_from_plain_fence() {
        let raw = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(raw).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_first_balanced_object() {
        let raw = "noise {\"a\": {\"b\": \"}\"}} trailing";
        assert_eq!(extract_json(raw).unwrap(), "{\"a\": {\"b\": \"}\"}}");
    }

    #[test]
    fn test_clean_trailing_commas() {
        assert_eq!(
            clean_json("{\"a\": [1, 2,], \"b\": 3,}"),
            "{\"a\": [1, 2], \"b\": 3}"
        );
    }

    #[test]
    fn test_clean_single_quotes_and_bare_keys() {
        let cleaned = clean_json("{action: 'REPORT', args: {message: 'all good'}, done: true,}");
        let parsed: serde_json::Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(parsed["action"], "REPORT");
        assert_eq!(parsed["args"]["message"], "all good");
        assert_eq!(parsed["done"], true);
    }

    #[test]
    fn test_clean_preserves_apostrophes_in_double_quotes() {
        let raw = "{\"message\": \"it's fine\"}";
        assert_eq!(clean_json(raw), raw);
    }

    #[test]
    fn test_recover_truncated_write_with_html_sentinel() {
        let raw = "{\"action\": \"WRITE_FILE\", \"args\": {\"path\": \"index.html\", \"content\": \"<html>\\n<body>hi</body>\\n</html>";
        let plan = recover_truncated_write(raw).unwrap();
        match plan.action {
            Action::WriteFile { path, content, .. } => {
                assert_eq!(path, "index.html");
                assert!(content.ends_with("</html>"));
                assert!(content.contains("\n<body>hi</body>"));
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_recover_trims_envelope_tail() {
        let raw = "{\"action\": \"WRITE_FILE\", \"args\": {\"path\": \"a.txt\", \"content\": \"plain text\"}, \"done\": tru";
        let plan = recover_truncated_write(raw).unwrap();
        match plan.action {
            Action::WriteFile { content, .. } => assert_eq!(content, "plain text"),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_recover_ignores_non_write_actions() {
        let raw = "{\"action\": \"READ_FILE\", \"args\": {\"path\": \"a\", \"content\": \"x";
        assert!(recover_truncated_write(raw).is_none());
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape_json_string(r#"a\nb\t\"c\"\\"#), "a\nb\t\"c\"\\");
        assert_eq!(unescape_json_string(r#"A"#), "A");
    }
}
