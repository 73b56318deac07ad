//! Conversions between context values and rendered text.
//!
//! Context values are plain `serde_json::Value`s. These helpers define how a
//! value prints, how it behaves in a condition, and how it is escaped before
//! reaching the output.

use serde_json::{Map, Value};
use std::borrow::Cow;

/// Data a template is rendered with.
pub type Context = Map<String, Value>;

/// Escape text for inclusion in HTML.
///
/// Escapes `&`, `<`, `>`, `"` and `'` (as `&#039;`). Returns the input unchanged (borrowed) when
/// nothing needs escaping.
pub fn escape_html(input: &str) -> Cow<'_, str> {
    if !input.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len() + 16);
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(ch),
        }
    }
    Cow::Owned(out)
}

/// Text form of a value as it appears in rendered output.
///
/// - `null` and `false` print nothing, `true` prints `1`
/// - integral floats print without a fraction (`3.0` → `3`)
/// - arrays and objects print as compact JSON
pub fn display(value: &Value) -> Cow<'_, str> {
    match value {
        Value::Null | Value::Bool(false) => Cow::Borrowed(""),
        Value::Bool(true) => Cow::Borrowed("1"),
        Value::String(s) => Cow::Borrowed(s),
        Value::Number(n) => match n.as_f64() {
            #[allow(clippy::cast_possible_truncation)]
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                Cow::Owned((f as i64).to_string())
            }
            _ => Cow::Owned(n.to_string()),
        },
        Value::Array(_) | Value::Object(_) => {
            Cow::Owned(serde_json::to_string(value).unwrap_or_default())
        }
    }
}

/// Truthiness used by `@if` and the logical operators.
///
/// `null`, `false`, `0`, `0.0`, `""`, `"0"`, `[]` and `{}` are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !(s.is_empty() || s == "0"),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Parse a string that looks like a number (`"42"`, `" 1.5 "`, `"-3e2"`).
pub fn parse_numeric(s: &str) -> Option<f64> {
    let s = s.trim();
    if !s.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Numeric view of a value for arithmetic and ordering.
///
/// Arrays, objects and non-numeric strings have no numeric view.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Null => Some(0.0),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_numeric(s),
        Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_escape_html_all_special_chars() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#039;Jerry&#039;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_escape_html_borrows_plain_text() {
        assert!(matches!(escape_html("plain text"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_escape_html_keeps_unicode() {
        assert_eq!(escape_html("café <b>"), "café &lt;b&gt;");
    }

    #[test]
    fn test_display_scalars() {
        assert_eq!(display(&json!(null)), "");
        assert_eq!(display(&json!(true)), "1");
        assert_eq!(display(&json!(false)), "");
        assert_eq!(display(&json!(42)), "42");
        assert_eq!(display(&json!(3.0)), "3");
        assert_eq!(display(&json!(1.5)), "1.5");
        assert_eq!(display(&json!("text")), "text");
    }

    #[test]
    fn test_display_collections_as_json() {
        assert_eq!(display(&json!([1, "a"])), r#"[1,"a"]"#);
        assert_eq!(display(&json!({"k": 1})), r#"{"k":1}"#);
    }

    #[test]
    fn test_truthiness() {
        for falsy in [json!(null), json!(false), json!(0), json!(0.0), json!(""), json!("0"), json!([]), json!({})] {
            assert!(!is_truthy(&falsy), "{falsy} should be falsy");
        }
        for truthy in [json!(true), json!(1), json!(-0.5), json!("a"), json!("0.0"), json!([0]), json!({"a": null})] {
            assert!(is_truthy(&truthy), "{truthy} should be truthy");
        }
    }

    #[test]
    fn test_parse_numeric() {
        assert_eq!(parse_numeric("42"), Some(42.0));
        assert_eq!(parse_numeric(" 1.5 "), Some(1.5));
        assert_eq!(parse_numeric("-3e2"), Some(-300.0));
        assert_eq!(parse_numeric("abc"), None);
        assert_eq!(parse_numeric("inf"), None);
        assert_eq!(parse_numeric(""), None);
    }

    #[test]
    fn test_to_number() {
        assert_eq!(to_number(&json!(null)), Some(0.0));
        assert_eq!(to_number(&json!(true)), Some(1.0));
        assert_eq!(to_number(&json!("7")), Some(7.0));
        assert_eq!(to_number(&json!("seven")), None);
        assert_eq!(to_number(&json!([1])), None);
    }
}
