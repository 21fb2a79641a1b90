//! Best-effort repair and location of JSON objects in free text.
//!
//! Both pasted user input and AI output routinely carry JSON that is almost
//! valid: single quotes, smart quotes, bare keys, trailing commas, Python
//! literals. [`repair_json`] applies one pass of character-level fixes that
//! never touch the inside of double-quoted strings, then validates the result
//! with `serde_json`.

use serde_json::Value;

/// Repair common JSON mistakes.
///
/// Returns `Some(repaired)` only when the input was invalid and the repaired
/// text parses. Already-valid input returns `None`.
///
/// Fixes, in order: smart quotes to ASCII, `//` and `/* */` comments,
/// `True`/`False`/`None`, trailing commas, single-quoted strings, unquoted
/// keys, unclosed brackets.
pub fn repair_json(broken: &str) -> Option<String> {
    if serde_json::from_str::<Value>(broken).is_ok() {
        return None;
    }

    let mut s = normalize_smart_quotes(broken);
    s = outside_strings(&s, drop_comment);
    s = outside_strings(&s, python_literal);
    s = outside_strings(&s, trailing_comma);
    s = outside_strings(&s, single_quoted);
    s = outside_strings(&s, bare_key);
    s = close_unbalanced(&s);

    serde_json::from_str::<Value>(&s).ok().map(|_| s)
}

/// Parse `text` as JSON, falling back to one repair pass.
pub fn parse_lenient(text: &str) -> Option<Value> {
    serde_json::from_str(text)
        .ok()
        .or_else(|| repair_json(text).and_then(|fixed| serde_json::from_str(&fixed).ok()))
}

/// Byte ranges `(start, end_inclusive)` of every balanced top-level
/// `open`…`close` region, in order. Delimiters inside double-quoted strings
/// are ignored. An unterminated region ends the scan.
pub fn balanced_regions(text: &str, open: char, close: char) -> Vec<(usize, usize)> {
    let mut regions = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if ch == '"' && depth > 0 {
            in_string = true;
        } else if ch == open {
            if depth == 0 {
                start = i;
            }
            depth += 1;
        } else if ch == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                regions.push((start, i));
            }
        }
    }
    regions
}

/// The outermost region spanning the first `open` to its matching `close`.
pub fn first_balanced(text: &str, open: char, close: char) -> Option<&str> {
    balanced_regions(text, open, close)
        .first()
        .map(|&(start, end)| &text[start..=end])
}

fn normalize_smart_quotes(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => '\'',
            other => other,
        })
        .collect()
}

/// Runs `fix` at every position outside double-quoted strings.
///
/// `fix` receives the full char buffer and the current index, may push to the
/// output, and returns how many chars it consumed. Returning 0 means "not
/// mine": the char is copied unchanged.
fn outside_strings(s: &str, mut fix: impl FnMut(&[char], usize, &mut String) -> usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    let mut in_string = false;
    let mut escaped = false;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = true;
            out.push(c);
            i += 1;
            continue;
        }
        match fix(&chars, i, &mut out) {
            0 => {
                out.push(c);
                i += 1;
            }
            n => i += n,
        }
    }
    out
}

fn drop_comment(chars: &[char], i: usize, _out: &mut String) -> usize {
    // `scheme://` inside a not-yet-requoted string is not a comment.
    if chars[i] != '/' || (i > 0 && chars[i - 1] == ':') {
        return 0;
    }
    match chars.get(i + 1) {
        Some('/') => chars[i..].iter().position(|&c| c == '\n').unwrap_or(chars.len() - i),
        Some('*') => {
            let mut j = i + 2;
            while j + 1 < chars.len() && !(chars[j] == '*' && chars[j + 1] == '/') {
                j += 1;
            }
            (j + 2).min(chars.len()) - i
        }
        _ => 0,
    }
}

fn python_literal(chars: &[char], i: usize, out: &mut String) -> usize {
    const LITERALS: [(&str, &str); 3] = [("True", "true"), ("False", "false"), ("None", "null")];
    if i > 0 && chars[i - 1].is_alphanumeric() {
        return 0;
    }
    for (from, to) in LITERALS {
        let len = from.chars().count();
        let matches = chars.len() >= i + len
            && chars[i..i + len].iter().copied().eq(from.chars())
            && !matches!(chars.get(i + len), Some(c) if c.is_alphanumeric());
        if matches {
            out.push_str(to);
            return len;
        }
    }
    0
}

fn trailing_comma(chars: &[char], i: usize, _out: &mut String) -> usize {
    if chars[i] != ',' {
        return 0;
    }
    let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
    if matches!(next, Some('}') | Some(']')) {
        1
    } else {
        0
    }
}

fn single_quoted(chars: &[char], i: usize, out: &mut String) -> usize {
    if chars[i] != '\'' {
        return 0;
    }
    let before = chars[..i].iter().rev().find(|c| !c.is_whitespace());
    if !matches!(before, None | Some('{') | Some('[') | Some(':') | Some(',')) {
        return 0;
    }
    let mut j = i + 1;
    while j < chars.len() && chars[j] != '\'' {
        j += if chars[j] == '\\' { 2 } else { 1 };
    }
    if j >= chars.len() {
        return 0;
    }
    let after = chars[j + 1..].iter().find(|c| !c.is_whitespace());
    if !matches!(after, None | Some('}') | Some(']') | Some(':') | Some(',')) {
        return 0;
    }
    out.push('"');
    for &c in &chars[i + 1..j] {
        if c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    j + 1 - i
}

fn bare_key(chars: &[char], i: usize, out: &mut String) -> usize {
    let c = chars[i];
    if !(c.is_alphabetic() || c == '_') {
        return 0;
    }
    let before = chars[..i].iter().rev().find(|c| !c.is_whitespace());
    if !matches!(before, Some('{') | Some(',')) {
        return 0;
    }
    let mut end = i;
    while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_' || chars[end] == '-') {
        end += 1;
    }
    let after = chars[end..].iter().find(|c| !c.is_whitespace());
    if after != Some(&':') {
        return 0;
    }
    out.push('"');
    out.extend(&chars[i..end]);
    out.push('"');
    end - i
}

fn close_unbalanced(s: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in s.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }
    let mut out = s.trim_end().to_string();
    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_json_needs_no_repair() {
        assert_eq!(repair_json(r#"{"a": 1}"#), None);
    }

    #[test]
    fn test_repairs_single_quotes_and_bare_keys() {
        let fixed = repair_json("{name: 'alice', 'age': 3}").unwrap();
        let v: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v["name"], "alice");
        assert_eq!(v["age"], 3);
    }

    #[test]
    fn test_repairs_smart_quotes() {
        let fixed = repair_json("{\u{201C}name\u{201D}: \u{201C}bob\u{201D}}").unwrap();
        let v: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v["name"], "bob");
    }

    #[test]
    fn test_repairs_trailing_commas_and_python_literals() {
        let fixed = repair_json(r#"{"ok": True, "list": [1, 2,], "x": None,}"#).unwrap();
        let v: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v["ok"], true);
        assert!(v["x"].is_null());
        assert_eq!(v["list"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_does_not_touch_string_contents() {
        let fixed = repair_json(r#"{"msg": "True, None // here", "n": 1,}"#).unwrap();
        let v: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v["msg"], "True, None // here");
    }

    #[test]
    fn test_strips_comments() {
        let fixed = repair_json("{\"a\": 1, // note\n \"b\": /* x */ 2}").unwrap();
        let v: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v["b"], 2);
    }

    #[test]
    fn test_closes_truncated_object() {
        let fixed = repair_json(r#"{"requests": [{"url": "/a""#).unwrap();
        let v: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(v["requests"][0]["url"], "/a");
    }

    #[test]
    fn test_unrepairable_returns_none() {
        assert_eq!(repair_json("not json at all"), None);
    }

    #[test]
    fn test_balanced_regions_skips_braces_in_strings() {
        let text = r#"a {"x": "}"} b {"y": {"z": 1}} c {unclosed"#;
        let regions = balanced_regions(text, '{', '}');
        assert_eq!(regions.len(), 2);
        assert_eq!(&text[regions[0].0..=regions[0].1], r#"{"x": "}"}"#);
        assert_eq!(&text[regions[1].0..=regions[1].1], r#"{"y": {"z": 1}}"#);
    }

    #[test]
    fn test_parse_lenient() {
        assert_eq!(parse_lenient("{'a': 1}").unwrap()["a"], 1);
        assert!(parse_lenient("nope").is_none());
    }
}
