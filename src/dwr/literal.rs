//! Restricted literal evaluator for script-fragment replies.
//!
//! DWR replies are JavaScript fragments that invoke a callback with the
//! payload as a literal argument. Extracting that value must never become
//! general code execution: this module implements a recursive descent parser
//! over the literal grammar only, plus a balanced scanner that captures a
//! single argument of a known function call without evaluating anything else.
//!
//! Grammar:
//! ```text
//! value  := string | number | 'true' | 'false' | 'null' | 'undefined'
//!         | array | object
//! string := '"' chars '"' | "'" chars "'"        (JS escape sequences)
//! array  := '[' [value (',' value)* [',']] ']'
//! object := '{' [entry (',' entry)* [',']] '}'
//! entry  := (ident | string | number) ':' value
//! ```

use anyhow::{bail, Result};
use serde_json::{Map, Number, Value};

/// Parse a complete literal expression into a JSON value.
///
/// A trailing semicolon is tolerated; anything else after the literal fails.
pub fn parse_literal(input: &str) -> Result<Value> {
    let chars: Vec<char> = input.chars().collect();
    let mut pos = 0;
    skip_ws(&chars, &mut pos);
    let value = parse_value(&chars, &mut pos)?;
    skip_ws(&chars, &mut pos);
    if pos < chars.len() && chars[pos] == ';' {
        pos += 1;
        skip_ws(&chars, &mut pos);
    }
    if pos < chars.len() {
        bail!("trailing input after literal at position {pos}");
    }
    Ok(value)
}

fn parse_value(chars: &[char], pos: &mut usize) -> Result<Value> {
    skip_ws(chars, pos);
    match chars.get(*pos) {
        Some('"') | Some('\'') => parse_string(chars, pos).map(Value::String),
        Some('[') => parse_array(chars, pos),
        Some('{') => parse_object(chars, pos),
        Some(c) if c.is_ascii_digit() || *c == '-' || *c == '+' => parse_number(chars, pos),
        Some(c) if c.is_alphabetic() || *c == '_' || *c == '$' => {
            let word = parse_ident(chars, pos);
            match word.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" | "undefined" => Ok(Value::Null),
                other => bail!("unexpected identifier '{other}' in literal"),
            }
        }
        Some(c) => bail!("unexpected character '{c}' at position {pos}"),
        None => bail!("unexpected end of input"),
    }
}

fn parse_string(chars: &[char], pos: &mut usize) -> Result<String> {
    let quote = chars[*pos];
    *pos += 1;
    let mut out = String::new();
    while let Some(&c) = chars.get(*pos) {
        *pos += 1;
        if c == quote {
            return Ok(out);
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(&escaped) = chars.get(*pos) else {
            bail!("unterminated escape sequence");
        };
        *pos += 1;
        match escaped {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'u' => {
                let mut code = 0u32;
                for _ in 0..4 {
                    let Some(d) = chars.get(*pos).and_then(|c| c.to_digit(16)) else {
                        bail!("invalid unicode escape");
                    };
                    code = code * 16 + d;
                    *pos += 1;
                }
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            other => out.push(other),
        }
    }
    bail!("unterminated string literal");
}

fn parse_number(chars: &[char], pos: &mut usize) -> Result<Value> {
    let start = *pos;
    if matches!(chars.get(*pos), Some('-') | Some('+')) {
        *pos += 1;
    }
    let mut is_float = false;
    while let Some(&c) = chars.get(*pos) {
        if c.is_ascii_digit() {
            *pos += 1;
        } else if c == '.' || c == 'e' || c == 'E' {
            is_float = true;
            *pos += 1;
            if matches!(chars.get(*pos), Some('-') | Some('+')) {
                *pos += 1;
            }
        } else {
            break;
        }
    }
    let text: String = chars[start..*pos].iter().collect();
    if !is_float {
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Value::Number(Number::from(n)));
        }
    }
    let n: f64 = text
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid number '{text}'"))?;
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| anyhow::anyhow!("non-finite number '{text}'"))
}

fn parse_ident(chars: &[char], pos: &mut usize) -> String {
    let start = *pos;
    while let Some(&c) = chars.get(*pos) {
        if c.is_alphanumeric() || c == '_' || c == '$' {
            *pos += 1;
        } else {
            break;
        }
    }
    chars[start..*pos].iter().collect()
}

fn parse_array(chars: &[char], pos: &mut usize) -> Result<Value> {
    *pos += 1; // consume '['
    let mut items = Vec::new();
    loop {
        skip_ws(chars, pos);
        match chars.get(*pos) {
            Some(']') => {
                *pos += 1;
                return Ok(Value::Array(items));
            }
            Some(_) => {
                items.push(parse_value(chars, pos)?);
                skip_ws(chars, pos);
                if let Some(',') = chars.get(*pos) {
                    *pos += 1;
                }
            }
            None => bail!("unterminated array literal"),
        }
    }
}

fn parse_object(chars: &[char], pos: &mut usize) -> Result<Value> {
    *pos += 1; // consume '{'
    let mut map = Map::new();
    loop {
        skip_ws(chars, pos);
        match chars.get(*pos) {
            Some('}') => {
                *pos += 1;
                return Ok(Value::Object(map));
            }
            Some(&c) => {
                let key = if c == '"' || c == '\'' {
                    parse_string(chars, pos)?
                } else if c.is_ascii_digit() || c == '-' {
                    match parse_number(chars, pos)? {
                        Value::Number(n) => n.to_string(),
                        _ => unreachable!(),
                    }
                } else {
                    let ident = parse_ident(chars, pos);
                    if ident.is_empty() {
                        bail!("expected object key at position {pos}");
                    }
                    ident
                };
                skip_ws(chars, pos);
                if chars.get(*pos) != Some(&':') {
                    bail!("expected ':' after object key '{key}'");
                }
                *pos += 1;
                let value = parse_value(chars, pos)?;
                map.insert(key, value);
                skip_ws(chars, pos);
                if let Some(',') = chars.get(*pos) {
                    *pos += 1;
                }
            }
            None => bail!("unterminated object literal"),
        }
    }
}

fn skip_ws(chars: &[char], pos: &mut usize) {
    while matches!(chars.get(*pos), Some(c) if c.is_whitespace()) {
        *pos += 1;
    }
}

// ── Call-argument capture ──

/// Capture one argument of a `callee(...)` invocation, by position.
///
/// Scans for the callee name at a word boundary, then walks the argument
/// list tracking bracket depth and string state. The captured text is
/// returned verbatim for the literal parser; nothing is evaluated here.
pub fn capture_call_argument(text: &str, callee: &str, arg_index: usize) -> Option<String> {
    for (found, _) in text.match_indices(callee) {
        // word boundary on the left, '(' on the right
        if found > 0 {
            let before = text[..found].chars().next_back().unwrap_or(' ');
            if before.is_alphanumeric() || before == '_' || before == '$' {
                continue;
            }
        }
        let after = &text[found + callee.len()..];
        let trimmed = after.trim_start();
        if !trimmed.starts_with('(') {
            continue;
        }
        if let Some(args) = scan_arguments(&trimmed[1..]) {
            if let Some(arg) = args.into_iter().nth(arg_index) {
                let arg = arg.trim().to_string();
                if !arg.is_empty() {
                    return Some(arg);
                }
            }
        }
    }
    None
}

/// Split the text of an argument list (after the opening paren) at the
/// top-level commas, stopping at the matching close paren.
fn scan_arguments(text: &str) -> Option<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth_paren = 0i32;
    let mut depth_square = 0i32;
    let mut depth_curly = 0i32;
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for c in text.chars() {
        if let Some(quote) = in_string {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                in_string = Some(c);
                current.push(c);
            }
            '(' => {
                depth_paren += 1;
                current.push(c);
            }
            ')' => {
                if depth_paren == 0 && depth_square == 0 && depth_curly == 0 {
                    args.push(current);
                    return Some(args);
                }
                depth_paren -= 1;
                current.push(c);
            }
            '[' => {
                depth_square += 1;
                current.push(c);
            }
            ']' => {
                depth_square -= 1;
                current.push(c);
            }
            '{' => {
                depth_curly += 1;
                current.push(c);
            }
            '}' => {
                depth_curly -= 1;
                current.push(c);
            }
            ',' if depth_paren == 0 && depth_square == 0 && depth_curly == 0 => {
                args.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    // ran out of input before the close paren
    None
}
