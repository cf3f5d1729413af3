//! The line-oriented header codec.
//!
//! Assertions carry their headers as ASCII text, one `name: value` entry
//! per line, with two-space indentation for nested lists and maps. The
//! bytes produced here are covered by signatures, so serialization is
//! canonical: `type` leads, `body-length` and `sign-key-sha3-384` close
//! the block, everything else is ordered lexicographically and nested
//! maps inherit `BTreeMap` key order.
//!
//! Decoded assertions keep their raw content bytes, so parsing never has
//! to be able to reproduce a foreign serialization; it only has to accept
//! it.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::value::{HeaderValue, Headers};

/// Errors from parsing or serializing a header block.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A header entry line was structurally invalid.
    #[error("{0}")]
    Header(String),
    /// A header mapping could not be serialized to the wire format.
    #[error("cannot serialize headers: {0}")]
    Serialize(String),
}

fn header_err(msg: impl Into<String>) -> CodecError {
    CodecError::Header(msg.into())
}

struct Parser<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.pos).copied()
    }

    fn advance(&mut self) {
        self.pos += 1;
    }
}

fn leading_spaces(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn check_line(line: &str) -> Result<(), CodecError> {
    if !line.is_ascii() {
        return Err(header_err(format!("header content must be ASCII: {line:?}")));
    }
    if line.bytes().any(|b| b < 0x20) {
        return Err(header_err(format!(
            "header content contains a control character: {line:?}"
        )));
    }
    Ok(())
}

/// Parses a header block (without the terminating blank line) into a
/// header mapping.
pub fn parse_headers(text: &str) -> Result<Headers, CodecError> {
    let mut lines: Vec<&str> = if text.is_empty() {
        Vec::new()
    } else {
        text.split('\n').collect()
    };
    // a single trailing newline on the block is tolerated
    if lines.last() == Some(&"") {
        lines.pop();
    }
    for line in &lines {
        check_line(line)?;
    }
    let mut parser = Parser { lines, pos: 0 };
    let headers = parse_map_entries(&mut parser, 0)?;
    if let Some(line) = parser.peek() {
        return Err(header_err(format!("unexpected indentation: {line:?}")));
    }
    Ok(headers)
}

fn parse_map_entries(
    p: &mut Parser<'_>,
    indent: usize,
) -> Result<BTreeMap<String, HeaderValue>, CodecError> {
    let mut entries = BTreeMap::new();
    while let Some(line) = p.peek() {
        let pad = leading_spaces(line);
        if pad < indent {
            break;
        }
        if pad > indent {
            return Err(header_err(format!("unexpected indentation: {line:?}")));
        }
        let rest = &line[indent..];
        if rest.starts_with('-') {
            // a list item where a map entry is expected
            break;
        }
        let colon = rest
            .find(':')
            .ok_or_else(|| header_err(format!("header entry missing ':' separator: {line:?}")))?;
        let name = &rest[..colon];
        if name.is_empty() {
            return Err(header_err(format!("header name cannot be empty: {line:?}")));
        }
        let after = &rest[colon + 1..];
        p.advance();
        let value = if after.is_empty() {
            parse_nested(p, indent + 2)
                .map_err(|e| nested_context(e, name))?
        } else if let Some(v) = after.strip_prefix(' ') {
            HeaderValue::Str(v.to_string())
        } else {
            return Err(header_err(format!(
                "header entry should have a space or newline (for nested values) before value: {line:?}"
            )));
        };
        if entries.insert(name.to_string(), value).is_some() {
            return Err(header_err(format!("repeated header: {name:?}")));
        }
    }
    Ok(entries)
}

fn nested_context(e: CodecError, name: &str) -> CodecError {
    match e {
        CodecError::Header(msg) if msg == "expected nested list or map" => {
            header_err(format!("expected list or map value for header {name:?}"))
        }
        other => other,
    }
}

fn parse_nested(p: &mut Parser<'_>, indent: usize) -> Result<HeaderValue, CodecError> {
    let line = match p.peek() {
        Some(line) => line,
        None => return Err(header_err("expected nested list or map")),
    };
    let pad = leading_spaces(line);
    if pad < indent {
        return Err(header_err("expected nested list or map"));
    }
    if pad > indent {
        return Err(header_err(format!("unexpected indentation: {line:?}")));
    }
    if line[indent..].starts_with('-') {
        parse_list(p, indent)
    } else {
        Ok(HeaderValue::Map(parse_map_entries(p, indent)?))
    }
}

fn parse_list(p: &mut Parser<'_>, indent: usize) -> Result<HeaderValue, CodecError> {
    let mut items = Vec::new();
    while let Some(line) = p.peek() {
        let pad = leading_spaces(line);
        if pad < indent {
            break;
        }
        if pad > indent {
            return Err(header_err(format!("unexpected indentation: {line:?}")));
        }
        let rest = &line[indent..];
        if !rest.starts_with('-') {
            return Err(header_err(format!(
                "map entry mixed into list: {line:?}"
            )));
        }
        let after = &rest[1..];
        p.advance();
        if after.is_empty() {
            items.push(parse_nested(p, indent + 2).map_err(|e| match e {
                CodecError::Header(msg) if msg == "expected nested list or map" => {
                    header_err("expected nested list or map item")
                }
                other => other,
            })?);
        } else if let Some(v) = after.strip_prefix(' ') {
            items.push(HeaderValue::Str(v.to_string()));
        } else {
            return Err(header_err(format!(
                "list entry should have a space or newline (for nested values) before value: {line:?}"
            )));
        }
    }
    Ok(HeaderValue::List(items))
}

/// Serializes a header mapping to its canonical wire form, including the
/// trailing newline of the last entry.
pub fn serialize_headers(headers: &Headers) -> Result<String, CodecError> {
    let mut out = String::new();
    let mut names: Vec<&str> = Vec::with_capacity(headers.len());
    if headers.contains_key("type") {
        names.push("type");
    }
    for name in headers.keys() {
        match name.as_str() {
            "type" | "body-length" | "sign-key-sha3-384" => {}
            other => names.push(other),
        }
    }
    for tail in ["body-length", "sign-key-sha3-384"] {
        if headers.contains_key(tail) {
            names.push(tail);
        }
    }
    for name in names {
        let value = headers
            .get(name)
            .ok_or_else(|| CodecError::Serialize(format!("missing header {name:?}")))?;
        write_entry(&mut out, name, value, 0)?;
    }
    Ok(out)
}

fn check_scalar(s: &str) -> Result<(), CodecError> {
    if !s.is_ascii() || s.bytes().any(|b| b < 0x20) {
        return Err(CodecError::Serialize(format!(
            "header value must be single-line ASCII: {s:?}"
        )));
    }
    Ok(())
}

fn write_entry(
    out: &mut String,
    name: &str,
    value: &HeaderValue,
    indent: usize,
) -> Result<(), CodecError> {
    if name.is_empty() || !name.is_ascii() || name.contains(':') || name.contains('\n') {
        return Err(CodecError::Serialize(format!("invalid header name: {name:?}")));
    }
    let pad = " ".repeat(indent);
    match value {
        HeaderValue::Str(s) => {
            check_scalar(s)?;
            out.push_str(&format!("{pad}{name}: {s}\n"));
        }
        HeaderValue::List(items) => {
            out.push_str(&format!("{pad}{name}:\n"));
            write_list(out, items, indent + 2)?;
        }
        HeaderValue::Map(entries) => {
            out.push_str(&format!("{pad}{name}:\n"));
            for (k, v) in entries {
                write_entry(out, k, v, indent + 2)?;
            }
        }
    }
    Ok(())
}

fn write_list(
    out: &mut String,
    items: &[HeaderValue],
    indent: usize,
) -> Result<(), CodecError> {
    let pad = " ".repeat(indent);
    for item in items {
        match item {
            HeaderValue::Str(s) => {
                check_scalar(s)?;
                out.push_str(&format!("{pad}- {s}\n"));
            }
            HeaderValue::List(nested) => {
                out.push_str(&format!("{pad}-\n"));
                write_list(out, nested, indent + 2)?;
            }
            HeaderValue::Map(entries) => {
                out.push_str(&format!("{pad}-\n"));
                for (k, v) in entries {
                    write_entry(out, k, v, indent + 2)?;
                }
            }
        }
    }
    Ok(())
}
