//! Shared header checkers.
//!
//! Every typed assertion validates its headers through these helpers so
//! error wording stays uniform across types.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use assertd_types::time::parse_rfc3339;
use assertd_types::{HeaderValue, Headers};

pub(crate) static VALID_ACCOUNT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-z0-9A-Z]{2,}$").unwrap());

pub(crate) static VALID_COMMAND_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-zA-Z0-9][-_.a-zA-Z0-9]*$").unwrap());

pub(crate) static VALID_PROVENANCE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-zA-Z0-9](?:-?[a-zA-Z0-9])*$").unwrap());

pub(crate) static VALID_KEY_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-zA-Z](?:-?[a-zA-Z0-9])*$").unwrap());

pub(crate) fn check_mandatory<'a>(
    headers: &'a Headers,
    name: &str,
) -> Result<&'a HeaderValue, String> {
    headers
        .get(name)
        .ok_or_else(|| format!("{name:?} header is mandatory"))
}

pub(crate) fn check_string<'a>(headers: &'a Headers, name: &str) -> Result<&'a str, String> {
    check_mandatory(headers, name)?
        .as_str()
        .ok_or_else(|| format!("{name:?} header must be a string"))
}

pub(crate) fn check_nonempty_string<'a>(
    headers: &'a Headers,
    name: &str,
) -> Result<&'a str, String> {
    let s = check_string(headers, name)?;
    if s.is_empty() {
        return Err(format!("{name:?} header should not be empty"));
    }
    Ok(s)
}

pub(crate) fn check_optional_string<'a>(
    headers: &'a Headers,
    name: &str,
) -> Result<Option<&'a str>, String> {
    match headers.get(name) {
        None => Ok(None),
        Some(v) => v
            .as_str()
            .map(Some)
            .ok_or_else(|| format!("{name:?} header must be a string")),
    }
}

pub(crate) fn check_optional_nonempty_string<'a>(
    headers: &'a Headers,
    name: &str,
) -> Result<Option<&'a str>, String> {
    match check_optional_string(headers, name)? {
        None => Ok(None),
        Some("") => Err(format!("{name:?} header should not be empty")),
        Some(s) => Ok(Some(s)),
    }
}

pub(crate) fn check_optional_string_list(
    headers: &Headers,
    name: &str,
) -> Result<Option<Vec<String>>, String> {
    let v = match headers.get(name) {
        None => return Ok(None),
        Some(v) => v,
    };
    v.as_string_list()
        .map(Some)
        .ok_or_else(|| format!("{name:?} header must be a list of strings"))
}

pub(crate) fn check_optional_string_list_matches(
    headers: &Headers,
    name: &str,
    pattern: &Regex,
) -> Result<Option<Vec<String>>, String> {
    let items = match check_optional_string_list(headers, name)? {
        None => return Ok(None),
        Some(items) => items,
    };
    for item in &items {
        if !pattern.is_match(item) {
            return Err(format!(
                "{name:?} header contains an invalid element: {item:?}"
            ));
        }
    }
    Ok(Some(items))
}

fn int_of(s: &str, name: &str) -> Result<i64, String> {
    if s.is_empty() {
        return Err(format!("{name:?} header should not be empty"));
    }
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("{name:?} header is not an integer: {s}"));
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return Err(format!("{name:?} header has invalid prefix zeros: {s}"));
    }
    s.parse::<i64>()
        .map_err(|_| format!("{name:?} header is out of range: {s}"))
}

pub(crate) fn check_int_min(headers: &Headers, name: &str, min: i64) -> Result<i64, String> {
    let s = check_string(headers, name)?;
    let n = int_of(s, name)?;
    if n < min {
        return Err(format!("{name:?} header must be >={min}: {n}"));
    }
    Ok(n)
}

pub(crate) fn check_optional_int_min(
    headers: &Headers,
    name: &str,
    min: i64,
    default: i64,
) -> Result<i64, String> {
    match headers.get(name) {
        None => Ok(default),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| format!("{name:?} header must be a string"))?;
            let n = int_of(s, name)?;
            if n < min {
                return Err(format!("{name:?} header must be >={min}: {n}"));
            }
            Ok(n)
        }
    }
}

pub(crate) fn check_uint(headers: &Headers, name: &str) -> Result<u64, String> {
    let s = check_string(headers, name)?;
    if s.is_empty() {
        return Err(format!("{name:?} header should not be empty"));
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("{name:?} header is not an unsigned integer: {s}"));
    }
    if s.len() > 1 && s.starts_with('0') {
        return Err(format!("{name:?} header has invalid prefix zeros: {s}"));
    }
    s.parse::<u64>()
        .map_err(|_| format!("{name:?} header is out of range: {s}"))
}

pub(crate) fn check_rfc3339(headers: &Headers, name: &str) -> Result<DateTime<Utc>, String> {
    let s = check_nonempty_string(headers, name)?;
    parse_rfc3339(s).map_err(|e| format!("{name:?} header is not a RFC3339 date: {e}"))
}

pub(crate) fn check_optional_map<'a>(
    headers: &'a Headers,
    name: &str,
) -> Result<Option<&'a std::collections::BTreeMap<String, HeaderValue>>, String> {
    match headers.get(name) {
        None => Ok(None),
        Some(v) => v
            .as_map()
            .map(Some)
            .ok_or_else(|| format!("{name:?} header must be a map")),
    }
}

pub(crate) fn check_flag(headers: &Headers, name: &str) -> Result<bool, String> {
    match headers.get(name).and_then(HeaderValue::as_str) {
        None => Ok(false),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(_) => Err(format!("{name:?} header must be 'true' or 'false'")),
    }
}

/// Checks a URL-safe base64 digest header against an expected bit length.
pub(crate) fn check_digest(
    headers: &Headers,
    name: &str,
    bits: usize,
) -> Result<String, String> {
    let s = check_nonempty_string(headers, name)?;
    let raw = URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|e| format!("{name:?} header cannot be decoded: {e}"))?;
    if raw.len() * 8 != bits {
        return Err(format!(
            "{name:?} header does not have the expected bit length: {}",
            raw.len() * 8
        ));
    }
    Ok(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), HeaderValue::Str(v.to_string())))
            .collect()
    }

    #[test]
    fn mandatory_and_empty() {
        let h = headers(&[("series", "")]);
        assert_eq!(
            check_nonempty_string(&h, "series").unwrap_err(),
            "\"series\" header should not be empty"
        );
        assert_eq!(
            check_nonempty_string(&h, "snap-id").unwrap_err(),
            "\"snap-id\" header is mandatory"
        );
    }

    #[test]
    fn uint_errors() {
        let h = headers(&[("a", "-1"), ("b", "zzz"), ("c", "010"), ("d", "99999999999999999999")]);
        assert_eq!(
            check_uint(&h, "a").unwrap_err(),
            "\"a\" header is not an unsigned integer: -1"
        );
        assert_eq!(
            check_uint(&h, "b").unwrap_err(),
            "\"b\" header is not an unsigned integer: zzz"
        );
        assert_eq!(
            check_uint(&h, "c").unwrap_err(),
            "\"c\" header has invalid prefix zeros: 010"
        );
        assert_eq!(
            check_uint(&h, "d").unwrap_err(),
            "\"d\" header is out of range: 99999999999999999999"
        );
    }

    #[test]
    fn int_min_errors() {
        let h = headers(&[("snap-revision", "0"), ("x", "zzz")]);
        assert_eq!(
            check_int_min(&h, "snap-revision", 1).unwrap_err(),
            "\"snap-revision\" header must be >=1: 0"
        );
        assert_eq!(
            check_int_min(&h, "x", 1).unwrap_err(),
            "\"x\" header is not an integer: zzz"
        );
    }

    #[test]
    fn rfc3339_errors() {
        let h = headers(&[("timestamp", "12:30")]);
        assert!(check_rfc3339(&h, "timestamp")
            .unwrap_err()
            .starts_with("\"timestamp\" header is not a RFC3339 date:"));
    }

    #[test]
    fn flag_values() {
        let h = headers(&[("revoked", "true")]);
        assert!(check_flag(&h, "revoked").unwrap());
        let h = headers(&[("revoked", "foo")]);
        assert_eq!(
            check_flag(&h, "revoked").unwrap_err(),
            "\"revoked\" header must be 'true' or 'false'"
        );
    }

    #[test]
    fn digest_length() {
        let h = headers(&[("snap-sha3-384", "eHl6")]);
        assert_eq!(
            check_digest(&h, "snap-sha3-384", 384).unwrap_err(),
            "\"snap-sha3-384\" header does not have the expected bit length: 24"
        );
        let h = headers(&[("snap-sha3-384", "#")]);
        assert!(check_digest(&h, "snap-sha3-384", 384)
            .unwrap_err()
            .starts_with("\"snap-sha3-384\" header cannot be decoded:"));
    }
}
