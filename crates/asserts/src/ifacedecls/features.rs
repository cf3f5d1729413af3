//! Format-feature detection for declaration rules.
//!
//! Newer rule features require newer assertion formats. This scan walks
//! the raw `plugs`/`slots` header values and reports the lowest format
//! able to express them: rules at all need 1, `$SLOT`/`$PLUG`
//! substitutions 2, device scope 3, plug-/slot-names 4, alternative
//! attribute matchers 5 and publisher-id substitutions 6.

use std::collections::BTreeMap;

use assertd_types::{HeaderValue, Headers};

const ATTRIBUTE_KEYS: [&str; 2] = ["plug-attributes", "slot-attributes"];
const DEVICE_SCOPE_KEYS: [&str; 3] = ["on-store", "on-brand", "on-model"];
const NAME_KEYS: [&str; 2] = ["plug-names", "slot-names"];

pub(crate) fn suggest_format_for_decl(headers: &Headers) -> Result<i32, String> {
    let mut format = 0;
    for side in ["plugs", "slots"] {
        let rules = match headers.get(side) {
            None => continue,
            Some(v) => v
                .as_map()
                .ok_or_else(|| format!("{side:?} header must be a map"))?,
        };
        format = format.max(1);
        for rule in rules.values() {
            let rule_map = match rule.as_map() {
                Some(m) => m,
                // bare true/false carries no versioned features
                None => continue,
            };
            for subrule in rule_map.values() {
                match subrule {
                    HeaderValue::Map(m) => format = format.max(scan_subrule(m)),
                    HeaderValue::List(items) => {
                        for item in items {
                            if let Some(m) = item.as_map() {
                                format = format.max(scan_subrule(m));
                            }
                        }
                    }
                    HeaderValue::Str(_) => {}
                }
            }
        }
    }
    Ok(format)
}

fn scan_subrule(subrule: &BTreeMap<String, HeaderValue>) -> i32 {
    let mut format = 0;
    for key in DEVICE_SCOPE_KEYS {
        if subrule.contains_key(key) {
            format = format.max(3);
        }
    }
    for key in NAME_KEYS {
        if subrule.contains_key(key) {
            format = format.max(4);
        }
    }
    for key in ATTRIBUTE_KEYS {
        if let Some(HeaderValue::Map(attrs)) = subrule.get(key) {
            for constraint in attrs.values() {
                format = format.max(scan_constraint(constraint));
            }
        }
    }
    format
}

fn scan_constraint(v: &HeaderValue) -> i32 {
    match v {
        HeaderValue::Str(s) => {
            if s == "$PLUG_PUBLISHER_ID" || s == "$SLOT_PUBLISHER_ID" {
                6
            } else if s.starts_with("$SLOT(") || s.starts_with("$PLUG(") {
                2
            } else {
                0
            }
        }
        HeaderValue::List(items) => {
            // an alternatives matcher by itself needs format 5
            let mut format = 5;
            for item in items {
                format = format.max(scan_constraint(item));
            }
            format
        }
        HeaderValue::Map(m) => {
            let mut format = 0;
            for nested in m.values() {
                format = format.max(scan_constraint(nested));
            }
            format
        }
    }
}
