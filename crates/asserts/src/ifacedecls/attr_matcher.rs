//! Attribute matchers.
//!
//! An attribute constraint is a literal scalar, a `/regex/`, a `!`
//! negation, a list of alternatives, a substitution token resolved
//! against the peer side, or a nested map of constraints.

use std::collections::BTreeMap;

use regex::Regex;

use assertd_types::HeaderValue;

/// Read access to an attribute set by dotted path.
pub trait Attrer {
    /// Looks up a (possibly nested) attribute.
    fn lookup(&self, path: &str) -> Option<HeaderValue>;
}

impl Attrer for BTreeMap<String, HeaderValue> {
    fn lookup(&self, path: &str) -> Option<HeaderValue> {
        let mut current: Option<&HeaderValue> = None;
        for comp in path.split('.') {
            current = match current {
                None => self.get(comp),
                Some(HeaderValue::Map(m)) => m.get(comp),
                Some(_) => return None,
            };
            current?;
        }
        current.cloned()
    }
}

/// Evaluation-time context for substitution tokens.
#[derive(Default)]
pub struct AttrMatchContext<'a> {
    /// The plug side's attributes, for `$PLUG(name)`.
    pub plug: Option<&'a dyn Attrer>,
    /// The slot side's attributes, for `$SLOT(name)`.
    pub slot: Option<&'a dyn Attrer>,
    /// The plug snap's publisher, for `$PLUG_PUBLISHER_ID`.
    pub plug_publisher_id: Option<&'a str>,
    /// The slot snap's publisher, for `$SLOT_PUBLISHER_ID`.
    pub slot_publisher_id: Option<&'a str>,
}

/// A compiled attribute matcher for one side of a rule entry.
#[derive(Debug, Clone)]
pub enum AttrMatcher {
    /// Matches every attribute set; spelled `true` in a rule.
    Always,
    /// Matches no attribute set; spelled `false` in a rule.
    Never,
    /// Per-attribute constraints that must all hold.
    Fields(BTreeMap<String, AttrConstraint>),
}

/// A single compiled attribute constraint.
#[derive(Debug, Clone)]
pub enum AttrConstraint {
    /// Exact string equality against the stringified value.
    Literal(String),
    /// Anchored regular expression from a `/…/` form.
    Regexp(Regex),
    /// Matches iff the inner constraint does not.
    Not(Box<AttrConstraint>),
    /// Matches iff any alternative matches.
    Alternatives(Vec<AttrConstraint>),
    /// Equality against the named attribute on the slot side.
    SlotAttr(String),
    /// Equality against the named attribute on the plug side.
    PlugAttr(String),
    /// Equality against the plug snap's publisher id.
    PlugPublisherId,
    /// Equality against the slot snap's publisher id.
    SlotPublisherId,
    /// Constraints over a nested attribute map.
    Nested(BTreeMap<String, AttrConstraint>),
}

impl AttrMatcher {
    /// Whether this is the always-match sentinel.
    pub fn is_always(&self) -> bool {
        matches!(self, AttrMatcher::Always)
    }

    /// Whether this is the never-match sentinel.
    pub fn is_never(&self) -> bool {
        matches!(self, AttrMatcher::Never)
    }

    /// Checks the matcher against an attribute set.
    pub fn check(
        &self,
        target: &dyn Attrer,
        ctx: Option<&AttrMatchContext<'_>>,
    ) -> Result<(), String> {
        match self {
            AttrMatcher::Always => Ok(()),
            AttrMatcher::Never => Err("attributes never match".to_string()),
            AttrMatcher::Fields(fields) => {
                for (name, constraint) in fields {
                    match target.lookup(name) {
                        None => {
                            return Err(format!(
                                "attribute {name:?} has constraints but is unset"
                            ))
                        }
                        Some(value) => match_constraint(name, constraint, &value, ctx)?,
                    }
                }
                Ok(())
            }
        }
    }
}

fn scalar_of(v: &HeaderValue) -> Option<&str> {
    v.as_str()
}

fn match_constraint(
    path: &str,
    constraint: &AttrConstraint,
    value: &HeaderValue,
    ctx: Option<&AttrMatchContext<'_>>,
) -> Result<(), String> {
    // a list value matches when every element does
    if let HeaderValue::List(items) = value {
        if !matches!(constraint, AttrConstraint::Nested(_)) {
            for item in items {
                match_constraint(path, constraint, item, ctx)?;
            }
            return Ok(());
        }
    }
    match constraint {
        AttrConstraint::Literal(expected) => match scalar_of(value) {
            Some(got) if got == expected => Ok(()),
            Some(got) => Err(format!(
                "attribute {path:?} value {got:?} does not match {expected:?}"
            )),
            None => Err(format!("attribute {path:?} is not a scalar value")),
        },
        AttrConstraint::Regexp(re) => match scalar_of(value) {
            Some(got) if re.is_match(got) => Ok(()),
            Some(got) => Err(format!(
                "attribute {path:?} value {got:?} does not match {:?}",
                re.as_str()
            )),
            None => Err(format!("attribute {path:?} is not a scalar value")),
        },
        AttrConstraint::Not(inner) => {
            match match_constraint(path, inner, value, ctx) {
                Ok(()) => Err(format!("attribute {path:?} matches excluded constraint")),
                Err(_) => Ok(()),
            }
        }
        AttrConstraint::Alternatives(alts) => {
            for alt in alts {
                if match_constraint(path, alt, value, ctx).is_ok() {
                    return Ok(());
                }
            }
            Err(format!("attribute {path:?} does not match any alternative"))
        }
        AttrConstraint::SlotAttr(name) => {
            let slot = ctx
                .and_then(|c| c.slot)
                .ok_or_else(|| format!("attribute {path:?} cannot be matched: no slot side"))?;
            match slot.lookup(name) {
                Some(peer) if &peer == value => Ok(()),
                _ => Err(format!(
                    "attribute {path:?} does not match slot attribute {name:?}"
                )),
            }
        }
        AttrConstraint::PlugAttr(name) => {
            let plug = ctx
                .and_then(|c| c.plug)
                .ok_or_else(|| format!("attribute {path:?} cannot be matched: no plug side"))?;
            match plug.lookup(name) {
                Some(peer) if &peer == value => Ok(()),
                _ => Err(format!(
                    "attribute {path:?} does not match plug attribute {name:?}"
                )),
            }
        }
        AttrConstraint::PlugPublisherId => {
            let publisher = ctx
                .and_then(|c| c.plug_publisher_id)
                .ok_or_else(|| format!("attribute {path:?} cannot be matched: no plug publisher"))?;
            match scalar_of(value) {
                Some(got) if got == publisher => Ok(()),
                _ => Err(format!(
                    "attribute {path:?} does not match the plug publisher id"
                )),
            }
        }
        AttrConstraint::SlotPublisherId => {
            let publisher = ctx
                .and_then(|c| c.slot_publisher_id)
                .ok_or_else(|| format!("attribute {path:?} cannot be matched: no slot publisher"))?;
            match scalar_of(value) {
                Some(got) if got == publisher => Ok(()),
                _ => Err(format!(
                    "attribute {path:?} does not match the slot publisher id"
                )),
            }
        }
        AttrConstraint::Nested(fields) => {
            let map = value
                .as_map()
                .ok_or_else(|| format!("attribute {path:?} is not a map"))?;
            for (name, nested) in fields {
                let sub_path = format!("{path}.{name}");
                match map.get(name) {
                    None => {
                        return Err(format!(
                            "attribute {sub_path:?} has constraints but is unset"
                        ))
                    }
                    Some(sub) => match_constraint(&sub_path, nested, sub, ctx)?,
                }
            }
            Ok(())
        }
    }
}

pub(crate) fn compile_attr_matcher(
    context: &str,
    v: &HeaderValue,
) -> Result<AttrMatcher, String> {
    let map = v
        .as_map()
        .ok_or_else(|| format!("{context} must be a map"))?;
    let mut fields = BTreeMap::new();
    for (name, value) in map {
        fields.insert(name.clone(), compile_constraint(context, name, value)?);
    }
    Ok(AttrMatcher::Fields(fields))
}

fn compile_constraint(
    context: &str,
    name: &str,
    v: &HeaderValue,
) -> Result<AttrConstraint, String> {
    match v {
        HeaderValue::Str(s) => {
            if let Some(rest) = s.strip_prefix('!') {
                return Ok(AttrConstraint::Not(Box::new(compile_scalar(
                    context, name, rest,
                )?)));
            }
            compile_scalar(context, name, s)
        }
        HeaderValue::List(items) => {
            let mut alts = Vec::with_capacity(items.len());
            for item in items {
                alts.push(compile_constraint(context, name, item)?);
            }
            Ok(AttrConstraint::Alternatives(alts))
        }
        HeaderValue::Map(m) => {
            let mut fields = BTreeMap::new();
            for (key, value) in m {
                fields.insert(key.clone(), compile_constraint(context, key, value)?);
            }
            Ok(AttrConstraint::Nested(fields))
        }
    }
}

fn compile_scalar(context: &str, name: &str, s: &str) -> Result<AttrConstraint, String> {
    if s == "$PLUG_PUBLISHER_ID" {
        return Ok(AttrConstraint::PlugPublisherId);
    }
    if s == "$SLOT_PUBLISHER_ID" {
        return Ok(AttrConstraint::SlotPublisherId);
    }
    if let Some(inner) = s.strip_prefix("$SLOT(").and_then(|r| r.strip_suffix(')')) {
        if inner.is_empty() {
            return Err(format!(
                "attribute constraint {name:?} in {context} has an empty $SLOT() reference"
            ));
        }
        return Ok(AttrConstraint::SlotAttr(inner.to_string()));
    }
    if let Some(inner) = s.strip_prefix("$PLUG(").and_then(|r| r.strip_suffix(')')) {
        if inner.is_empty() {
            return Err(format!(
                "attribute constraint {name:?} in {context} has an empty $PLUG() reference"
            ));
        }
        return Ok(AttrConstraint::PlugAttr(inner.to_string()));
    }
    if s.starts_with('$') {
        return Err(format!(
            "attribute constraint {name:?} in {context} uses an unknown special form: {s:?}"
        ));
    }
    if s.len() >= 2 && s.starts_with('/') && s.ends_with('/') {
        let body = &s[1..s.len() - 1];
        let re = Regex::new(&format!("^(?:{body})$")).map_err(|e| {
            format!("cannot compile {name:?} constraint {s:?} in {context}: {e}")
        })?;
        return Ok(AttrConstraint::Regexp(re));
    }
    Ok(AttrConstraint::Literal(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, HeaderValue)]) -> BTreeMap<String, HeaderValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn matcher(pairs: &[(&str, HeaderValue)]) -> AttrMatcher {
        compile_attr_matcher("plug-attributes", &HeaderValue::Map(attrs(pairs))).unwrap()
    }

    #[test]
    fn always_matches_everything_never_matches_nothing() {
        let empty = attrs(&[]);
        assert!(AttrMatcher::Always.check(&empty, None).is_ok());
        assert!(AttrMatcher::Never.check(&empty, None).is_err());

        let some = attrs(&[("a", HeaderValue::Str("x".into()))]);
        assert!(AttrMatcher::Always.check(&some, None).is_ok());
        assert!(AttrMatcher::Never.check(&some, None).is_err());
    }

    #[test]
    fn literal_match() {
        let m = matcher(&[("a1", HeaderValue::Str("A1".into()))]);
        let good = attrs(&[("a1", HeaderValue::Str("A1".into()))]);
        let bad = attrs(&[("a1", HeaderValue::Str("other".into()))]);
        assert!(m.check(&good, None).is_ok());
        let err = m.check(&bad, None).unwrap_err();
        assert!(err.starts_with("attribute \"a1\""));
        let unset = attrs(&[]);
        assert!(m
            .check(&unset, None)
            .unwrap_err()
            .contains("has constraints but is unset"));
    }

    #[test]
    fn regex_is_anchored() {
        let m = matcher(&[("path", HeaderValue::Str("/foo-.*/".into()))]);
        let good = attrs(&[("path", HeaderValue::Str("foo-bar".into()))]);
        let bad = attrs(&[("path", HeaderValue::Str("xfoo-bar".into()))]);
        assert!(m.check(&good, None).is_ok());
        assert!(m.check(&bad, None).is_err());
    }

    #[test]
    fn negation() {
        let m = matcher(&[("a1", HeaderValue::Str("!A1".into()))]);
        let excluded = attrs(&[("a1", HeaderValue::Str("A1".into()))]);
        let other = attrs(&[("a1", HeaderValue::Str("B1".into()))]);
        assert!(m.check(&excluded, None).is_err());
        assert!(m.check(&other, None).is_ok());
    }

    #[test]
    fn alternatives() {
        let m = matcher(&[(
            "a",
            HeaderValue::List(vec![
                HeaderValue::Str("alt1".into()),
                HeaderValue::Str("alt2".into()),
            ]),
        )]);
        let good = attrs(&[("a", HeaderValue::Str("alt2".into()))]);
        let bad = attrs(&[("a", HeaderValue::Str("alt3".into()))]);
        assert!(m.check(&good, None).is_ok());
        assert!(m.check(&bad, None).is_err());
    }

    #[test]
    fn list_values_must_all_match() {
        let m = matcher(&[("a", HeaderValue::Str("/x[0-9]/".into()))]);
        let good = attrs(&[(
            "a",
            HeaderValue::List(vec![
                HeaderValue::Str("x1".into()),
                HeaderValue::Str("x2".into()),
            ]),
        )]);
        let bad = attrs(&[(
            "a",
            HeaderValue::List(vec![
                HeaderValue::Str("x1".into()),
                HeaderValue::Str("nope".into()),
            ]),
        )]);
        assert!(m.check(&good, None).is_ok());
        assert!(m.check(&bad, None).is_err());
    }

    #[test]
    fn slot_substitution_resolves_against_peer() {
        let m = matcher(&[("a", HeaderValue::Str("$SLOT(b)".into()))]);
        let plug_attrs = attrs(&[("a", HeaderValue::Str("same".into()))]);
        let slot_attrs = attrs(&[("b", HeaderValue::Str("same".into()))]);
        let ctx = AttrMatchContext {
            slot: Some(&slot_attrs),
            ..Default::default()
        };
        assert!(m.check(&plug_attrs, Some(&ctx)).is_ok());

        let slot_attrs = attrs(&[("b", HeaderValue::Str("different".into()))]);
        let ctx = AttrMatchContext {
            slot: Some(&slot_attrs),
            ..Default::default()
        };
        assert!(m.check(&plug_attrs, Some(&ctx)).is_err());
        // without a peer the constraint cannot hold
        assert!(m.check(&plug_attrs, None).is_err());
    }

    #[test]
    fn publisher_substitution() {
        let m = matcher(&[("allowed", HeaderValue::Str("$SLOT_PUBLISHER_ID".into()))]);
        let plug_attrs = attrs(&[("allowed", HeaderValue::Str("acme".into()))]);
        let ctx = AttrMatchContext {
            slot_publisher_id: Some("acme"),
            ..Default::default()
        };
        assert!(m.check(&plug_attrs, Some(&ctx)).is_ok());
        let ctx = AttrMatchContext {
            slot_publisher_id: Some("evil"),
            ..Default::default()
        };
        assert!(m.check(&plug_attrs, Some(&ctx)).is_err());
    }

    #[test]
    fn nested_constraints() {
        let m = matcher(&[(
            "outer",
            HeaderValue::Map(attrs(&[("inner", HeaderValue::Str("v".into()))])),
        )]);
        let good = attrs(&[(
            "outer",
            HeaderValue::Map(attrs(&[("inner", HeaderValue::Str("v".into()))])),
        )]);
        let bad = attrs(&[("outer", HeaderValue::Map(attrs(&[])))]);
        assert!(m.check(&good, None).is_ok());
        assert!(m
            .check(&bad, None)
            .unwrap_err()
            .contains("\"outer.inner\""));
    }

    #[test]
    fn unknown_special_form_is_rejected() {
        let v = HeaderValue::Map(attrs(&[("a", HeaderValue::Str("$WHAT".into()))]));
        assert!(compile_attr_matcher("plug-attributes", &v).is_err());
    }
}
