//! Per-interface plug and slot rules.
//!
//! A rule carries six entry lists: allow/deny for installation,
//! connection and auto-connection. A list matches when any entry does;
//! deny wins over allow.

use std::collections::BTreeMap;

use assertd_types::HeaderValue;

use super::attr_matcher::{compile_attr_matcher, AttrMatchContext, AttrMatcher, Attrer};
use super::device_scope::{compile_device_scope, DeviceScopeConstraint};
use crate::model::ModelDetails;
use crate::store_assert::StoreDetails;

const RULE_SUBRULES: [&str; 6] = [
    "allow-installation",
    "deny-installation",
    "allow-connection",
    "deny-connection",
    "allow-auto-connection",
    "deny-auto-connection",
];

/// The outcome of evaluating a candidate against a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// An allow entry matched and no deny entry did.
    Allowed,
    /// A deny entry matched, or no allow entry did.
    Denied,
}

/// Installation constraints on the plug side.
#[derive(Debug, Clone)]
pub struct PlugInstallationConstraints {
    /// Constraints over the plug's attributes.
    pub plug_attributes: AttrMatcher,
    /// Snap types the plug's snap must be one of; empty means any.
    pub plug_snap_types: Vec<String>,
    /// Plug names the entry applies to; empty means any.
    pub plug_names: Vec<String>,
    /// Device scope of the entry.
    pub device_scope: Option<DeviceScopeConstraint>,
}

/// Connection constraints declared from the plug side.
#[derive(Debug, Clone)]
pub struct PlugConnectionConstraints {
    /// Constraints over the plug's attributes.
    pub plug_attributes: AttrMatcher,
    /// Constraints over the peer slot's attributes.
    pub slot_attributes: AttrMatcher,
    /// Snap types the slot's snap must be one of; empty means any.
    pub slot_snap_types: Vec<String>,
    /// Publishers the slot's snap must belong to; empty means any.
    pub slot_publisher_ids: Vec<String>,
    /// Snap ids the slot's snap must be one of; empty means any.
    pub slot_snap_ids: Vec<String>,
    /// Plug names the entry applies to; empty means any.
    pub plug_names: Vec<String>,
    /// Slot names the entry applies to; empty means any.
    pub slot_names: Vec<String>,
    /// Device scope of the entry.
    pub device_scope: Option<DeviceScopeConstraint>,
}

/// Installation constraints on the slot side.
#[derive(Debug, Clone)]
pub struct SlotInstallationConstraints {
    /// Constraints over the slot's attributes.
    pub slot_attributes: AttrMatcher,
    /// Snap types the slot's snap must be one of; empty means any.
    pub slot_snap_types: Vec<String>,
    /// Slot names the entry applies to; empty means any.
    pub slot_names: Vec<String>,
    /// Device scope of the entry.
    pub device_scope: Option<DeviceScopeConstraint>,
}

/// Connection constraints declared from the slot side.
#[derive(Debug, Clone)]
pub struct SlotConnectionConstraints {
    /// Constraints over the slot's attributes.
    pub slot_attributes: AttrMatcher,
    /// Constraints over the peer plug's attributes.
    pub plug_attributes: AttrMatcher,
    /// Snap types the plug's snap must be one of; empty means any.
    pub plug_snap_types: Vec<String>,
    /// Publishers the plug's snap must belong to; empty means any.
    pub plug_publisher_ids: Vec<String>,
    /// Snap ids the plug's snap must be one of; empty means any.
    pub plug_snap_ids: Vec<String>,
    /// Plug names the entry applies to; empty means any.
    pub plug_names: Vec<String>,
    /// Slot names the entry applies to; empty means any.
    pub slot_names: Vec<String>,
    /// Device scope of the entry.
    pub device_scope: Option<DeviceScopeConstraint>,
}

/// The compiled rule for one interface on the plug side.
#[derive(Debug, Clone)]
pub struct PlugRule {
    /// The interface the rule is about.
    pub interface: String,
    pub allow_installation: Vec<PlugInstallationConstraints>,
    pub deny_installation: Vec<PlugInstallationConstraints>,
    pub allow_connection: Vec<PlugConnectionConstraints>,
    pub deny_connection: Vec<PlugConnectionConstraints>,
    pub allow_auto_connection: Vec<PlugConnectionConstraints>,
    pub deny_auto_connection: Vec<PlugConnectionConstraints>,
}

/// The compiled rule for one interface on the slot side.
#[derive(Debug, Clone)]
pub struct SlotRule {
    /// The interface the rule is about.
    pub interface: String,
    pub allow_installation: Vec<SlotInstallationConstraints>,
    pub deny_installation: Vec<SlotInstallationConstraints>,
    pub allow_connection: Vec<SlotConnectionConstraints>,
    pub deny_connection: Vec<SlotConnectionConstraints>,
    pub allow_auto_connection: Vec<SlotConnectionConstraints>,
    pub deny_auto_connection: Vec<SlotConnectionConstraints>,
}

/// A snap being installed, as seen by installation rules.
pub struct InstallationCandidate<'a> {
    /// The plug's or slot's attributes.
    pub attrs: &'a dyn Attrer,
    /// The snap's type.
    pub snap_type: &'a str,
    /// The plug or slot name.
    pub name: &'a str,
    /// The device's model, when evaluating device-scoped entries.
    pub model: Option<&'a ModelDetails>,
    /// A store assertion vouching for friendly stores.
    pub store: Option<&'a StoreDetails>,
}

/// A plug/slot pair being connected.
pub struct ConnectionCandidate<'a> {
    pub plug_attrs: &'a dyn Attrer,
    pub slot_attrs: &'a dyn Attrer,
    pub plug_snap_type: &'a str,
    pub slot_snap_type: &'a str,
    pub plug_publisher_id: &'a str,
    pub slot_publisher_id: &'a str,
    pub plug_snap_id: &'a str,
    pub slot_snap_id: &'a str,
    pub plug_name: &'a str,
    pub slot_name: &'a str,
    /// The device's model, when evaluating device-scoped entries.
    pub model: Option<&'a ModelDetails>,
    /// A store assertion vouching for friendly stores.
    pub store: Option<&'a StoreDetails>,
}

fn member_or_any(list: &[String], value: &str) -> bool {
    list.is_empty() || list.iter().any(|item| item == value)
}

fn device_scope_holds(
    scope: &Option<DeviceScopeConstraint>,
    model: Option<&ModelDetails>,
    store: Option<&StoreDetails>,
) -> bool {
    match scope {
        None => true,
        Some(ds) => match model {
            None => false,
            Some(m) => ds.check(m, store).is_ok(),
        },
    }
}

impl PlugConnectionConstraints {
    fn matches(&self, cand: &ConnectionCandidate<'_>) -> bool {
        let ctx = AttrMatchContext {
            plug: Some(cand.plug_attrs),
            slot: Some(cand.slot_attrs),
            plug_publisher_id: Some(cand.plug_publisher_id),
            slot_publisher_id: Some(cand.slot_publisher_id),
        };
        member_or_any(&self.slot_snap_types, cand.slot_snap_type)
            && member_or_any(&self.slot_publisher_ids, cand.slot_publisher_id)
            && member_or_any(&self.slot_snap_ids, cand.slot_snap_id)
            && member_or_any(&self.plug_names, cand.plug_name)
            && member_or_any(&self.slot_names, cand.slot_name)
            && device_scope_holds(&self.device_scope, cand.model, cand.store)
            && self.plug_attributes.check(cand.plug_attrs, Some(&ctx)).is_ok()
            && self.slot_attributes.check(cand.slot_attrs, Some(&ctx)).is_ok()
    }
}

impl SlotConnectionConstraints {
    fn matches(&self, cand: &ConnectionCandidate<'_>) -> bool {
        let ctx = AttrMatchContext {
            plug: Some(cand.plug_attrs),
            slot: Some(cand.slot_attrs),
            plug_publisher_id: Some(cand.plug_publisher_id),
            slot_publisher_id: Some(cand.slot_publisher_id),
        };
        member_or_any(&self.plug_snap_types, cand.plug_snap_type)
            && member_or_any(&self.plug_publisher_ids, cand.plug_publisher_id)
            && member_or_any(&self.plug_snap_ids, cand.plug_snap_id)
            && member_or_any(&self.plug_names, cand.plug_name)
            && member_or_any(&self.slot_names, cand.slot_name)
            && device_scope_holds(&self.device_scope, cand.model, cand.store)
            && self.plug_attributes.check(cand.plug_attrs, Some(&ctx)).is_ok()
            && self.slot_attributes.check(cand.slot_attrs, Some(&ctx)).is_ok()
    }
}

impl PlugInstallationConstraints {
    fn matches(&self, cand: &InstallationCandidate<'_>) -> bool {
        member_or_any(&self.plug_snap_types, cand.snap_type)
            && member_or_any(&self.plug_names, cand.name)
            && device_scope_holds(&self.device_scope, cand.model, cand.store)
            && self.plug_attributes.check(cand.attrs, None).is_ok()
    }
}

impl SlotInstallationConstraints {
    fn matches(&self, cand: &InstallationCandidate<'_>) -> bool {
        member_or_any(&self.slot_snap_types, cand.snap_type)
            && member_or_any(&self.slot_names, cand.name)
            && device_scope_holds(&self.device_scope, cand.model, cand.store)
            && self.slot_attributes.check(cand.attrs, None).is_ok()
    }
}

fn decide(denied: bool, allowed: bool) -> Decision {
    if denied || !allowed {
        Decision::Denied
    } else {
        Decision::Allowed
    }
}

impl PlugRule {
    /// Evaluates a connection (or auto-connection) candidate.
    pub fn check_connection(&self, cand: &ConnectionCandidate<'_>, auto: bool) -> Decision {
        let (deny, allow) = if auto {
            (&self.deny_auto_connection, &self.allow_auto_connection)
        } else {
            (&self.deny_connection, &self.allow_connection)
        };
        decide(
            deny.iter().any(|c| c.matches(cand)),
            allow.iter().any(|c| c.matches(cand)),
        )
    }

    /// Evaluates an installation candidate.
    pub fn check_installation(&self, cand: &InstallationCandidate<'_>) -> Decision {
        decide(
            self.deny_installation.iter().any(|c| c.matches(cand)),
            self.allow_installation.iter().any(|c| c.matches(cand)),
        )
    }
}

impl SlotRule {
    /// Evaluates a connection (or auto-connection) candidate.
    pub fn check_connection(&self, cand: &ConnectionCandidate<'_>, auto: bool) -> Decision {
        let (deny, allow) = if auto {
            (&self.deny_auto_connection, &self.allow_auto_connection)
        } else {
            (&self.deny_connection, &self.allow_connection)
        };
        decide(
            deny.iter().any(|c| c.matches(cand)),
            allow.iter().any(|c| c.matches(cand)),
        )
    }

    /// Evaluates an installation candidate.
    pub fn check_installation(&self, cand: &InstallationCandidate<'_>) -> Decision {
        decide(
            self.deny_installation.iter().any(|c| c.matches(cand)),
            self.allow_installation.iter().any(|c| c.matches(cand)),
        )
    }
}

fn string_list(
    map: &BTreeMap<String, HeaderValue>,
    key: &str,
    context: &str,
) -> Result<Vec<String>, String> {
    match map.get(key) {
        None => Ok(Vec::new()),
        Some(v) => v
            .as_string_list()
            .ok_or_else(|| format!("{key:?} in {context} must be a list of strings")),
    }
}

fn attributes(
    map: &BTreeMap<String, HeaderValue>,
    key: &str,
    context: &str,
) -> Result<AttrMatcher, String> {
    match map.get(key) {
        None => Ok(AttrMatcher::Always),
        Some(HeaderValue::Str(s)) => sentinel(s, &format!("{key} in {context}")),
        Some(v) => compile_attr_matcher(&format!("{key} in {context}"), v),
    }
}

fn sentinel(s: &str, context: &str) -> Result<AttrMatcher, String> {
    match s {
        "true" => Ok(AttrMatcher::Always),
        "false" => Ok(AttrMatcher::Never),
        other => Err(format!("{context} must be a map or 'true'/'false', got {other:?}")),
    }
}

fn subrule_maps<'a>(
    v: &'a HeaderValue,
    context: &str,
) -> Result<Vec<SubruleSource<'a>>, String> {
    match v {
        HeaderValue::Str(s) => Ok(vec![SubruleSource::Sentinel(sentinel(s, context)?)]),
        HeaderValue::Map(m) => Ok(vec![SubruleSource::Map(m)]),
        HeaderValue::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    HeaderValue::Map(m) => out.push(SubruleSource::Map(m)),
                    _ => {
                        return Err(format!(
                            "alternative entries in {context} must be maps"
                        ))
                    }
                }
            }
            Ok(out)
        }
    }
}

enum SubruleSource<'a> {
    Sentinel(AttrMatcher),
    Map(&'a BTreeMap<String, HeaderValue>),
}

macro_rules! compile_lists {
    ($rule:expr, $map:expr, $iface:expr, $side:expr, inst: $inst:ident => ($allow_inst:ident, $deny_inst:ident), conn: $conn:ident => [$(($sub:literal, $list:ident)),+ $(,)?]) => {{
        if let Some(v) = $map.get("allow-installation") {
            let context = format!("allow-installation in {} rule for interface {:?}", $side, $iface);
            for src in subrule_maps(v, &context)? {
                $rule.$allow_inst.push($inst(src, &context)?);
            }
        }
        if let Some(v) = $map.get("deny-installation") {
            let context = format!("deny-installation in {} rule for interface {:?}", $side, $iface);
            for src in subrule_maps(v, &context)? {
                $rule.$deny_inst.push($inst(src, &context)?);
            }
        }
        $(
            if let Some(v) = $map.get($sub) {
                let context = format!("{} in {} rule for interface {:?}", $sub, $side, $iface);
                for src in subrule_maps(v, &context)? {
                    $rule.$list.push($conn(src, &context)?);
                }
            }
        )+
    }};
}

fn plug_installation(
    src: SubruleSource<'_>,
    context: &str,
) -> Result<PlugInstallationConstraints, String> {
    match src {
        SubruleSource::Sentinel(matcher) => Ok(PlugInstallationConstraints {
            plug_attributes: matcher,
            plug_snap_types: Vec::new(),
            plug_names: Vec::new(),
            device_scope: None,
        }),
        SubruleSource::Map(m) => Ok(PlugInstallationConstraints {
            plug_attributes: attributes(m, "plug-attributes", context)?,
            plug_snap_types: string_list(m, "plug-snap-type", context)?,
            plug_names: string_list(m, "plug-names", context)?,
            device_scope: compile_device_scope(context, m)?,
        }),
    }
}

fn plug_connection(
    src: SubruleSource<'_>,
    context: &str,
) -> Result<PlugConnectionConstraints, String> {
    match src {
        SubruleSource::Sentinel(matcher) => Ok(PlugConnectionConstraints {
            plug_attributes: matcher.clone(),
            slot_attributes: matcher,
            slot_snap_types: Vec::new(),
            slot_publisher_ids: Vec::new(),
            slot_snap_ids: Vec::new(),
            plug_names: Vec::new(),
            slot_names: Vec::new(),
            device_scope: None,
        }),
        SubruleSource::Map(m) => Ok(PlugConnectionConstraints {
            plug_attributes: attributes(m, "plug-attributes", context)?,
            slot_attributes: attributes(m, "slot-attributes", context)?,
            slot_snap_types: string_list(m, "slot-snap-type", context)?,
            slot_publisher_ids: string_list(m, "slot-publisher-id", context)?,
            slot_snap_ids: string_list(m, "slot-snap-id", context)?,
            plug_names: string_list(m, "plug-names", context)?,
            slot_names: string_list(m, "slot-names", context)?,
            device_scope: compile_device_scope(context, m)?,
        }),
    }
}

fn slot_installation(
    src: SubruleSource<'_>,
    context: &str,
) -> Result<SlotInstallationConstraints, String> {
    match src {
        SubruleSource::Sentinel(matcher) => Ok(SlotInstallationConstraints {
            slot_attributes: matcher,
            slot_snap_types: Vec::new(),
            slot_names: Vec::new(),
            device_scope: None,
        }),
        SubruleSource::Map(m) => Ok(SlotInstallationConstraints {
            slot_attributes: attributes(m, "slot-attributes", context)?,
            slot_snap_types: string_list(m, "slot-snap-type", context)?,
            slot_names: string_list(m, "slot-names", context)?,
            device_scope: compile_device_scope(context, m)?,
        }),
    }
}

fn slot_connection(
    src: SubruleSource<'_>,
    context: &str,
) -> Result<SlotConnectionConstraints, String> {
    match src {
        SubruleSource::Sentinel(matcher) => Ok(SlotConnectionConstraints {
            slot_attributes: matcher.clone(),
            plug_attributes: matcher,
            plug_snap_types: Vec::new(),
            plug_publisher_ids: Vec::new(),
            plug_snap_ids: Vec::new(),
            plug_names: Vec::new(),
            slot_names: Vec::new(),
            device_scope: None,
        }),
        SubruleSource::Map(m) => Ok(SlotConnectionConstraints {
            slot_attributes: attributes(m, "slot-attributes", context)?,
            plug_attributes: attributes(m, "plug-attributes", context)?,
            plug_snap_types: string_list(m, "plug-snap-type", context)?,
            plug_publisher_ids: string_list(m, "plug-publisher-id", context)?,
            plug_snap_ids: string_list(m, "plug-snap-id", context)?,
            plug_names: string_list(m, "plug-names", context)?,
            slot_names: string_list(m, "slot-names", context)?,
            device_scope: compile_device_scope(context, m)?,
        }),
    }
}

fn shorthand_rule(v: &HeaderValue) -> Option<HeaderValue> {
    // a bare true/false expands to blanket allow/deny subrules
    let s = v.as_str()?;
    let mut m = BTreeMap::new();
    match s {
        "true" => {
            for sub in ["allow-installation", "allow-connection", "allow-auto-connection"] {
                m.insert(sub.to_string(), HeaderValue::Str("true".into()));
            }
        }
        "false" => {
            for sub in ["deny-installation", "deny-connection", "deny-auto-connection"] {
                m.insert(sub.to_string(), HeaderValue::Str("true".into()));
            }
        }
        _ => return None,
    }
    Some(HeaderValue::Map(m))
}

fn rule_map(
    iface: &str,
    side: &str,
    v: &HeaderValue,
) -> Result<BTreeMap<String, HeaderValue>, String> {
    let expanded = shorthand_rule(v);
    let v = expanded.as_ref().unwrap_or(v);
    let map = v.as_map().ok_or_else(|| {
        format!("{side} rule for interface {iface:?} must be a map or 'true'/'false'")
    })?;
    if !RULE_SUBRULES.iter().any(|sub| map.contains_key(*sub)) {
        return Err(format!(
            "{side} rule for interface {iface:?} must specify at least one of {}",
            RULE_SUBRULES.join(", ")
        ));
    }
    Ok(map.clone())
}

/// Compiles the rule value for one interface on the plug side.
pub(crate) fn compile_plug_rule(iface: &str, v: &HeaderValue) -> Result<PlugRule, String> {
    let map = rule_map(iface, "plug", v)?;
    let mut rule = PlugRule {
        interface: iface.to_string(),
        allow_installation: Vec::new(),
        deny_installation: Vec::new(),
        allow_connection: Vec::new(),
        deny_connection: Vec::new(),
        allow_auto_connection: Vec::new(),
        deny_auto_connection: Vec::new(),
    };
    compile_lists!(rule, map, iface, "plug",
        inst: plug_installation => (allow_installation, deny_installation),
        conn: plug_connection => [
            ("allow-connection", allow_connection),
            ("deny-connection", deny_connection),
            ("allow-auto-connection", allow_auto_connection),
            ("deny-auto-connection", deny_auto_connection),
        ]);
    Ok(rule)
}

/// Compiles the rule value for one interface on the slot side.
pub(crate) fn compile_slot_rule(iface: &str, v: &HeaderValue) -> Result<SlotRule, String> {
    let map = rule_map(iface, "slot", v)?;
    let mut rule = SlotRule {
        interface: iface.to_string(),
        allow_installation: Vec::new(),
        deny_installation: Vec::new(),
        allow_connection: Vec::new(),
        deny_connection: Vec::new(),
        allow_auto_connection: Vec::new(),
        deny_auto_connection: Vec::new(),
    };
    compile_lists!(rule, map, iface, "slot",
        inst: slot_installation => (allow_installation, deny_installation),
        conn: slot_connection => [
            ("allow-connection", allow_connection),
            ("deny-connection", deny_connection),
            ("allow-auto-connection", allow_auto_connection),
            ("deny-auto-connection", deny_auto_connection),
        ]);
    Ok(rule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertd_types::codec::parse_headers;

    fn plug_rule(text: &str) -> PlugRule {
        let headers = parse_headers(text).unwrap();
        compile_plug_rule("interface1", &headers["interface1"]).unwrap()
    }

    #[test]
    fn shorthand_true_allows_everything() {
        let rule = plug_rule("interface1: true");
        assert_eq!(rule.allow_installation.len(), 1);
        assert!(rule.allow_installation[0].plug_attributes.is_always());
        assert!(rule.allow_auto_connection[0].plug_attributes.is_always());
        assert!(rule.deny_installation.is_empty());
    }

    #[test]
    fn subrule_false_compiles_to_never() {
        let rule = plug_rule("interface1:\n  deny-installation: false");
        assert_eq!(rule.deny_installation.len(), 1);
        assert!(rule.deny_installation[0].plug_attributes.is_never());
    }

    #[test]
    fn must_specify_a_subrule() {
        let headers = parse_headers("interface1:\n  foo: bar").unwrap();
        let err = compile_plug_rule("intf1", &headers["interface1"]).unwrap_err();
        assert!(err.starts_with("plug rule for interface \"intf1\" must specify at least one of"));
    }

    #[test]
    fn connection_constraints_fields() {
        let rule = plug_rule(
            "interface1:\n  allow-auto-connection:\n    slot-snap-type:\n      - app\n    slot-publisher-id:\n      - acme\n    slot-attributes:\n      a1: A1\n    plug-attributes:\n      b1: B1",
        );
        let entry = &rule.allow_auto_connection[0];
        assert_eq!(entry.slot_snap_types, vec!["app".to_string()]);
        assert_eq!(entry.slot_publisher_ids, vec!["acme".to_string()]);
        let empty: std::collections::BTreeMap<String, HeaderValue> = Default::default();
        assert!(entry
            .slot_attributes
            .check(&empty, None)
            .unwrap_err()
            .starts_with("attribute \"a1\""));
        assert!(entry
            .plug_attributes
            .check(&empty, None)
            .unwrap_err()
            .starts_with("attribute \"b1\""));
    }

    #[test]
    fn alternative_subrule_entries() {
        let rule = plug_rule(
            "interface1:\n  allow-connection:\n    -\n      plug-attributes:\n        a: A\n    -\n      plug-attributes:\n        a: B",
        );
        assert_eq!(rule.allow_connection.len(), 2);
    }

    fn connection_candidate<'a>(
        plug_attrs: &'a std::collections::BTreeMap<String, HeaderValue>,
        slot_attrs: &'a std::collections::BTreeMap<String, HeaderValue>,
    ) -> ConnectionCandidate<'a> {
        ConnectionCandidate {
            plug_attrs,
            slot_attrs,
            plug_snap_type: "app",
            slot_snap_type: "app",
            plug_publisher_id: "pub1",
            slot_publisher_id: "pub2",
            plug_snap_id: "plugsnapid",
            slot_snap_id: "slotsnapid",
            plug_name: "plug1",
            slot_name: "slot1",
            model: None,
            store: None,
        }
    }

    #[test]
    fn deny_beats_allow() {
        let rule = plug_rule(
            "interface1:\n  allow-connection: true\n  deny-connection:\n    slot-publisher-id:\n      - pub2",
        );
        let attrs: std::collections::BTreeMap<String, HeaderValue> = Default::default();
        let cand = connection_candidate(&attrs, &attrs);
        assert_eq!(rule.check_connection(&cand, false), Decision::Denied);

        let rule = plug_rule(
            "interface1:\n  allow-connection: true\n  deny-connection:\n    slot-publisher-id:\n      - somebody-else",
        );
        assert_eq!(rule.check_connection(&cand, false), Decision::Allowed);
    }

    #[test]
    fn no_allow_entry_denies() {
        let rule = plug_rule("interface1:\n  deny-installation: false");
        let attrs: std::collections::BTreeMap<String, HeaderValue> = Default::default();
        let cand = InstallationCandidate {
            attrs: &attrs,
            snap_type: "app",
            name: "plug1",
            model: None,
            store: None,
        };
        assert_eq!(rule.check_installation(&cand), Decision::Denied);
    }

    #[test]
    fn snap_type_constraint_filters() {
        let rule = plug_rule(
            "interface1:\n  allow-installation:\n    plug-snap-type:\n      - core",
        );
        let attrs: std::collections::BTreeMap<String, HeaderValue> = Default::default();
        let app = InstallationCandidate {
            attrs: &attrs,
            snap_type: "app",
            name: "plug1",
            model: None,
            store: None,
        };
        let core = InstallationCandidate {
            attrs: &attrs,
            snap_type: "core",
            name: "plug1",
            model: None,
            store: None,
        };
        assert_eq!(rule.check_installation(&app), Decision::Denied);
        assert_eq!(rule.check_installation(&core), Decision::Allowed);
    }

    #[test]
    fn device_scoped_entry_needs_a_model() {
        let rule = plug_rule(
            "interface1:\n  allow-installation:\n    on-store:\n      - substore",
        );
        let attrs: std::collections::BTreeMap<String, HeaderValue> = Default::default();
        let cand = InstallationCandidate {
            attrs: &attrs,
            snap_type: "app",
            name: "plug1",
            model: None,
            store: None,
        };
        assert_eq!(rule.check_installation(&cand), Decision::Denied);
    }
}
