//! Plug/slot rule parsing and evaluation.
//!
//! Declarations carry per-interface rules under `plugs`/`slots`; this
//! module compiles those header stanzas into rule values and evaluates
//! connection and installation candidates against them. Deny always
//! beats allow.

mod attr_matcher;
mod device_scope;
mod features;
mod rules;

pub use attr_matcher::{AttrConstraint, AttrMatchContext, AttrMatcher, Attrer};
pub use device_scope::{DeviceScopeConstraint, DeviceScopeError};
pub use rules::{
    ConnectionCandidate, Decision, InstallationCandidate, PlugConnectionConstraints,
    PlugInstallationConstraints, PlugRule, SlotConnectionConstraints,
    SlotInstallationConstraints, SlotRule,
};

pub(crate) use device_scope::compile_device_scope;
pub(crate) use features::suggest_format_for_decl;
pub(crate) use rules::{compile_plug_rule, compile_slot_rule};
