//! The static assertion-type registry.

use assertd_types::Headers;

use crate::assert::AssertError;
use crate::ifacedecls::suggest_format_for_decl;

/// The release series assumed for assertion kinds that do not carry a
/// `series` header of their own.
pub const RELEASE_SERIES: &str = "16";

/// The declarative description of an assertion type.
#[derive(Debug)]
pub struct AssertionType {
    /// The `type` header value.
    pub name: &'static str,
    /// Ordered primary-key header names.
    pub primary_key: &'static [&'static str],
    /// The newest format this implementation understands for the type.
    pub max_supported_format: i32,
}

impl PartialEq for AssertionType {
    fn eq(&self, other: &AssertionType) -> bool {
        self.name == other.name
    }
}

impl Eq for AssertionType {}

pub static ACCOUNT_TYPE: AssertionType = AssertionType {
    name: "account",
    primary_key: &["account-id"],
    max_supported_format: 0,
};

pub static ACCOUNT_KEY_TYPE: AssertionType = AssertionType {
    name: "account-key",
    primary_key: &["public-key-sha3-384"],
    max_supported_format: 0,
};

pub static SNAP_DECLARATION_TYPE: AssertionType = AssertionType {
    name: "snap-declaration",
    primary_key: &["series", "snap-id"],
    max_supported_format: 6,
};

pub static SNAP_BUILD_TYPE: AssertionType = AssertionType {
    name: "snap-build",
    primary_key: &["snap-sha3-384"],
    max_supported_format: 0,
};

pub static SNAP_REVISION_TYPE: AssertionType = AssertionType {
    name: "snap-revision",
    primary_key: &["snap-sha3-384"],
    max_supported_format: 0,
};

pub static VALIDATION_TYPE: AssertionType = AssertionType {
    name: "validation",
    primary_key: &["series", "snap-id", "approved-snap-id"],
    max_supported_format: 0,
};

pub static SNAP_DEVELOPER_TYPE: AssertionType = AssertionType {
    name: "snap-developer",
    primary_key: &["snap-id", "publisher-id"],
    max_supported_format: 0,
};

pub static BASE_DECLARATION_TYPE: AssertionType = AssertionType {
    name: "base-declaration",
    primary_key: &["series"],
    max_supported_format: 6,
};

pub static MODEL_TYPE: AssertionType = AssertionType {
    name: "model",
    primary_key: &["series", "brand-id", "model"],
    max_supported_format: 0,
};

pub static STORE_TYPE: AssertionType = AssertionType {
    name: "store",
    primary_key: &["store"],
    max_supported_format: 0,
};

static ALL_TYPES: &[&AssertionType] = &[
    &ACCOUNT_TYPE,
    &ACCOUNT_KEY_TYPE,
    &SNAP_DECLARATION_TYPE,
    &SNAP_BUILD_TYPE,
    &SNAP_REVISION_TYPE,
    &VALIDATION_TYPE,
    &SNAP_DEVELOPER_TYPE,
    &BASE_DECLARATION_TYPE,
    &MODEL_TYPE,
    &STORE_TYPE,
];

/// All registered assertion types.
pub fn all_types() -> &'static [&'static AssertionType] {
    ALL_TYPES
}

/// Resolves an assertion type by name.
pub fn type_by_name(name: &str) -> Option<&'static AssertionType> {
    all_types().iter().copied().find(|t| t.name == name)
}

/// Returns the lowest format version able to express the given headers
/// for the type. Features only ever raise the number.
pub fn suggest_format(typ: &AssertionType, headers: &Headers) -> Result<i32, AssertError> {
    let suggested = match typ.name {
        "snap-declaration" | "base-declaration" => suggest_format_for_decl(headers)
            .map_err(|msg| AssertError::Check {
                typ: typ.name,
                msg,
            })?,
        _ => 0,
    };
    Ok(suggested.min(typ.max_supported_format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        assert_eq!(
            type_by_name("snap-declaration").unwrap().primary_key,
            &["series", "snap-id"]
        );
        assert!(type_by_name("no-such-type").is_none());
    }

    #[test]
    fn primary_keys_are_never_empty() {
        for typ in all_types() {
            assert!(!typ.primary_key.is_empty(), "{}", typ.name);
        }
    }
}
