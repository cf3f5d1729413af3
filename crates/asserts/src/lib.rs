//! # assertd asserts
//!
//! The assertion core of assertd: the wire value type and its
//! en/decoding, the declarative type registry, the trust database with
//! its signature and cross-assertion checks, plug/slot policy
//! evaluation, and the operator-facing sign tool.

use assertd_types::Headers;

pub mod account;
pub mod assert;
pub mod backstore;
pub mod db;
mod headers_check;
pub mod ifacedecls;
pub mod model;
pub mod registry;
pub mod snap_asserts;
pub mod store_assert;
pub mod testing;
pub mod tool;

pub use assert::{assemble, decode, AssertError, Assertion, Ref};
pub use backstore::{Backstore, BackstoreError, MemoryBackstore};
pub use db::{Database, DatabaseConfig, DbError};
pub use registry::{suggest_format, type_by_name, AssertionType};

use assert::Details;
use registry::AssertionType as Typ;

pub(crate) fn validate_details(
    typ: &'static Typ,
    headers: &Headers,
    body: &[u8],
    unsigned: bool,
) -> Result<Details, String> {
    Ok(match typ.name {
        "account" => Details::Account(account::validate_account(headers, body)?),
        "account-key" => Details::AccountKey(account::validate_account_key(headers, body)?),
        "snap-declaration" => {
            Details::SnapDeclaration(snap_asserts::validate_snap_declaration(headers, body)?)
        }
        "snap-build" => Details::SnapBuild(snap_asserts::validate_snap_build(headers, body)?),
        "snap-revision" => {
            Details::SnapRevision(snap_asserts::validate_snap_revision(headers, body)?)
        }
        "validation" => Details::Validation(snap_asserts::validate_validation(headers, body)?),
        "snap-developer" => {
            Details::SnapDeveloper(snap_asserts::validate_snap_developer(headers, body)?)
        }
        "base-declaration" => Details::BaseDeclaration(
            snap_asserts::validate_base_declaration(headers, body, unsigned)?,
        ),
        "model" => Details::Model(model::validate_model(headers, body)?),
        "store" => Details::Store(store_assert::validate_store(headers, body)?),
        other => return Err(format!("no validator for assertion type {other:?}")),
    })
}
