//! End-to-end trust database behavior over a memory backstore.

use assertd_asserts::registry::{
    ACCOUNT_TYPE, SNAP_DECLARATION_TYPE, SNAP_REVISION_TYPE,
};
use assertd_asserts::snap_asserts::RevisionAuthority;
use assertd_asserts::testing::{headers, now_header, third_party, Signer, StoreStack};
use assertd_asserts::{decode, Assertion, Database, DatabaseConfig, DbError};
use assertd_crypto::digest::sha3_384_base64;
use assertd_crypto::KeypairManager;
use assertd_types::{HeaderValue, Headers};

const BLOB: &[u8] = b"snap-blob-content";

fn store_and_db() -> (StoreStack, Database) {
    let store = StoreStack::new("canonical");
    let db = Database::open(DatabaseConfig {
        trusted: store.trusted(),
        ..DatabaseConfig::default()
    })
    .unwrap();
    (store, db)
}

fn add_third_party(db: &Database, store: &StoreStack, account_id: &str) -> Signer {
    let (signer, asserts) = third_party(store, account_id);
    for a in asserts {
        db.add(&a).unwrap();
    }
    signer
}

fn add_account(db: &Database, store: &StoreStack, account_id: &str) {
    let a = store.signer.sign(
        "account",
        headers(&[
            ("account-id", account_id),
            ("display-name", account_id),
            ("validation", "unknown"),
            ("timestamp", "2016-01-01T00:00:00Z"),
        ]),
        b"",
    );
    db.add(&a).unwrap();
}

fn decl_headers(snap_id: &str, publisher: &str) -> Headers {
    headers(&[
        ("series", "16"),
        ("snap-id", snap_id),
        ("snap-name", "foo"),
        ("publisher-id", publisher),
        ("timestamp", &now_header()),
    ])
}

fn rev_headers(developer: &str, extra: &[(&str, &str)]) -> Headers {
    let digest = sha3_384_base64(BLOB);
    let mut h = headers(&[
        ("snap-sha3-384", &digest),
        ("snap-id", "snap-id-1"),
        ("snap-size", "123"),
        ("snap-revision", "1"),
        ("developer-id", developer),
        ("timestamp", &now_header()),
    ]);
    for (k, v) in extra {
        h.insert(k.to_string(), HeaderValue::Str(v.to_string()));
    }
    h
}

#[test]
fn snap_declaration_check_and_add() {
    let (store, db) = store_and_db();
    add_account(&db, &store, "dev-id1");

    let decl = store
        .signer
        .sign("snap-declaration", decl_headers("snap-id-1", "dev-id1"), b"");
    db.check(&decl).unwrap();
    db.add(&decl).unwrap();

    let found = db.find(&SNAP_DECLARATION_TYPE, &["16", "snap-id-1"]).unwrap();
    assert_eq!(found.snap_declaration().unwrap().snap_id, "snap-id-1");
}

#[test]
fn snap_declaration_untrusted_authority() {
    let (store, db) = store_and_db();
    let other = add_third_party(&db, &store, "other");
    add_account(&db, &store, "dev-id1");

    let decl = other.sign("snap-declaration", decl_headers("snap-id-1", "dev-id1"), b"");
    let err = db.check(&decl).unwrap_err();
    assert_eq!(
        err.to_string(),
        "snap-declaration assertion for \"foo\" (id \"snap-id-1\") is not signed by a directly trusted authority: other"
    );
}

#[test]
fn snap_declaration_missing_publisher_account() {
    let (store, db) = store_and_db();
    let decl = store
        .signer
        .sign("snap-declaration", decl_headers("snap-id-1", "dev-id1"), b"");
    let err = db.check(&decl).unwrap_err();
    assert_eq!(
        err.to_string(),
        "snap-declaration assertion for \"foo\" (id \"snap-id-1\") does not have a matching account assertion for the publisher \"dev-id1\""
    );
}

#[test]
fn unknown_signing_key_is_a_signature_error() {
    let (_store, db) = store_and_db();
    let stranger = Signer::new("canonical");
    let a = stranger.sign(
        "account",
        headers(&[
            ("account-id", "acc"),
            ("display-name", "Acc"),
            ("validation", "unknown"),
            ("timestamp", &now_header()),
        ]),
        b"",
    );
    let err = db.check(&a).unwrap_err();
    assert!(err
        .to_string()
        .contains("no known public key with key id"));
}

#[test]
fn revision_monotonicity_through_add() {
    let (store, db) = store_and_db();
    add_account(&db, &store, "dev-id1");
    add_account(&db, &store, "delegated-id");
    let decl = store
        .signer
        .sign("snap-declaration", decl_headers("snap-id-1", "dev-id1"), b"");
    db.add(&decl).unwrap();

    let rev1 = store
        .signer
        .sign("snap-revision", rev_headers("dev-id1", &[("revision", "1")]), b"");
    db.add(&rev1).unwrap();

    let rev1_again = store
        .signer
        .sign("snap-revision", rev_headers("dev-id1", &[("revision", "1")]), b"");
    let err = db.add(&rev1_again).unwrap_err();
    assert_eq!(
        err.to_string(),
        "assertion added must have more recent revision than current one (adding 1, currently 1)"
    );

    let rev2 = store
        .signer
        .sign("snap-revision", rev_headers("dev-id1", &[("revision", "2")]), b"");
    db.add(&rev2).unwrap();

    let digest = sha3_384_base64(BLOB);
    let got = db.find(&SNAP_REVISION_TYPE, &[&digest]).unwrap();
    assert_eq!(got.revision(), 2);
}

#[test]
fn snap_revision_requires_declaration_and_developer() {
    let (store, db) = store_and_db();

    let rev = store.signer.sign("snap-revision", rev_headers("dev-id1", &[]), b"");
    let err = db.check(&rev).unwrap_err();
    assert_eq!(
        err.to_string(),
        "snap-revision assertion for snap id \"snap-id-1\" does not have a matching account assertion for the developer \"dev-id1\""
    );

    add_account(&db, &store, "dev-id1");
    let err = db.check(&rev).unwrap_err();
    assert_eq!(
        err.to_string(),
        "snap-revision assertion for snap id \"snap-id-1\" does not have a matching snap-declaration assertion"
    );

    let decl = store
        .signer
        .sign("snap-declaration", decl_headers("snap-id-1", "dev-id1"), b"");
    db.add(&decl).unwrap();
    db.check(&rev).unwrap();
}

#[test]
fn snap_revision_untrusted_authority_is_not_a_store() {
    let (store, db) = store_and_db();
    let other = add_third_party(&db, &store, "other");

    let mut h = rev_headers("dev-id1", &[]);
    h.insert("authority-id".into(), HeaderValue::Str("other".into()));
    let rev = other.sign("snap-revision", h, b"");
    let err = db.check(&rev).unwrap_err();
    assert_eq!(
        err.to_string(),
        "snap-revision assertion for snap id \"snap-id-1\" is not signed by a store: other"
    );
}

#[test]
fn snap_revision_timestamp_outside_key_validity() {
    let (store, db) = store_and_db();
    add_account(&db, &store, "dev-id1");

    let rev = store.signer.sign(
        "snap-revision",
        rev_headers("dev-id1", &[("timestamp", "2013-01-01T14:00:00Z")]),
        b"",
    );
    let err = db.check(&rev).unwrap_err();
    assert_eq!(
        err.to_string(),
        "snap-revision assertion timestamp \"2013-01-01T14:00:00Z\" outside of signing key validity (key valid since \"2015-01-01T00:00:00Z\")"
    );
}

fn delegated_revision(delegated: &Signer, revision: &str) -> Assertion {
    delegated.sign(
        "snap-revision",
        rev_headers(
            "delegated-id",
            &[("provenance", "prov1"), ("snap-revision", revision)],
        ),
        b"",
    )
}

#[test]
fn delegated_publishing() {
    let (store, db) = store_and_db();
    let delegated = add_third_party(&db, &store, "delegated-id");

    // without a revision-authority the delegated revision is rejected
    let decl = store
        .signer
        .sign("snap-declaration", decl_headers("snap-id-1", "delegated-id"), b"");
    db.add(&decl).unwrap();

    let rev = delegated_revision(&delegated, "200");
    let err = db.check(&rev).unwrap_err();
    assert_eq!(
        err.to_string(),
        "snap-revision assertion with provenance \"prov1\" for snap id \"snap-id-1\" is not signed by an authorized authority: delegated-id"
    );

    // establish the delegation
    let mut h = decl_headers("snap-id-1", "delegated-id");
    h.insert("revision".into(), HeaderValue::Str("1".into()));
    h.insert(
        "revision-authority".into(),
        HeaderValue::List(vec![HeaderValue::Map(
            [
                (
                    "account-id".to_string(),
                    HeaderValue::Str("delegated-id".into()),
                ),
                (
                    "provenance".to_string(),
                    HeaderValue::List(vec![HeaderValue::Str("prov1".into())]),
                ),
                ("min-revision".to_string(), HeaderValue::Str("1".into())),
                (
                    "max-revision".to_string(),
                    HeaderValue::Str("1000".into()),
                ),
            ]
            .into_iter()
            .collect(),
        )]),
    );
    let decl2 = store.signer.sign("snap-declaration", h, b"");
    db.add(&decl2).unwrap();

    // now a revision within bounds is accepted
    db.check(&rev).unwrap();
    db.add(&rev).unwrap();

    // out of range stays rejected
    let too_high = delegated_revision(&delegated, "1200");
    let err = db.check(&too_high).unwrap_err();
    assert_eq!(
        err.to_string(),
        "snap-revision assertion with provenance \"prov1\" for snap id \"snap-id-1\" is not signed by an authorized authority: delegated-id"
    );
}

#[test]
fn device_scoped_delegation() {
    let store = StoreStack::new("canonical");
    let brand = Signer::new("my-brand");

    let model = brand.sign(
        "model",
        headers(&[
            ("series", "16"),
            ("brand-id", "my-brand"),
            ("model", "my-model"),
            ("store", "substore"),
            ("architecture", "armhf"),
            ("kernel", "krnl"),
            ("gadget", "gadget"),
            ("timestamp", "2018-09-12T12:00:00Z"),
        ]),
        b"",
    );
    let substore = store.signer.sign(
        "store",
        headers(&[
            ("store", "substore"),
            ("operator-id", "canonical"),
            ("timestamp", "2018-09-12T12:00:00Z"),
        ]),
        b"",
    );
    let substore_friendly = {
        let mut h = headers(&[
            ("store", "substore"),
            ("operator-id", "canonical"),
            ("timestamp", "2018-09-12T12:00:00Z"),
        ]);
        h.insert(
            "friendly-stores".into(),
            HeaderValue::List(vec![
                HeaderValue::Str("a-store".into()),
                HeaderValue::Str("store1".into()),
                HeaderValue::Str("store2".into()),
            ]),
        );
        store.signer.sign("store", h, b"")
    };

    let rev = brand.sign(
        "snap-revision",
        rev_headers(
            "my-brand",
            &[("provenance", "prov1"), ("snap-revision", "200")],
        ),
        b"",
    );

    let ra = |on_store: &[&str]| RevisionAuthority {
        account_id: "my-brand".into(),
        provenance: vec!["prov1".into(), "prov2".into()],
        min_revision: 1,
        max_revision: 0,
        device_scope: if on_store.is_empty() {
            None
        } else {
            Some(assertd_asserts::ifacedecls::DeviceScopeConstraint {
                store: on_store.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            })
        },
    };

    // no device scope
    ra(&[]).check(&rev, Some(&model), None).unwrap();
    // the model's own store matches
    ra(&["substore"]).check(&rev, Some(&model), None).unwrap();
    ra(&["substore"])
        .check(&rev, Some(&model), Some(&substore))
        .unwrap();
    // a mismatching scope fails
    assert_eq!(
        ra(&["other-store"])
            .check(&rev, Some(&model), None)
            .unwrap_err()
            .to_string(),
        "on-store mismatch"
    );
    // friendly stores only count with the store assertion present
    assert_eq!(
        ra(&["store1"])
            .check(&rev, Some(&model), None)
            .unwrap_err()
            .to_string(),
        "on-store mismatch"
    );
    ra(&["a-store"])
        .check(&rev, Some(&model), Some(&substore_friendly))
        .unwrap();
    ra(&["store1", "other-store"])
        .check(&rev, Some(&model), Some(&substore_friendly))
        .unwrap();
    // without a model device scope is not evaluated
    ra(&["other-store"]).check(&rev, None, None).unwrap();
}

#[test]
fn validation_checks() {
    let (store, db) = store_and_db();
    let dev = add_third_party(&db, &store, "dev-id1");

    let validation_headers = headers(&[
        ("series", "16"),
        ("snap-id", "snap-id-1"),
        ("approved-snap-id", "snap-id-2"),
        ("approved-snap-revision", "42"),
        ("timestamp", &now_header()),
    ]);
    let validation = dev.sign("validation", validation_headers.clone(), b"");

    // gated declaration missing first
    let err = db.check(&validation).unwrap_err();
    assert_eq!(
        err.to_string(),
        "validation assertion by snap-id \"snap-id-1\" does not have a matching snap-declaration assertion for approved-snap-id \"snap-id-2\""
    );

    let decl2 = store
        .signer
        .sign("snap-declaration", decl_headers("snap-id-2", "dev-id1"), b"");
    db.add(&decl2).unwrap();

    let err = db.check(&validation).unwrap_err();
    assert_eq!(
        err.to_string(),
        "validation assertion by snap-id \"snap-id-1\" does not have a matching snap-declaration assertion"
    );

    let decl1 = store
        .signer
        .sign("snap-declaration", decl_headers("snap-id-1", "dev-id1"), b"");
    db.add(&decl1).unwrap();
    db.check(&validation).unwrap();

    // not signed by the gating snap's publisher
    let mut wrong = validation_headers;
    wrong.insert("authority-id".into(), HeaderValue::Str("canonical".into()));
    let by_store = store.signer.sign("validation", wrong, b"");
    let err = db.check(&by_store).unwrap_err();
    assert_eq!(
        err.to_string(),
        "validation assertion by snap \"foo\" (id \"snap-id-1\") not signed by its publisher"
    );
}

#[test]
fn snap_developer_checks() {
    let (store, db) = store_and_db();
    let dev1 = add_third_party(&db, &store, "dev-id1");

    let decl = store
        .signer
        .sign("snap-declaration", decl_headers("snap-id-1", "dev-id1"), b"");
    db.add(&decl).unwrap();

    // publisher signs for itself
    let snap_dev = dev1.sign(
        "snap-developer",
        headers(&[("snap-id", "snap-id-1"), ("publisher-id", "dev-id1")]),
        b"",
    );
    db.check(&snap_dev).unwrap();

    // authority that is neither publisher nor trusted
    let other_pub = dev1.sign(
        "snap-developer",
        headers(&[("snap-id", "snap-id-1"), ("publisher-id", "dev-id2")]),
        b"",
    );
    let err = db.check(&other_pub).unwrap_err();
    assert_eq!(
        err.to_string(),
        "snap-developer must be signed by the publisher or a trusted authority but got authority \"dev-id1\" and publisher \"dev-id2\""
    );

    // a trusted authority may sign for a publisher, but the publisher
    // account must exist
    let by_store = store.signer.sign(
        "snap-developer",
        headers(&[("snap-id", "snap-id-1"), ("publisher-id", "dev-id2")]),
        b"",
    );
    let err = db.check(&by_store).unwrap_err();
    assert_eq!(
        err.to_string(),
        "snap-developer assertion for snap-id \"snap-id-1\" does not have a matching account assertion for the publisher \"dev-id2\""
    );
    add_account(&db, &store, "dev-id2");
    db.check(&by_store).unwrap();

    // developer accounts must exist too
    let mut h = headers(&[("snap-id", "snap-id-1"), ("publisher-id", "dev-id1")]);
    h.insert(
        "developers".into(),
        HeaderValue::List(vec![HeaderValue::Map(
            [
                (
                    "developer-id".to_string(),
                    HeaderValue::Str("dev-id3".into()),
                ),
                (
                    "since".to_string(),
                    HeaderValue::Str("2017-01-01T00:00:00Z".into()),
                ),
            ]
            .into_iter()
            .collect(),
        )]),
    );
    let with_devs = dev1.sign("snap-developer", h, b"");
    let err = db.check(&with_devs).unwrap_err();
    assert_eq!(
        err.to_string(),
        "snap-developer assertion for snap-id \"snap-id-1\" does not have a matching account assertion for the developer \"dev-id3\""
    );
}

#[test]
fn account_key_needs_trusted_signer_and_account() {
    let (store, db) = store_and_db();
    let newcomer = Signer::new("newcomer");

    let key_headers = headers(&[
        ("account-id", "newcomer"),
        ("public-key-sha3-384", &newcomer.key.id()),
        ("since", "2016-01-01T00:00:00Z"),
    ]);
    let account_key = store.signer.sign(
        "account-key",
        key_headers,
        &newcomer.key.public_key().encode(),
    );

    let err = db.check(&account_key).unwrap_err();
    assert!(err
        .to_string()
        .contains("does not have a matching account assertion for \"newcomer\""));

    add_account(&db, &store, "newcomer");
    db.add(&account_key).unwrap();

    // the new key can now vouch for newcomer's own assertions
    let decl = newcomer.sign("snap-declaration", decl_headers("snap-id-9", "newcomer"), b"");
    let err = db.check(&decl).unwrap_err();
    assert!(err.to_string().contains("not signed by a directly trusted authority"));
}

#[test]
fn search_spans_trusted_and_stored() {
    let (store, db) = store_and_db();
    add_account(&db, &store, "dev-id1");

    let mut seen = Vec::new();
    let mut filter = std::collections::BTreeMap::new();
    filter.insert("account-id".to_string(), "dev-id1".to_string());
    db.search(&ACCOUNT_TYPE, &filter, &mut |a: Assertion| {
        seen.push(a.account().unwrap().account_id.clone())
    })
    .unwrap();
    assert_eq!(seen, vec!["dev-id1"]);
}

#[test]
fn known_trusted_and_predefined_lookup() {
    let (store, db) = store_and_db();
    assert!(db.known_trusted(&store.signer.key.id()));
    assert!(!db.known_trusted("no-such-key"));
    assert!(db.is_trusted_account("canonical"));

    let builtin = assertd_asserts::snap_asserts::builtin_base_declaration(
        "type: base-declaration\nauthority-id: canonical\nseries: 16\nplugs:\n  network: true",
    )
    .unwrap();
    let db = Database::open(DatabaseConfig {
        trusted: store.trusted(),
        other_predefined: vec![builtin],
        ..DatabaseConfig::default()
    })
    .unwrap();
    let found = db
        .find(&assertd_asserts::registry::BASE_DECLARATION_TYPE, &["16"])
        .unwrap();
    assert!(found
        .base_declaration()
        .unwrap()
        .plug_rule("network")
        .is_some());
}

#[test]
fn cancelled_database_refuses_writes() {
    let store = StoreStack::new("canonical");
    let cancel = assertd_types::CancelToken::new();
    let db = Database::open(DatabaseConfig {
        trusted: store.trusted(),
        cancel: cancel.clone(),
        ..DatabaseConfig::default()
    })
    .unwrap();
    cancel.cancel();

    let a = store.signer.sign(
        "account",
        headers(&[
            ("account-id", "acc"),
            ("display-name", "Acc"),
            ("validation", "unknown"),
            ("timestamp", &now_header()),
        ]),
        b"",
    );
    assert!(matches!(db.add(&a), Err(DbError::Cancelled)));
}

#[test]
fn signing_through_the_database() {
    let store = StoreStack::new("canonical");
    let mgr = assertd_crypto::MemoryKeypairManager::new();
    mgr.put(Some("default"), store.signer.key.clone()).unwrap();
    let db = Database::open(DatabaseConfig {
        keypair_manager: Box::new(mgr),
        trusted: store.trusted(),
        ..DatabaseConfig::default()
    })
    .unwrap();

    let a = db
        .sign(
            "account",
            headers(&[
                ("authority-id", "canonical"),
                ("account-id", "acc"),
                ("display-name", "Acc"),
                ("validation", "unknown"),
                ("timestamp", &now_header()),
            ]),
            b"",
            &store.signer.key.id(),
        )
        .unwrap();
    // output of sign passes the full ingestion pipeline
    db.add(&a).unwrap();
    let round = decode(&a.encode()).unwrap();
    assert_eq!(round.encode(), a.encode());
}

#[test]
fn signing_rejects_formats_below_features() {
    let store = StoreStack::new("canonical");
    let mgr = assertd_crypto::MemoryKeypairManager::new();
    mgr.put(None, store.signer.key.clone()).unwrap();
    let db = Database::open(DatabaseConfig {
        keypair_manager: Box::new(mgr),
        trusted: store.trusted(),
        ..DatabaseConfig::default()
    })
    .unwrap();

    let mut h = decl_headers("snap-id-1", "dev-id1");
    h.insert("authority-id".into(), HeaderValue::Str("canonical".into()));
    h.insert(
        "plugs".into(),
        HeaderValue::Map(
            [(
                "interface1".to_string(),
                HeaderValue::Str("true".into()),
            )]
            .into_iter()
            .collect(),
        ),
    );
    let err = db
        .sign("snap-declaration", h, b"", &store.signer.key.id())
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "cannot sign \"snap-declaration\" assertion with format 0 lower than min format 1 covering included features"
    );
}
