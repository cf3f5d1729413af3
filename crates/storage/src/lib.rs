//! # assertd storage
//!
//! The filesystem backstore: assertions persisted under
//! `<root>/asserts-v0/<type>/<escaped primary key components>/active`,
//! with atomic replacement, wildcard search and a resilient consistency
//! scan.

mod fsbackstore;

pub use fsbackstore::{FsBackstore, ScanError};
