//! Core data structures for the assertd trust store.
//!
//! This crate holds the pieces every other assertd crate agrees on: the
//! recursive header-value AST, the line-oriented header codec whose bytes
//! signatures cover, RFC 3339 timestamp handling and the cancellation
//! token threaded through long-running store operations.

pub mod cancel;
pub mod codec;
pub mod time;
pub mod value;

pub use cancel::CancelToken;
pub use value::{HeaderValue, Headers};
