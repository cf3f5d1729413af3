//! # assertd onboard
//!
//! The onboarding session protocol between a configurator and a device
//! being provisioned: six JSON/JOSE message kinds over a pre-shared
//! secret and an ECDSA P-256 device key. Panics are disallowed in
//! non-test code to promote robust error handling.
#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

pub mod configurator;
pub mod device;
pub mod error;
pub mod helpers;
mod jose;
mod msgs;
pub mod session;

pub use configurator::Configurator;
pub use device::Device;
pub use error::{fatal, ErrorCode, OnboardError};
pub use helpers::{gen_device_key, gen_nonce, gen_secret};
pub use msgs::DataMap;
pub use session::{DeviceSession, HostError, OnboardHost, SessionAnswer, SessionConfig};
