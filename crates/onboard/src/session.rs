//! The host-side session layer.
//!
//! The state machines in [`crate::device`] are plain values; a host
//! daemon owns at most one session per device, serializes access to it,
//! enforces an inactivity deadline and answers protocol failures with a
//! `fatal` envelope before clearing the session.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::device::Device;
use crate::error::{fatal, OnboardError};
use crate::msgs::DataMap;

/// Host policy knobs for onboarding sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a session may sit idle before it is cleared.
    pub timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> SessionConfig {
        SessionConfig {
            timeout: Duration::from_secs(300),
        }
    }
}

/// Errors surfaced by the host layer.
#[derive(Debug, Error)]
pub enum HostError {
    /// A session is already in progress for this device.
    #[error("already onboarding")]
    Conflict,
    /// No session is currently active.
    #[error("no current onboarding session")]
    NoSession,
    /// An answer is still owed for the previous message.
    #[error("still replying to previous message")]
    StillReplying,
    /// The reply does not belong to the pending exchange.
    #[error("mismatched exchange")]
    MismatchedExchange,
    /// A protocol failure; `fatal` carries the envelope to send to the
    /// peer when one could be built.
    #[error("{err}")]
    Protocol {
        /// The underlying protocol error.
        err: OnboardError,
        /// A serialized fatal envelope for the peer, if applicable.
        fatal: Option<Vec<u8>>,
    },
}

/// What the host should send back after handling a message.
#[derive(Debug)]
pub struct SessionAnswer {
    /// `"ready"` for the session setup, `"reply"` afterwards.
    pub answer_type: &'static str,
    /// The exchange number the host must answer with.
    pub exchange: u64,
    /// Directives received with a `cfg`, for the host to act on.
    pub data: Option<DataMap>,
}

/// One in-flight onboarding session on the device side.
pub struct DeviceSession {
    proto: Device,
    exchange: u64,
    replying_for: u64,
    last_activity: Instant,
    timeout: Duration,
}

impl DeviceSession {
    /// Starts a session: consumes the configurator's `hello` and
    /// composes the `device` answer.
    pub fn start(
        secret: &[u8],
        key: p256::SecretKey,
        hello: &[u8],
        cfg: &SessionConfig,
    ) -> Result<(DeviceSession, Vec<u8>), OnboardError> {
        let mut proto = Device::new();
        proto.set_onboarding_secret(secret)?;
        proto.set_onboarding_device_key(key);
        proto.rcv_hello(hello)?;
        let device_msg = proto.device()?;
        Ok((
            DeviceSession {
                proto,
                exchange: 0,
                replying_for: 0,
                last_activity: Instant::now(),
                timeout: cfg.timeout,
            },
            device_msg,
        ))
    }

    /// Whether the inactivity deadline has passed.
    pub fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.last_activity) > self.timeout
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Routes an incoming message: the first one must be the session
    /// setup, later ones are configuration exchanges. The returned
    /// answer names the exchange the host must respond to through
    /// [`DeviceSession::reply`].
    pub fn handle(&mut self, msg: &[u8]) -> Result<SessionAnswer, HostError> {
        if self.replying_for != 0 {
            return Err(HostError::StillReplying);
        }
        self.touch();
        let answer = if self.exchange == 0 {
            self.proto.rcv_session_setup(msg).map_err(fail)?;
            self.exchange = 1;
            SessionAnswer {
                answer_type: "ready",
                exchange: self.exchange,
                data: None,
            }
        } else {
            let data = self.proto.rcv_cfg(msg).map_err(fail)?;
            self.exchange += 1;
            SessionAnswer {
                answer_type: "reply",
                exchange: self.exchange,
                data: Some(data),
            }
        };
        self.replying_for = answer.exchange;
        Ok(answer)
    }

    /// Builds the outgoing answer (`ready` or `reply`) for the pending
    /// exchange.
    pub fn reply(&mut self, exchange: u64, data: DataMap) -> Result<Vec<u8>, HostError> {
        if exchange == 0 || exchange != self.replying_for {
            return Err(HostError::MismatchedExchange);
        }
        self.touch();
        let msg = if self.exchange == 1 {
            let data = if data.is_empty() { None } else { Some(data) };
            self.proto.ready(data).map_err(fail)?
        } else {
            self.proto.reply(data).map_err(fail)?
        };
        self.replying_for = 0;
        Ok(msg)
    }
}

fn fail(err: OnboardError) -> HostError {
    let envelope = fatal(&err).ok();
    HostError::Protocol {
        err,
        fatal: envelope,
    }
}

/// Per-device onboarding state as a host daemon tracks it.
pub struct OnboardHost {
    secret: Vec<u8>,
    key: p256::SecretKey,
    config: SessionConfig,
    session: Option<DeviceSession>,
    in_progress: bool,
}

impl OnboardHost {
    /// Creates host state around the device's onboarding secrets.
    pub fn new(secret: Vec<u8>, key: p256::SecretKey, config: SessionConfig) -> OnboardHost {
        OnboardHost {
            secret,
            key,
            config,
            session: None,
            in_progress: false,
        }
    }

    /// Whether a session is currently in progress.
    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    /// Starts a session from the configurator's `hello`; at most one
    /// session runs at a time.
    pub fn start(&mut self, hello: &[u8]) -> Result<Vec<u8>, HostError> {
        self.expire_if_idle();
        if self.in_progress {
            return Err(HostError::Conflict);
        }
        let (session, device_msg) =
            DeviceSession::start(&self.secret, self.key.clone(), hello, &self.config)
                .map_err(fail)?;
        self.session = Some(session);
        self.in_progress = true;
        debug!("onboarding session started");
        Ok(device_msg)
    }

    /// Routes a message to the active session; on any error the session
    /// is cleared and the error may carry a `fatal` envelope to send.
    pub fn handle(&mut self, msg: &[u8]) -> Result<SessionAnswer, HostError> {
        self.expire_if_idle();
        let session = self.session.as_mut().ok_or(HostError::NoSession)?;
        match session.handle(msg) {
            Ok(answer) => Ok(answer),
            // an answer is still owed; the session itself stays valid
            Err(e @ HostError::StillReplying) => Err(e),
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    /// Builds the answer for a pending exchange.
    pub fn reply(&mut self, exchange: u64, data: DataMap) -> Result<Vec<u8>, HostError> {
        self.expire_if_idle();
        let session = self.session.as_mut().ok_or(HostError::NoSession)?;
        match session.reply(exchange, data) {
            Ok(msg) => Ok(msg),
            Err(e @ HostError::MismatchedExchange) => Err(e),
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    /// Aborts the session with a fatal envelope for the peer.
    pub fn abort(&mut self, err: &OnboardError) -> Option<Vec<u8>> {
        self.clear();
        fatal(err).ok()
    }

    fn expire_if_idle(&mut self) {
        let expired = self
            .session
            .as_ref()
            .map_or(false, |s| s.expired(Instant::now()));
        if expired {
            debug!("onboarding session expired");
            self.clear();
        }
    }

    fn clear(&mut self) {
        self.session = None;
        self.in_progress = false;
    }
}

impl std::fmt::Debug for OnboardHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnboardHost")
            .field("in_progress", &self.in_progress)
            .finish()
    }
}
