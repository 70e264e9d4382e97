//! Shared backend state
//!
//! Holds everything a backend keeps besides its transport handle, and applies
//! the one post-processing step every received response goes through.

use std::path::PathBuf;

use apdu_core::{ApduLogger, Firmware, RaisePolicy, Response};

use crate::{BackendError, BackendResult};

/// Backend lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    /// Constructed, transport not acquired yet
    Unopened,
    /// Transport acquired
    Open,
    /// Transport released
    Closed,
}

/// State common to all backends
#[derive(Debug)]
pub struct BackendCore {
    firmware: Firmware,
    raise_policy: RaisePolicy,
    pub(crate) state: BackendState,
    pub(crate) last_async_response: Option<Response>,
    /// A command was sent by an async exchange that has not been received yet
    pub(crate) in_flight: bool,
    /// An async exchange was abandoned before its response was read
    pub(crate) undrained: bool,
    pub(crate) logger: ApduLogger,
}

impl BackendCore {
    /// New unopened backend state for `firmware`
    pub fn new(firmware: Firmware) -> Self {
        BackendCore {
            firmware,
            raise_policy: RaisePolicy::default(),
            state: BackendState::Unopened,
            last_async_response: None,
            in_flight: false,
            undrained: false,
            logger: ApduLogger::new(),
        }
    }

    /// Also persist APDU records to `path`
    pub fn with_apdu_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.logger = ApduLogger::with_file(path);
        self
    }

    /// Persist APDU records to `path` from now on
    ///
    /// A file opened by the previous logger is closed first.
    pub fn set_apdu_log(&mut self, path: impl Into<PathBuf>) {
        self.logger = ApduLogger::with_file(path);
    }

    /// Use `policy` instead of the default
    pub fn with_raise_policy(mut self, policy: RaisePolicy) -> Self {
        self.raise_policy = policy;
        self
    }

    /// Managed firmware
    pub fn firmware(&self) -> Firmware {
        self.firmware
    }

    /// Lifecycle state
    pub fn state(&self) -> BackendState {
        self.state
    }

    /// Active raise policy
    pub fn raise_policy(&self) -> RaisePolicy {
        self.raise_policy
    }

    /// Change the raise policy for the following exchanges
    pub fn set_raise_policy(&mut self, policy: RaisePolicy) {
        self.raise_policy = policy;
    }

    /// Response of the last completed asynchronous exchange
    pub fn last_async_response(&self) -> Option<&Response> {
        self.last_async_response.as_ref()
    }

    /// APDU diagnostics sink
    pub fn logger_mut(&mut self) -> &mut ApduLogger {
        &mut self.logger
    }

    /// Fail unless a new exchange may start
    pub(crate) fn ensure_ready(&self) -> BackendResult<()> {
        if self.state != BackendState::Open {
            return Err(BackendError::NotOpen);
        }
        if self.in_flight {
            return Err(BackendError::ExchangeInFlight);
        }
        if self.undrained {
            return Err(BackendError::UndrainedResponse);
        }
        Ok(())
    }

    /// Log a received response and classify it against the raise policy
    pub(crate) fn check_response(&mut self, response: Response) -> BackendResult<Response> {
        self.logger.log_receive(&response);

        if self.raise_policy.should_raise(response.status) {
            return Err(BackendError::DeviceRejected {
                status: response.status,
                data: response.data,
            });
        }
        Ok(response)
    }
}
