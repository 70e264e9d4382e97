//! Backend configuration
//!
//! JSON document, every field optional:
//!
//! ```json
//! {
//!   "raise_policy": "RaiseAllButSuccess",
//!   "log_apdu_file": "apdu.log",
//!   "open_retry_delay_ms": 1000,
//!   "hid_read_timeout_ms": 1000
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use apdu_core::{Firmware, RaisePolicy};
use backend_hal::{ApduHandler, BackendCore, SimulatorBackend, UsbBackend, UsbChannel};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file unreadable
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration is not valid JSON for this schema
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Settings shared by every backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Initial raise policy
    pub raise_policy: RaisePolicy,
    /// File receiving APDU records
    pub log_apdu_file: Option<PathBuf>,
    /// Delay before retrying a failed USB open (ms)
    pub open_retry_delay_ms: u64,
    /// HID read poll timeout (ms)
    pub hid_read_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            raise_policy: RaisePolicy::RaiseAllButSuccess,
            log_apdu_file: None,
            open_retry_delay_ms: 1000,
            hid_read_timeout_ms: 1000,
        }
    }
}

impl BackendConfig {
    /// Parse a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Delay before retrying a failed USB open
    pub fn open_retry_delay(&self) -> Duration {
        Duration::from_millis(self.open_retry_delay_ms)
    }

    /// HID read poll timeout
    pub fn hid_read_timeout(&self) -> Duration {
        Duration::from_millis(self.hid_read_timeout_ms)
    }

    /// Backend state for `firmware` carrying this configuration
    pub fn build_core(&self, firmware: Firmware) -> BackendCore {
        let core = BackendCore::new(firmware).with_raise_policy(self.raise_policy);
        match &self.log_apdu_file {
            Some(path) => core.with_apdu_log(path.clone()),
            None => core,
        }
    }

    /// Apply this configuration to existing backend state
    ///
    /// The raise policy is replaced; an APDU log file is only installed when
    /// one is configured.
    pub fn apply(&self, core: &mut BackendCore) {
        core.set_raise_policy(self.raise_policy);
        if let Some(path) = &self.log_apdu_file {
            core.set_apdu_log(path.clone());
        }
    }

    /// USB backend over `channel`
    pub fn usb_backend<C: UsbChannel>(&self, firmware: Firmware, channel: C) -> UsbBackend<C> {
        UsbBackend::with_core(self.build_core(firmware), channel)
            .with_retry_delay(self.open_retry_delay())
    }

    /// USB backend over the first connected HID device
    #[cfg(feature = "hid")]
    pub fn hid_backend(&self, firmware: Firmware) -> UsbBackend<backend_hal::hid::HidChannel> {
        let channel = backend_hal::hid::HidChannel::new(self.hid_read_timeout());
        self.usb_backend(firmware, channel)
    }

    /// Simulator backend answering through `handler`
    pub fn simulator<H: ApduHandler>(&self, firmware: Firmware, handler: H) -> SimulatorBackend<H> {
        SimulatorBackend::with_core(self.build_core(firmware), handler)
    }
}
