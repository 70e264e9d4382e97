//! APDU Harness
//!
//! Drives secure element devices (physical or simulated) from automated tests:
//! - Single-frame APDU commands and status-word responses
//! - Raise policies deciding which statuses fail an exchange
//! - Asynchronous exchanges leaving room for on-device UI interaction
//! - USB HID and in-process simulator backends behind one [`Backend`] trait

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub use apdu_core::{
    decode, encode, pack_apdu, ApduError, ApduLogger, Command, Firmware, RaisePolicy, Response,
    SW_OK,
};
pub use backend_hal::{
    Backend, BackendCore, BackendError, BackendResult, BackendState, ChannelError, Connection,
    Crop, PendingExchange, ScreenComparator, SimulatorBackend, UsbBackend, UsbChannel,
};
pub use config::{BackendConfig, ConfigError};
pub use logging::init_logging;
