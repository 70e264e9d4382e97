//! Backend Abstraction Layer
//!
//! One contract, [`Backend`], for every way of reaching a secure element:
//! - USB devices through a [`UsbChannel`] (HID framing included)
//! - In-process protocol simulation through an [`ApduHandler`]
//!
//! Response classification (raise policy) and APDU logging live in the
//! shared [`BackendCore`], so transports only move bytes.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod state;
pub mod exchange;
pub mod hid;
pub mod simulator;
pub mod traits;
pub mod usb;

pub use state::{BackendCore, BackendState};
pub use exchange::{Connection, PendingExchange};
pub use simulator::{ApduHandler, SimEvent, SimulatorBackend};
pub use traits::*;
pub use usb::{ChannelError, UsbBackend, UsbChannel};

use std::time::Duration;

use apdu_core::ApduError;
use thiserror::Error;

/// Backend errors
#[derive(Error, Debug)]
pub enum BackendError {
    /// Command or response framing error
    #[error(transparent)]
    Frame(#[from] ApduError),

    /// Device answered with a status the raise policy rejects
    #[error("Device rejected APDU with status {:#06x} (data: {})", .status, hex::encode(.data))]
    DeviceRejected {
        /// Status word
        status: u16,
        /// Response data
        data: Vec<u8>,
    },

    /// Transport fault with no response attached
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Backend is not open
    #[error("Backend not open")]
    NotOpen,

    /// An asynchronous exchange is still waiting for its response
    #[error("Asynchronous exchange in flight")]
    ExchangeInFlight,

    /// An abandoned asynchronous exchange left a response on the device
    #[error("Undrained response from an abandoned asynchronous exchange")]
    UndrainedResponse,

    /// Screen did not change in time
    #[error("Screen did not change within {0:?}")]
    ScreenTimeout(Duration),
}

impl BackendError {
    /// Status word carried by a rejected response
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::DeviceRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errors() {
        let err = BackendError::NotOpen;
        assert_eq!(err.to_string(), "Backend not open");

        let err = BackendError::DeviceRejected {
            status: 0x6F00,
            data: vec![0xAB],
        };
        assert_eq!(
            err.to_string(),
            "Device rejected APDU with status 0x6f00 (data: ab)"
        );
        assert_eq!(err.status(), Some(0x6F00));
    }

    #[test]
    fn test_frame_error_transparent() {
        let err: BackendError = ApduError::FrameTooLarge { len: 300 }.into();
        assert_eq!(err.to_string(), "APDU data too large: 300 bytes (max 255)");
        assert!(err.status().is_none());
    }
}
