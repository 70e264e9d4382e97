//! APDU Core
//!
//! Wire-level building blocks shared by every secure element backend:
//! - Command framing (`CLA INS P1 P2 LEN DATA`) and response decoding
//! - Status words and the raise policy that classifies them
//! - Firmware descriptors for the supported device models
//! - The APDU diagnostics sink (console records plus optional log file)

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod apdu;
pub mod firmware;
pub mod logger;
pub mod policy;

pub use apdu::{decode, encode, pack_apdu, Command, Response, MAX_DATA_LEN, SW_OK};
pub use firmware::Firmware;
pub use logger::{ApduLogger, Direction, APDU_LOG_TARGET};
pub use policy::{should_raise, RaisePolicy};

use thiserror::Error;

/// APDU framing errors
#[derive(Error, Debug)]
pub enum ApduError {
    /// Command data does not fit in a single short APDU
    #[error("APDU data too large: {len} bytes (max 255)")]
    FrameTooLarge {
        /// Length of the rejected data
        len: usize,
    },

    /// Response shorter than a status word
    #[error("Malformed response: {len} bytes, need at least 2 for the status word")]
    MalformedResponse {
        /// Length of the rejected response
        len: usize,
    },

    /// Persisted APDU log could not be written
    #[error("APDU log I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for APDU operations
pub type ApduResult<T> = Result<T, ApduError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ApduError::FrameTooLarge { len: 256 };
        assert_eq!(err.to_string(), "APDU data too large: 256 bytes (max 255)");

        let err = ApduError::MalformedResponse { len: 1 };
        assert!(err.to_string().starts_with("Malformed response: 1 bytes"));
    }
}
