//! Command and response APDUs
//!
//! Commands are short, single-frame APDUs: `CLA INS P1 P2 LEN DATA`.
//! Responses carry their data first and end with a big-endian status word.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ApduError, ApduResult};

/// Status word reported by the device on success
pub const SW_OK: u16 = 0x9000;

/// Maximum data length of a single-frame command
pub const MAX_DATA_LEN: usize = 255;

/// Command APDU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Application class
    pub cla: u8,
    /// Instruction
    pub ins: u8,
    /// First parameter
    pub p1: u8,
    /// Second parameter
    pub p2: u8,
    /// Command data
    pub data: Vec<u8>,
}

impl Command {
    /// Create a command with zero parameters and no data
    pub fn new(cla: u8, ins: u8) -> Self {
        Command {
            cla,
            ins,
            p1: 0,
            p2: 0,
            data: Vec::new(),
        }
    }

    /// Set both instruction parameters
    pub fn with_params(mut self, p1: u8, p2: u8) -> Self {
        self.p1 = p1;
        self.p2 = p2;
        self
    }

    /// Set the command data
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    /// Serialize to wire format
    pub fn encode(&self) -> ApduResult<Vec<u8>> {
        encode(self.cla, self.ins, self.p1, self.p2, &self.data)
    }
}

/// Encode a command APDU, appending the data length
pub fn encode(cla: u8, ins: u8, p1: u8, p2: u8, data: &[u8]) -> ApduResult<Vec<u8>> {
    let len = u8::try_from(data.len())
        .map_err(|_| ApduError::FrameTooLarge { len: data.len() })?;

    let mut frame = Vec::with_capacity(5 + data.len());
    frame.extend_from_slice(&[cla, ins, p1, p2, len]);
    frame.extend_from_slice(data);
    Ok(frame)
}

/// Alias of [`encode`] kept for callers used to the `pack_APDU` helper name
pub fn pack_apdu(cla: u8, ins: u8, p1: u8, p2: u8, data: &[u8]) -> ApduResult<Vec<u8>> {
    encode(cla, ins, p1, p2, data)
}

/// Split a raw response into status word and data
pub fn decode(raw: &[u8]) -> ApduResult<(u16, Vec<u8>)> {
    if raw.len() < 2 {
        return Err(ApduError::MalformedResponse { len: raw.len() });
    }

    let (data, sw) = raw.split_at(raw.len() - 2);
    Ok((u16::from_be_bytes([sw[0], sw[1]]), data.to_vec()))
}

/// Response APDU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Status word
    pub status: u16,
    /// Response data (status word excluded)
    pub data: Vec<u8>,
}

impl Response {
    /// Create a response from its parts
    pub fn new(status: u16, data: impl Into<Vec<u8>>) -> Self {
        Response {
            status,
            data: data.into(),
        }
    }

    /// Parse a raw `DATA || SW` frame
    pub fn from_bytes(raw: &[u8]) -> ApduResult<Self> {
        let (status, data) = decode(raw)?;
        Ok(Response { status, data })
    }

    /// Serialize back to `DATA || SW`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.data.len() + 2);
        raw.extend_from_slice(&self.data);
        raw.extend_from_slice(&self.status.to_be_bytes());
        raw
    }

    /// Whether the status word is `0x9000`
    pub fn is_success(&self) -> bool {
        self.status == SW_OK
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Response(status={:#06x}, data={})",
            self.status,
            hex::encode(&self.data)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_layout() {
        let frame = encode(0xE0, 0x01, 0x02, 0x03, &[0xAA, 0xBB]).unwrap();
        assert_eq!(frame, hex::decode("e0010203 02 aabb".replace(' ', "")).unwrap());
    }

    #[test]
    fn test_encode_empty_data() {
        let frame = Command::new(0xE0, 0x01).encode().unwrap();
        assert_eq!(frame, vec![0xE0, 0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_encode_size_limit() {
        let max = vec![0x42; MAX_DATA_LEN];
        let frame = encode(0, 0, 0, 0, &max).unwrap();
        assert_eq!(frame[4], 0xFF);
        assert_eq!(frame.len(), 5 + MAX_DATA_LEN);

        let too_large = vec![0x42; MAX_DATA_LEN + 1];
        assert!(matches!(
            encode(0, 0, 0, 0, &too_large),
            Err(ApduError::FrameTooLarge { len: 256 })
        ));
    }

    #[test]
    fn test_decode_status_only() {
        let (status, data) = decode(&[0x90, 0x00]).unwrap();
        assert_eq!(status, SW_OK);
        assert!(data.is_empty());
    }

    #[test]
    fn test_decode_short_frame() {
        assert!(matches!(decode(&[]), Err(ApduError::MalformedResponse { len: 0 })));
        assert!(matches!(decode(&[0x90]), Err(ApduError::MalformedResponse { len: 1 })));
    }

    #[test]
    fn test_response_display() {
        let response = Response::new(0x6F00, vec![0x01, 0x02]);
        assert_eq!(response.to_string(), "Response(status=0x6f00, data=0102)");
        assert!(!response.is_success());
    }

    proptest! {
        #[test]
        fn test_echo_roundtrip(
            cla in any::<u8>(),
            ins in any::<u8>(),
            p1 in any::<u8>(),
            p2 in any::<u8>(),
            data in proptest::collection::vec(any::<u8>(), 0..=MAX_DATA_LEN),
            status in any::<u16>(),
        ) {
            // A transport that echoes the command data back followed by a status
            let frame = encode(cla, ins, p1, p2, &data).unwrap();
            prop_assert_eq!(frame[4] as usize, data.len());

            let mut echoed = frame[5..].to_vec();
            echoed.extend_from_slice(&status.to_be_bytes());

            let response = Response::from_bytes(&echoed).unwrap();
            prop_assert_eq!(response.status, status);
            prop_assert_eq!(response.to_bytes(), echoed);
            prop_assert_eq!(response.data, data);
        }
    }
}
