//! USB HID transport framing
//!
//! APDUs travel in fixed 64-byte HID reports:
//! `channel(2) || tag(1) || sequence(2) || [apdu length(2)] || chunk`,
//! the length only appearing in the first report. Reports are zero padded.
//!
//! The `hid` feature adds [`HidChannel`], a [`UsbChannel`](crate::UsbChannel)
//! over `hidapi`.

use thiserror::Error;

/// Size of a HID report
pub const HID_PACKET_SIZE: usize = 64;

/// Channel identifier used by the device
pub const DEVICE_CHANNEL: u16 = 0x0101;

/// Report tag for APDU payloads
pub const TAG_APDU: u8 = 0x05;

/// USB vendor id of supported devices
pub const LEDGER_VENDOR_ID: u16 = 0x2c97;

const HEADER_LEN: usize = 5;

/// HID reassembly errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum HidFramingError {
    /// Report is not a full HID packet
    #[error("Invalid HID report length: {0}")]
    InvalidLength(usize),

    /// Report belongs to another channel
    #[error("Unexpected HID channel: {0:#06x}")]
    InvalidChannel(u16),

    /// Report is not an APDU report
    #[error("Unexpected HID tag: {0:#04x}")]
    InvalidTag(u8),

    /// Report arrived out of order
    #[error("Unexpected HID sequence: expected {expected}, got {actual}")]
    InvalidSequence {
        /// Expected index
        expected: u16,
        /// Received index
        actual: u16,
    },

    /// APDU does not fit the 16-bit length field
    #[error("APDU too large for HID framing: {0} bytes")]
    TooLarge(usize),
}

/// Split an APDU into HID reports
pub fn wrap_apdu(apdu: &[u8]) -> Result<Vec<[u8; HID_PACKET_SIZE]>, HidFramingError> {
    let len = u16::try_from(apdu.len()).map_err(|_| HidFramingError::TooLarge(apdu.len()))?;

    // The length prefix is framed as part of the payload stream
    let mut stream = Vec::with_capacity(apdu.len() + 2);
    stream.extend_from_slice(&len.to_be_bytes());
    stream.extend_from_slice(apdu);

    let mut packets = Vec::new();
    for (seq, chunk) in stream.chunks(HID_PACKET_SIZE - HEADER_LEN).enumerate() {
        let mut packet = [0u8; HID_PACKET_SIZE];
        packet[..2].copy_from_slice(&DEVICE_CHANNEL.to_be_bytes());
        packet[2] = TAG_APDU;
        packet[3..5].copy_from_slice(&(seq as u16).to_be_bytes());
        packet[HEADER_LEN..HEADER_LEN + chunk.len()].copy_from_slice(chunk);
        packets.push(packet);
    }
    Ok(packets)
}

/// Rebuilds an APDU from consecutive HID reports
#[derive(Debug, Default)]
pub struct HidReassembler {
    sequence: u16,
    expected: Option<usize>,
    buffer: Vec<u8>,
}

impl HidReassembler {
    /// Empty reassembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one report; returns the APDU once complete
    pub fn push(&mut self, packet: &[u8]) -> Result<Option<Vec<u8>>, HidFramingError> {
        if packet.len() < HEADER_LEN || packet.len() > HID_PACKET_SIZE {
            return Err(HidFramingError::InvalidLength(packet.len()));
        }

        let channel = u16::from_be_bytes([packet[0], packet[1]]);
        if channel != DEVICE_CHANNEL {
            return Err(HidFramingError::InvalidChannel(channel));
        }
        if packet[2] != TAG_APDU {
            return Err(HidFramingError::InvalidTag(packet[2]));
        }
        let sequence = u16::from_be_bytes([packet[3], packet[4]]);
        if sequence != self.sequence {
            return Err(HidFramingError::InvalidSequence {
                expected: self.sequence,
                actual: sequence,
            });
        }

        let mut chunk = &packet[HEADER_LEN..];
        if self.expected.is_none() {
            if chunk.len() < 2 {
                return Err(HidFramingError::InvalidLength(packet.len()));
            }
            self.expected = Some(u16::from_be_bytes([chunk[0], chunk[1]]) as usize);
            chunk = &chunk[2..];
        }
        self.sequence = self.sequence.wrapping_add(1);

        let expected = self.expected.unwrap_or_default();
        let take = chunk.len().min(expected - self.buffer.len());
        self.buffer.extend_from_slice(&chunk[..take]);

        if self.buffer.len() == expected {
            let apdu = std::mem::take(&mut self.buffer);
            *self = HidReassembler::new();
            Ok(Some(apdu))
        } else {
            Ok(None)
        }
    }
}

#[cfg(feature = "hid")]
pub use device::HidChannel;

#[cfg(feature = "hid")]
mod device {
    use std::time::Duration;

    use apdu_core::{Response, SW_OK};
    use hidapi::{HidApi, HidDevice};

    use super::{wrap_apdu, HidReassembler, HID_PACKET_SIZE, LEDGER_VENDOR_ID};
    use crate::usb::{ChannelError, UsbChannel};

    /// USB HID channel to the first connected device
    pub struct HidChannel {
        vendor_id: u16,
        read_timeout: Duration,
        device: Option<HidDevice>,
    }

    impl HidChannel {
        /// Channel to devices with the default vendor id
        pub fn new(read_timeout: Duration) -> Self {
            HidChannel {
                vendor_id: LEDGER_VENDOR_ID,
                read_timeout,
                device: None,
            }
        }

        /// Select another vendor id
        pub fn with_vendor_id(mut self, vendor_id: u16) -> Self {
            self.vendor_id = vendor_id;
            self
        }

        fn device(&self) -> Result<&HidDevice, ChannelError> {
            self.device
                .as_ref()
                .ok_or_else(|| ChannelError::Io("HID device not connected".to_string()))
        }
    }

    impl UsbChannel for HidChannel {
        fn connect(&mut self) -> Result<(), ChannelError> {
            let api = HidApi::new().map_err(|e| ChannelError::Io(e.to_string()))?;
            let info = api
                .device_list()
                .filter(|info| info.vendor_id() == self.vendor_id)
                .find(|info| info.interface_number() == 0 || info.usage_page() == 0xffa0)
                .ok_or_else(|| {
                    ChannelError::Io(format!(
                        "no HID device with vendor id {:#06x}",
                        self.vendor_id
                    ))
                })?;

            let device = info
                .open_device(&api)
                .map_err(|e| ChannelError::Io(e.to_string()))?;
            log::info!(
                "Opened HID device {:04x}:{:04x}",
                info.vendor_id(),
                info.product_id()
            );
            self.device = Some(device);
            Ok(())
        }

        fn disconnect(&mut self) {
            self.device = None;
        }

        fn write(&mut self, frame: &[u8]) -> Result<(), ChannelError> {
            let device = self.device()?;
            let packets = wrap_apdu(frame).map_err(|e| ChannelError::Io(e.to_string()))?;
            for packet in packets {
                // Leading report id
                let mut report = Vec::with_capacity(HID_PACKET_SIZE + 1);
                report.push(0x00);
                report.extend_from_slice(&packet);
                device
                    .write(&report)
                    .map_err(|e| ChannelError::Io(e.to_string()))?;
            }
            Ok(())
        }

        fn read(&mut self) -> Result<Vec<u8>, ChannelError> {
            let device = self.device()?;
            let timeout = i32::try_from(self.read_timeout.as_millis()).unwrap_or(i32::MAX);
            let mut reassembler = HidReassembler::new();
            let mut buffer = [0u8; HID_PACKET_SIZE];

            loop {
                let read = device
                    .read_timeout(&mut buffer, timeout)
                    .map_err(|e| ChannelError::Io(e.to_string()))?;
                if read == 0 {
                    // Device still waiting on user input
                    continue;
                }
                if let Some(apdu) = reassembler
                    .push(&buffer[..read])
                    .map_err(|e| ChannelError::Io(e.to_string()))?
                {
                    return Ok(apdu);
                }
            }
        }

        fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>, ChannelError> {
            self.write(frame)?;
            let raw = self.read()?;
            let response =
                Response::from_bytes(&raw).map_err(|e| ChannelError::Io(e.to_string()))?;
            if response.status != SW_OK {
                return Err(ChannelError::Comm {
                    status: response.status,
                    data: response.data,
                });
            }
            Ok(raw)
        }
    }
}
