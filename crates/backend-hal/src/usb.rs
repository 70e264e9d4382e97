//! USB device backend
//!
//! Physical devices reached through a [`UsbChannel`]. The device has a screen
//! and buttons, but they are operated by hand: every UI and screen operation
//! is a no-op here, and exchanges simply wait until the user has acted.

use std::path::Path;
use std::thread;
use std::time::Duration;

use apdu_core::{Firmware, Response};
use thiserror::Error;

use crate::state::BackendCore;
use crate::traits::{Backend, Crop, ScreenContent};
use crate::{BackendError, BackendResult};

/// Delay before the single retry of a failed open
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Channel-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Device reported an error status through the channel
    #[error("Device communication error: status {:#06x}", .status)]
    Comm {
        /// Status word
        status: u16,
        /// Response data
        data: Vec<u8>,
    },

    /// Channel I/O failure
    #[error("USB channel error: {0}")]
    Io(String),
}

/// Byte-level link to a USB device
pub trait UsbChannel {
    /// Acquire the device handle
    fn connect(&mut self) -> Result<(), ChannelError>;

    /// Release the device handle
    fn disconnect(&mut self);

    /// Write a raw APDU
    fn write(&mut self, frame: &[u8]) -> Result<(), ChannelError>;

    /// Read a raw `DATA || SW` response
    fn read(&mut self) -> Result<Vec<u8>, ChannelError>;

    /// Write then read
    fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>, ChannelError>;
}

/// Backend over a USB channel
pub struct UsbBackend<C: UsbChannel> {
    core: BackendCore,
    channel: C,
    connected: bool,
    retry_delay: Duration,
}

impl<C: UsbChannel> UsbBackend<C> {
    /// Create new USB backend for `firmware`
    pub fn new(firmware: Firmware, channel: C) -> Self {
        Self::with_core(BackendCore::new(firmware), channel)
    }

    /// Create from preconfigured state
    pub fn with_core(core: BackendCore, channel: C) -> Self {
        UsbBackend {
            core,
            channel,
            connected: false,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Change the delay before retrying a failed open
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Underlying channel
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Turn a channel outcome into a response
    ///
    /// Errors carrying a status become ordinary responses so that the raise
    /// policy alone decides what fails.
    fn response_from(result: Result<Vec<u8>, ChannelError>) -> BackendResult<Response> {
        match result {
            Ok(raw) => Ok(Response::from_bytes(&raw)?),
            Err(ChannelError::Comm { status, data }) => Ok(Response::new(status, data)),
            Err(ChannelError::Io(msg)) => Err(BackendError::TransportFailure(msg)),
        }
    }
}

impl<C: UsbChannel> Backend for UsbBackend<C> {
    fn core(&self) -> &BackendCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BackendCore {
        &mut self.core
    }

    fn open_transport(&mut self) -> BackendResult<()> {
        log::info!("Starting USB backend stream ({})", self.core.firmware());

        if let Err(e) = self.channel.connect() {
            // The bus may still be enumerating the device after a previous session
            log::warn!("USB connect failed ({}), retrying in {:?}", e, self.retry_delay);
            thread::sleep(self.retry_delay);
            self.channel
                .connect()
                .map_err(|e| BackendError::TransportFailure(e.to_string()))?;
        }

        self.connected = true;
        Ok(())
    }

    fn close_transport(&mut self) -> BackendResult<()> {
        if self.connected {
            self.channel.disconnect();
            self.connected = false;
            log::info!("USB backend stream closed");
        }
        Ok(())
    }

    fn transmit(&mut self, frame: &[u8]) -> BackendResult<()> {
        self.channel
            .write(frame)
            .map_err(|e| BackendError::TransportFailure(e.to_string()))
    }

    fn read_response(&mut self) -> BackendResult<Response> {
        Self::response_from(self.channel.read())
    }

    fn transceive(&mut self, frame: &[u8]) -> BackendResult<Response> {
        Self::response_from(self.channel.exchange(frame))
    }

    fn right_click(&mut self) -> BackendResult<()> {
        Ok(())
    }

    fn left_click(&mut self) -> BackendResult<()> {
        Ok(())
    }

    fn both_click(&mut self) -> BackendResult<()> {
        Ok(())
    }

    fn finger_touch(&mut self, _x: u32, _y: u32, _delay: Duration) -> BackendResult<()> {
        Ok(())
    }

    fn compare_screen_with_snapshot(
        &mut self,
        _golden: &Path,
        _crop: Option<Crop>,
        _tmp: Option<&Path>,
        _golden_run: bool,
    ) -> BackendResult<bool> {
        Ok(true)
    }

    fn wait_for_screen_change(&mut self, _timeout: Duration) -> BackendResult<()> {
        Ok(())
    }

    fn compare_screen_with_text(&mut self, _text: &str) -> BackendResult<bool> {
        Ok(true)
    }

    fn get_current_screen_content(&mut self) -> BackendResult<ScreenContent> {
        Ok(Vec::new())
    }
}
