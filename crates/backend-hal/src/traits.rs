//! Traits for backend abstraction

use std::path::Path;
use std::time::Duration;

use apdu_core::{encode, Firmware, RaisePolicy, Response};
use serde::{Deserialize, Serialize};

use crate::exchange::{Connection, PendingExchange};
use crate::state::{BackendCore, BackendState};
use crate::{BackendError, BackendResult};

/// Default press duration of [`Backend::finger_touch`]
pub const DEFAULT_TOUCH_DELAY: Duration = Duration::from_millis(500);

/// Default timeout of [`Backend::wait_for_screen_change`]
pub const DEFAULT_SCREEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Pixels removed from each border before a snapshot comparison
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crop {
    /// Left border
    pub left: u32,
    /// Right border
    pub right: u32,
    /// Top border
    pub top: u32,
    /// Bottom border
    pub bottom: u32,
}

/// Text currently displayed, one entry per element
pub type ScreenContent = Vec<String>;

/// Screen inspection provided outside the protocol layer
pub trait ScreenComparator {
    /// Compare the screen with a golden snapshot (or record it on a golden run)
    fn compare_with_snapshot(
        &mut self,
        golden: &Path,
        crop: Option<Crop>,
        tmp: Option<&Path>,
        golden_run: bool,
    ) -> bool;

    /// Whether the screen shows `text`
    fn compare_with_text(&mut self, text: &str) -> bool;

    /// Block until the screen changes; `false` on timeout
    fn wait_for_change(&mut self, timeout: Duration) -> bool;

    /// Current screen content
    fn current_content(&mut self) -> ScreenContent;
}

/// Core trait for secure element backends
///
/// Implementors provide the transport hooks (`open_transport`, `transmit`,
/// `read_response`, `transceive`, ...) and the UI primitives. Backends with no
/// screen or buttons implement UI primitives as no-ops. Everything else
/// (framing, APDU logging, raise policy, async exchanges) is provided here on
/// top of [`BackendCore`].
pub trait Backend {
    /// Shared state
    fn core(&self) -> &BackendCore;

    /// Shared state, mutable
    fn core_mut(&mut self) -> &mut BackendCore;

    /// Acquire the transport handle
    fn open_transport(&mut self) -> BackendResult<()>;

    /// Release the transport handle
    fn close_transport(&mut self) -> BackendResult<()>;

    /// Hand a raw frame to the transport
    fn transmit(&mut self, frame: &[u8]) -> BackendResult<()>;

    /// Read one response from the transport, before policy checks
    fn read_response(&mut self) -> BackendResult<Response>;

    /// Send then read in one transport operation, before policy checks
    fn transceive(&mut self, frame: &[u8]) -> BackendResult<Response>;

    /// Press the right button
    fn right_click(&mut self) -> BackendResult<()>;

    /// Press the left button
    fn left_click(&mut self) -> BackendResult<()>;

    /// Press both buttons
    fn both_click(&mut self) -> BackendResult<()>;

    /// Touch the screen at `(x, y)` for `delay`
    fn finger_touch(&mut self, x: u32, y: u32, delay: Duration) -> BackendResult<()>;

    /// Compare the screen with a golden snapshot
    fn compare_screen_with_snapshot(
        &mut self,
        golden: &Path,
        crop: Option<Crop>,
        tmp: Option<&Path>,
        golden_run: bool,
    ) -> BackendResult<bool>;

    /// Wait until the screen content changes
    fn wait_for_screen_change(&mut self, timeout: Duration) -> BackendResult<()>;

    /// Whether the screen currently shows `text`
    fn compare_screen_with_text(&mut self, text: &str) -> BackendResult<bool>;

    /// Current screen content
    fn get_current_screen_content(&mut self) -> BackendResult<ScreenContent>;

    /// Managed firmware
    fn firmware(&self) -> Firmware {
        self.core().firmware()
    }

    /// Active raise policy
    fn raise_policy(&self) -> RaisePolicy {
        self.core().raise_policy()
    }

    /// Change the raise policy for the following exchanges
    fn set_raise_policy(&mut self, policy: RaisePolicy) {
        self.core_mut().set_raise_policy(policy);
    }

    /// Response of the last completed asynchronous exchange
    ///
    /// `None` if no asynchronous exchange completed, or if the last one failed
    /// or was abandoned.
    fn last_async_response(&self) -> Option<&Response> {
        self.core().last_async_response()
    }

    /// Open the backend
    ///
    /// Opening an already open backend keeps the current transport handle.
    fn open(&mut self) -> BackendResult<()> {
        if self.core().in_flight {
            return Err(BackendError::ExchangeInFlight);
        }
        if self.core().state == BackendState::Open {
            return Ok(());
        }

        self.open_transport()?;
        let core = self.core_mut();
        core.state = BackendState::Open;
        core.in_flight = false;
        core.undrained = false;
        Ok(())
    }

    /// Close the backend, releasing the transport unconditionally
    ///
    /// Refused while an asynchronous exchange waits for its response.
    fn close(&mut self) -> BackendResult<()> {
        if self.core().in_flight {
            return Err(BackendError::ExchangeInFlight);
        }

        let core = self.core_mut();
        core.state = BackendState::Closed;
        self.close_transport()
    }

    /// Close then reopen, keeping policy and logging configuration
    fn reset(&mut self) -> BackendResult<()> {
        log::info!("Re-starting backend stream");
        self.close()?;
        self.open()
    }

    /// Open the backend for the lifetime of the returned guard
    ///
    /// Dropping the guard closes the backend and shuts the APDU log down, on
    /// every exit path.
    fn connect(&mut self) -> BackendResult<Connection<'_, Self>>
    where
        Self: Sized,
    {
        self.open()?;
        Ok(Connection::new(self))
    }

    /// Send a raw, already framed APDU
    fn send_raw(&mut self, frame: &[u8]) -> BackendResult<()> {
        self.core().ensure_ready()?;
        self.core_mut().logger.log_send(frame);
        self.transmit(frame)
    }

    /// Frame and send an APDU
    fn send(&mut self, cla: u8, ins: u8, p1: u8, p2: u8, data: &[u8]) -> BackendResult<()> {
        let frame = encode(cla, ins, p1, p2, data)?;
        self.send_raw(&frame)
    }

    /// Receive the response to a previously sent APDU
    fn receive(&mut self) -> BackendResult<Response> {
        self.core().ensure_ready()?;
        let response = self.read_response()?;
        self.core_mut().check_response(response)
    }

    /// Send a raw APDU and receive its response
    fn exchange_raw(&mut self, frame: &[u8]) -> BackendResult<Response> {
        self.core().ensure_ready()?;
        self.core_mut().logger.log_send(frame);
        let response = self.transceive(frame)?;
        self.core_mut().check_response(response)
    }

    /// Frame an APDU, send it and receive its response
    fn exchange(
        &mut self,
        cla: u8,
        ins: u8,
        p1: u8,
        p2: u8,
        data: &[u8],
    ) -> BackendResult<Response> {
        let frame = encode(cla, ins, p1, p2, data)?;
        self.exchange_raw(&frame)
    }

    /// Send a raw APDU and hand control back before its response is read
    ///
    /// The response is read by [`PendingExchange::complete`]. Until then the
    /// backend only accepts UI and screen operations.
    fn exchange_async_raw(&mut self, frame: &[u8]) -> BackendResult<PendingExchange<'_, Self>>
    where
        Self: Sized,
    {
        self.core().ensure_ready()?;
        self.core_mut().last_async_response = None;
        self.send_raw(frame)?;
        self.core_mut().in_flight = true;
        Ok(PendingExchange::new(self))
    }

    /// Framed variant of [`Backend::exchange_async_raw`]
    fn exchange_async(
        &mut self,
        cla: u8,
        ins: u8,
        p1: u8,
        p2: u8,
        data: &[u8],
    ) -> BackendResult<PendingExchange<'_, Self>>
    where
        Self: Sized,
    {
        let frame = encode(cla, ins, p1, p2, data)?;
        self.exchange_async_raw(&frame)
    }

    /// Run `body` between sending `frame` and receiving its response
    ///
    /// If `body` fails the response is left unread, see [`PendingExchange`].
    fn exchange_async_raw_with<F>(&mut self, frame: &[u8], body: F) -> BackendResult<Response>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> BackendResult<()>,
    {
        let mut pending = self.exchange_async_raw(frame)?;
        body(&mut *pending)?;
        pending.complete()
    }

    /// Read and drop the response left behind by an abandoned async exchange
    fn discard_pending(&mut self) -> BackendResult<Option<Response>> {
        if !self.core().undrained {
            return Ok(None);
        }
        if self.core().state != BackendState::Open {
            return Err(BackendError::NotOpen);
        }

        let response = self.read_response()?;
        let core = self.core_mut();
        core.logger.log_receive(&response);
        core.undrained = false;
        log::info!("Discarded response {} of an abandoned exchange", response);
        Ok(Some(response))
    }
}
