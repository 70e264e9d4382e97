//! Protocol simulator backend
//!
//! Answers APDUs in process through an [`ApduHandler`]. There is no device
//! screen: UI primitives are journaled and otherwise ignored, and screen
//! queries go to an optional [`ScreenComparator`].

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use apdu_core::{Firmware, Response};

use crate::state::BackendCore;
use crate::traits::{Backend, Crop, ScreenComparator, ScreenContent};
use crate::{BackendError, BackendResult};

/// Simulated device application
pub trait ApduHandler {
    /// Answer a raw command with a raw `DATA || SW` response
    fn handle(&mut self, command: &[u8]) -> Vec<u8>;
}

impl<F> ApduHandler for F
where
    F: FnMut(&[u8]) -> Vec<u8>,
{
    fn handle(&mut self, command: &[u8]) -> Vec<u8> {
        self(command)
    }
}

/// Journal entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// Command handed to the device
    Command(Vec<u8>),
    /// Response read back
    Response(Vec<u8>),
    /// Right button
    RightClick,
    /// Left button
    LeftClick,
    /// Both buttons
    BothClick,
    /// Screen touch
    Touch {
        /// Horizontal coordinate
        x: u32,
        /// Vertical coordinate
        y: u32,
    },
}

/// In-process simulator backend
pub struct SimulatorBackend<H: ApduHandler> {
    core: BackendCore,
    handler: H,
    comparator: Option<Box<dyn ScreenComparator>>,
    replies: VecDeque<Vec<u8>>,
    journal: Vec<SimEvent>,
    running: bool,
}

impl<H: ApduHandler> SimulatorBackend<H> {
    /// Create new simulator for `firmware`
    pub fn new(firmware: Firmware, handler: H) -> Self {
        Self::with_core(BackendCore::new(firmware), handler)
    }

    /// Create from preconfigured state
    pub fn with_core(core: BackendCore, handler: H) -> Self {
        SimulatorBackend {
            core,
            handler,
            comparator: None,
            replies: VecDeque::new(),
            journal: Vec::new(),
            running: false,
        }
    }

    /// Route screen queries to `comparator`
    pub fn with_comparator(mut self, comparator: impl ScreenComparator + 'static) -> Self {
        self.comparator = Some(Box::new(comparator));
        self
    }

    /// Everything the device saw, in order
    pub fn journal(&self) -> &[SimEvent] {
        &self.journal
    }

    fn ensure_running(&self) -> BackendResult<()> {
        if !self.running {
            return Err(BackendError::TransportFailure(
                "simulator not running".to_string(),
            ));
        }
        Ok(())
    }
}

impl<H: ApduHandler> Backend for SimulatorBackend<H> {
    fn core(&self) -> &BackendCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BackendCore {
        &mut self.core
    }

    fn open_transport(&mut self) -> BackendResult<()> {
        log::info!("Starting simulator ({})", self.core.firmware());
        self.running = true;
        Ok(())
    }

    fn close_transport(&mut self) -> BackendResult<()> {
        self.running = false;
        self.replies.clear();
        Ok(())
    }

    fn transmit(&mut self, frame: &[u8]) -> BackendResult<()> {
        self.ensure_running()?;
        self.journal.push(SimEvent::Command(frame.to_vec()));
        let reply = self.handler.handle(frame);
        self.replies.push_back(reply);
        Ok(())
    }

    fn read_response(&mut self) -> BackendResult<Response> {
        self.ensure_running()?;
        let raw = self
            .replies
            .pop_front()
            .ok_or_else(|| BackendError::TransportFailure("no response pending".to_string()))?;
        self.journal.push(SimEvent::Response(raw.clone()));
        Ok(Response::from_bytes(&raw)?)
    }

    fn transceive(&mut self, frame: &[u8]) -> BackendResult<Response> {
        self.transmit(frame)?;
        self.read_response()
    }

    fn right_click(&mut self) -> BackendResult<()> {
        self.journal.push(SimEvent::RightClick);
        Ok(())
    }

    fn left_click(&mut self) -> BackendResult<()> {
        self.journal.push(SimEvent::LeftClick);
        Ok(())
    }

    fn both_click(&mut self) -> BackendResult<()> {
        self.journal.push(SimEvent::BothClick);
        Ok(())
    }

    fn finger_touch(&mut self, x: u32, y: u32, _delay: Duration) -> BackendResult<()> {
        self.journal.push(SimEvent::Touch { x, y });
        Ok(())
    }

    fn compare_screen_with_snapshot(
        &mut self,
        golden: &Path,
        crop: Option<Crop>,
        tmp: Option<&Path>,
        golden_run: bool,
    ) -> BackendResult<bool> {
        Ok(match self.comparator.as_mut() {
            Some(comparator) => comparator.compare_with_snapshot(golden, crop, tmp, golden_run),
            None => true,
        })
    }

    fn wait_for_screen_change(&mut self, timeout: Duration) -> BackendResult<()> {
        let changed = match self.comparator.as_mut() {
            Some(comparator) => comparator.wait_for_change(timeout),
            None => true,
        };
        if !changed {
            return Err(BackendError::ScreenTimeout(timeout));
        }
        Ok(())
    }

    fn compare_screen_with_text(&mut self, text: &str) -> BackendResult<bool> {
        Ok(match self.comparator.as_mut() {
            Some(comparator) => comparator.compare_with_text(text),
            None => true,
        })
    }

    fn get_current_screen_content(&mut self) -> BackendResult<ScreenContent> {
        Ok(match self.comparator.as_mut() {
            Some(comparator) => comparator.current_content(),
            None => Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{DEFAULT_SCREEN_TIMEOUT, DEFAULT_TOUCH_DELAY};
    use apdu_core::{RaisePolicy, SW_OK};

    /// Echoes the command data back with the status chosen by P1
    fn echo(command: &[u8]) -> Vec<u8> {
        let mut reply = command[5..].to_vec();
        let status: u16 = if command[2] == 0 { SW_OK } else { 0x6F00 };
        reply.extend_from_slice(&status.to_be_bytes());
        reply
    }

    fn simulator() -> SimulatorBackend<fn(&[u8]) -> Vec<u8>> {
        let mut sim = SimulatorBackend::new(Firmware::Stax, echo as fn(&[u8]) -> Vec<u8>);
        sim.open().unwrap();
        sim
    }

    struct FixedScreen {
        lines: Vec<String>,
        changes: bool,
    }

    impl ScreenComparator for FixedScreen {
        fn compare_with_snapshot(
            &mut self,
            _golden: &Path,
            _crop: Option<Crop>,
            _tmp: Option<&Path>,
            _golden_run: bool,
        ) -> bool {
            false
        }

        fn compare_with_text(&mut self, text: &str) -> bool {
            self.lines.iter().any(|line| line.contains(text))
        }

        fn wait_for_change(&mut self, _timeout: Duration) -> bool {
            self.changes
        }

        fn current_content(&mut self) -> ScreenContent {
            self.lines.clone()
        }
    }

    #[test]
    fn test_exchange_composition() {
        let mut sim = simulator();
        sim.set_raise_policy(RaisePolicy::RaiseNothing);

        let response = sim.exchange(0xE0, 0x01, 0x01, 0x02, &[0xCA, 0xFE]).unwrap();
        assert_eq!(response, Response::new(0x6F00, vec![0xCA, 0xFE]));

        let response = sim.exchange(0xE0, 0x01, 0x00, 0x00, &[0x01, 0x02]).unwrap();
        assert_eq!(response, Response::new(0x9000, vec![0x01, 0x02]));
    }

    #[test]
    fn test_send_then_receive() {
        let mut sim = simulator();
        sim.send(0xE0, 0x02, 0, 0, &[0x07]).unwrap();
        let response = sim.receive().unwrap();
        assert_eq!(response.data, vec![0x07]);

        assert!(matches!(
            sim.receive(),
            Err(BackendError::TransportFailure(_))
        ));
    }

    #[test]
    fn test_async_exchange_interleaves_ui() {
        let mut sim = simulator();

        let mut pending = sim.exchange_async(0xE0, 0x03, 0, 0, &[0x01]).unwrap();
        assert!(pending.last_async_response().is_none());
        pending.right_click().unwrap();
        pending.both_click().unwrap();
        pending.finger_touch(10, 20, DEFAULT_TOUCH_DELAY).unwrap();
        let response = pending.complete().unwrap();

        assert_eq!(
            sim.journal(),
            &[
                SimEvent::Command(vec![0xE0, 0x03, 0x00, 0x00, 0x01, 0x01]),
                SimEvent::RightClick,
                SimEvent::BothClick,
                SimEvent::Touch { x: 10, y: 20 },
                SimEvent::Response(vec![0x01, 0x90, 0x00]),
            ]
        );
        assert_eq!(sim.last_async_response(), Some(&response));
    }

    #[test]
    fn test_async_exchange_with_closure() {
        let mut sim = simulator();

        let response = sim
            .exchange_async_raw_with(&[0xE0, 0x05, 0x00, 0x00, 0x00], |backend| {
                assert!(backend.last_async_response().is_none());
                backend.left_click()
            })
            .unwrap();
        assert!(response.is_success());
        assert_eq!(sim.journal()[1], SimEvent::LeftClick);
    }

    #[test]
    fn test_async_clears_previous_response() {
        let mut sim = simulator();
        sim.exchange_async(0xE0, 0x01, 0, 0, &[]).unwrap().complete().unwrap();
        assert!(sim.last_async_response().is_some());

        let pending = sim.exchange_async(0xE0, 0x01, 0, 0, &[]).unwrap();
        assert!(pending.last_async_response().is_none());
        pending.complete().unwrap();
        assert!(sim.last_async_response().is_some());
    }

    #[test]
    fn test_async_rejected_leaves_no_response() {
        let mut sim = simulator();
        let pending = sim.exchange_async(0xE0, 0x01, 0x01, 0, &[]).unwrap();
        let err = pending.complete().unwrap_err();
        assert_eq!(err.status(), Some(0x6F00));
        assert!(sim.last_async_response().is_none());

        // The failed receive did drain the device
        assert!(sim.exchange(0xE0, 0x01, 0, 0, &[]).is_ok());
    }

    #[test]
    fn test_no_overlapping_exchanges() {
        let mut sim = simulator();
        let mut pending = sim.exchange_async(0xE0, 0x01, 0, 0, &[]).unwrap();

        assert!(matches!(
            pending.exchange(0xE0, 0x02, 0, 0, &[]),
            Err(BackendError::ExchangeInFlight)
        ));
        assert!(matches!(pending.receive(), Err(BackendError::ExchangeInFlight)));
        assert!(pending.complete().is_ok());
    }

    #[test]
    fn test_lifecycle_refused_while_pending() {
        // Device answers with the instruction byte it received
        let mut sim = SimulatorBackend::new(Firmware::NanoX, |command: &[u8]| {
            vec![command[1], 0x90, 0x00]
        });
        sim.open().unwrap();

        let mut pending = sim.exchange_async(0xE0, 0xAA, 0, 0, &[]).unwrap();
        assert!(matches!(pending.open(), Err(BackendError::ExchangeInFlight)));
        assert!(matches!(pending.close(), Err(BackendError::ExchangeInFlight)));
        assert!(matches!(pending.reset(), Err(BackendError::ExchangeInFlight)));
        assert!(matches!(
            pending.exchange(0xE0, 0xBB, 0, 0, &[]),
            Err(BackendError::ExchangeInFlight)
        ));
        assert_eq!(pending.core().state(), crate::BackendState::Open);

        let response = pending.complete().unwrap();
        assert_eq!(response.data, vec![0xAA]);

        let response = sim.exchange(0xE0, 0xBB, 0, 0, &[]).unwrap();
        assert_eq!(response.data, vec![0xBB]);
    }

    #[test]
    fn test_abandoned_exchange_must_be_drained() {
        let mut sim = simulator();

        let result = sim.exchange_async_raw_with(&[0xE0, 0x06, 0x00, 0x00, 0x00], |_| {
            Err(BackendError::ScreenTimeout(DEFAULT_SCREEN_TIMEOUT))
        });
        assert!(matches!(result, Err(BackendError::ScreenTimeout(_))));
        assert!(sim.last_async_response().is_none());

        assert!(matches!(
            sim.exchange(0xE0, 0x01, 0, 0, &[]),
            Err(BackendError::UndrainedResponse)
        ));

        let discarded = sim.discard_pending().unwrap().unwrap();
        assert!(discarded.is_success());
        assert!(sim.discard_pending().unwrap().is_none());
        assert!(sim.exchange(0xE0, 0x01, 0, 0, &[]).is_ok());
    }

    #[test]
    fn test_reset_recovers_abandoned_exchange() {
        let mut sim = simulator();
        drop(sim.exchange_async(0xE0, 0x01, 0, 0, &[]).unwrap());

        sim.reset().unwrap();
        assert!(sim.exchange(0xE0, 0x01, 0, 0, &[]).is_ok());
    }

    #[test]
    fn test_screen_without_comparator() {
        let mut sim = simulator();
        assert!(sim.compare_screen_with_text("anything").unwrap());
        assert!(sim
            .compare_screen_with_snapshot(Path::new("golden/00000.png"), None, None, false)
            .unwrap());
        assert!(sim.wait_for_screen_change(DEFAULT_SCREEN_TIMEOUT).is_ok());
        assert!(sim.get_current_screen_content().unwrap().is_empty());
    }

    #[test]
    fn test_screen_with_comparator() {
        let mut sim = simulator().with_comparator(FixedScreen {
            lines: vec!["Review transaction".to_string()],
            changes: false,
        });

        assert!(sim.compare_screen_with_text("Review").unwrap());
        assert!(!sim.compare_screen_with_text("Approve").unwrap());
        assert!(!sim
            .compare_screen_with_snapshot(
                Path::new("golden/00000.png"),
                Some(Crop::default()),
                None,
                false,
            )
            .unwrap());
        assert!(matches!(
            sim.wait_for_screen_change(Duration::from_millis(5)),
            Err(BackendError::ScreenTimeout(_))
        ));
        assert_eq!(sim.get_current_screen_content().unwrap().len(), 1);
    }

    #[test]
    fn test_apdu_log_closed_with_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apdu.log");
        let core = BackendCore::new(Firmware::NanoX).with_apdu_log(&path);
        let mut sim = SimulatorBackend::with_core(core, echo as fn(&[u8]) -> Vec<u8>);

        {
            let mut conn = sim.connect().unwrap();
            conn.exchange(0xE0, 0x01, 0, 0, &[0x01, 0x02]).unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "=> e0010000020102\n<= 01029000\n");
    }
}
