//! Scoped backend guards
//!
//! [`Connection`] keeps a backend open; [`PendingExchange`] holds an
//! asynchronous exchange between its send and its receive.

use std::ops::{Deref, DerefMut};

use apdu_core::Response;

use crate::traits::Backend;
use crate::BackendResult;

/// Open backend, closed when dropped
pub struct Connection<'a, B: Backend> {
    backend: &'a mut B,
}

impl<'a, B: Backend> Connection<'a, B> {
    pub(crate) fn new(backend: &'a mut B) -> Self {
        Connection { backend }
    }
}

impl<B: Backend> Deref for Connection<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        &*self.backend
    }
}

impl<B: Backend> DerefMut for Connection<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        &mut *self.backend
    }
}

impl<B: Backend> Drop for Connection<'_, B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.close() {
            log::warn!("Failed to close backend: {}", e);
        }
        if let Err(e) = self.backend.core_mut().logger_mut().shutdown() {
            log::warn!("Failed to flush APDU log: {}", e);
        }
    }
}

/// Asynchronous exchange waiting for its response
///
/// The command has been sent; the backend stays reachable through `Deref` for
/// UI interaction while the device waits. [`PendingExchange::complete`] reads
/// the response, applies the raise policy and records it as the backend's
/// last async response.
///
/// Dropping the guard without completing it leaves the response unread. The
/// backend then refuses new exchanges with `UndrainedResponse` until
/// [`Backend::discard_pending`] or [`Backend::reset`] is called.
pub struct PendingExchange<'a, B: Backend> {
    backend: &'a mut B,
    completed: bool,
}

impl<'a, B: Backend> PendingExchange<'a, B> {
    pub(crate) fn new(backend: &'a mut B) -> Self {
        PendingExchange {
            backend,
            completed: false,
        }
    }

    /// Receive the response and store it as the last async response
    pub fn complete(mut self) -> BackendResult<Response> {
        self.completed = true;
        self.backend.core_mut().in_flight = false;

        let response = self.backend.receive()?;
        self.backend.core_mut().last_async_response = Some(response.clone());
        Ok(response)
    }
}

impl<B: Backend> Deref for PendingExchange<'_, B> {
    type Target = B;

    fn deref(&self) -> &B {
        &*self.backend
    }
}

impl<B: Backend> DerefMut for PendingExchange<'_, B> {
    fn deref_mut(&mut self) -> &mut B {
        &mut *self.backend
    }
}

impl<B: Backend> Drop for PendingExchange<'_, B> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        log::warn!("Asynchronous exchange abandoned before its response was read");
        let core = self.backend.core_mut();
        core.in_flight = false;
        core.undrained = true;
    }
}
