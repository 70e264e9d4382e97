//! APDU diagnostics sink
//!
//! Every command sent and every response received produces one record on the
//! `apdu_logger` log target. An optional file receives the bare message text,
//! one line per record. The file is created on the first record and closed by
//! [`ApduLogger::shutdown`], which only ever closes it once.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::apdu::Response;
use crate::ApduResult;

/// Log target of APDU records
pub const APDU_LOG_TARGET: &str = "apdu_logger";

/// Direction of an APDU record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device
    Send,
    /// Device to host
    Receive,
}

impl Direction {
    /// Record prefix
    pub fn arrow(&self) -> &'static str {
        match self {
            Direction::Send => "=>",
            Direction::Receive => "<=",
        }
    }
}

enum FileSink {
    None,
    Pending(PathBuf),
    Open(BufWriter<File>),
    Closed,
}

/// Append-only APDU record sink
pub struct ApduLogger {
    sink: FileSink,
}

impl ApduLogger {
    /// Console-only logger
    pub fn new() -> Self {
        ApduLogger {
            sink: FileSink::None,
        }
    }

    /// Logger that also persists records to `path` (truncated on first write)
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        ApduLogger {
            sink: FileSink::Pending(path.into()),
        }
    }

    /// Path of the persisted log, if one is configured and not yet closed
    pub fn file_path(&self) -> Option<&Path> {
        match &self.sink {
            FileSink::Pending(path) => Some(path),
            _ => None,
        }
    }

    /// Record an outgoing command frame
    pub fn log_send(&mut self, frame: &[u8]) {
        let line = format!("{} {}", Direction::Send.arrow(), hex::encode(frame));
        self.record(&line);
    }

    /// Record an incoming response
    pub fn log_receive(&mut self, response: &Response) {
        let line = format!(
            "{} {}{:04x}",
            Direction::Receive.arrow(),
            hex::encode(&response.data),
            response.status
        );
        self.record(&line);
    }

    fn record(&mut self, line: &str) {
        log::debug!(target: APDU_LOG_TARGET, "{}", line);

        if let Err(e) = self.persist(line) {
            log::warn!("Dropping persisted APDU log after write failure: {}", e);
            self.sink = FileSink::Closed;
        }
    }

    fn persist(&mut self, line: &str) -> ApduResult<()> {
        if let FileSink::Pending(path) = &self.sink {
            let file = File::create(path)?;
            self.sink = FileSink::Open(BufWriter::new(file));
        }

        if let FileSink::Open(writer) = &mut self.sink {
            writeln!(writer, "{}", line)?;
        }
        Ok(())
    }

    /// Flush and close the persisted log
    ///
    /// Later calls, and later records, never touch the file again.
    pub fn shutdown(&mut self) -> ApduResult<()> {
        match std::mem::replace(&mut self.sink, FileSink::Closed) {
            FileSink::Open(mut writer) => {
                writer.flush()?;
                Ok(())
            }
            FileSink::None => {
                self.sink = FileSink::None;
                Ok(())
            }
            FileSink::Pending(_) | FileSink::Closed => Ok(()),
        }
    }
}

impl Default for ApduLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ApduLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sink = match &self.sink {
            FileSink::None => "none",
            FileSink::Pending(_) => "pending",
            FileSink::Open(_) => "open",
            FileSink::Closed => "closed",
        };
        f.debug_struct("ApduLogger").field("sink", &sink).finish()
    }
}

impl Drop for ApduLogger {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Failed to flush APDU log: {}", e);
        }
    }
}
