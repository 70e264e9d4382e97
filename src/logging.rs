//! Logger initialisation
//!
//! Installs `env_logger` with `[timestamp][level] target - message` records.
//! `RUST_LOG` overrides the filter passed in.

use std::io::Write;

use env_logger::{Builder, Env};

/// Default filter: APDU records plus backend lifecycle
pub const DEFAULT_FILTER: &str = "info,apdu_logger=debug";

/// Install the global logger; `false` if one was already installed
pub fn init_logging(filter: &str) -> bool {
    Builder::from_env(Env::default().default_filter_or(filter))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}][{}] {} - {}",
                buf.timestamp_millis(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init()
        .is_ok()
}
