//! Console logging for the pipeline binaries.
//!
//! Warnings and failures get a distinct prefix so the stage where a run
//! stopped is easy to spot in scrolling build output.

use log::Level;
use std::io::Write;

fn prefix(level: Level) -> &'static str {
    match level {
        Level::Error => "error: ",
        Level::Warn => "warning: ",
        Level::Info => "",
        Level::Debug | Level::Trace => "debug: ",
    }
}

/// Initialize env_logger. `RUST_LOG` still overrides the default filter.
pub fn init(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format(|buf, record| writeln!(buf, "{}{}", prefix(record.level()), record.args()))
        .init();
}
