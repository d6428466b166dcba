//! Opt-in diagnostic logging.
//!
//! The wrapper owns a raw-mode terminal, so logging to stderr would corrupt
//! the byte stream it is mediating. Nothing is logged unless `HUPMON_LOG`
//! names a file to write to.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize tracing when `HUPMON_LOG` is set; otherwise do nothing.
///
/// `RUST_LOG` selects the verbosity, defaulting to `debug` for this crate.
pub fn init() {
    let Ok(log_path) = std::env::var("HUPMON_LOG") else {
        return;
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hupmon=debug"));

    let file = match std::fs::File::create(&log_path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("hupmon: unable to open log file {log_path}: {err}");
            return;
        }
    };

    let file_layer = fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry().with(filter).with(file_layer).init();
}
