//! Tracing subscriber setup.
//!
//! `log` records emitted by the scheduler loops and by dependencies are
//! bridged into `tracing`, so one subscriber sees everything.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "evidence_ingest=info,warn";

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`. Returns `false` when a
/// subscriber was already installed (by an earlier call or by the host
/// application).
pub fn init_tracing(default_filter: &str, json: bool) -> bool {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return false;
    }

    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("log bridge already installed: {}", e);
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let result = if json {
        Registry::default()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
    };

    result.is_ok()
}
