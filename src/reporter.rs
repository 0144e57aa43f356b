//! Progress and diagnostics sink.
//!
//! Resolution and installation report through this trait instead of writing
//! to stdout directly, so unattended runs keep machine-readable output and
//! tests can capture what would have been printed.

use log::{error, info, warn};

#[cfg_attr(test, mockall::automock)]
pub trait Reporter: Send + Sync {
    fn info(&self, message: &str);
    fn warning(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards every message to the `log` facade.
pub struct LogReporter;

impl Reporter for LogReporter {
    fn info(&self, message: &str) {
        info!("{}", message);
    }

    fn warning(&self, message: &str) {
        warn!("{}", message);
    }

    fn error(&self, message: &str) {
        error!("{}", message);
    }
}
