// core/logger.rs

// Logger sink handed to the capability interface at begin(). The controller and
// backends report operator-facing messages through it; the default
// implementation forwards to the `log` facade.

use std::sync::atomic::{AtomicBool, Ordering};

/// Operator-facing message sink
pub trait CiLogger: Send + Sync {
    /// Records one message
    fn log_message(&self, text: &str);

    /// Flushes and stops; later messages are discarded
    fn stop_logging(&self);
}

/// Forwards messages to the `log` facade under the `aquadrone::ci` target
#[derive(Debug, Default)]
pub struct LogFacadeLogger {
    stopped: AtomicBool,
}

impl LogFacadeLogger {
    /// Creates an active logger
    pub fn new() -> Self {
        LogFacadeLogger::default()
    }
}

impl CiLogger for LogFacadeLogger {
    fn log_message(&self, text: &str) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            log::info!(target: "aquadrone::ci", "{}", line);
        }
    }

    fn stop_logging(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            log::logger().flush();
        }
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl CiLogger for NoopLogger {
    fn log_message(&self, _text: &str) {}

    fn stop_logging(&self) {}
}
