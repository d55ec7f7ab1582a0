//! Diagnostics reporting seam.
//!
//! The controller never pushes log records itself; it hands formatted
//! status strings to a [`DiagnosticsReporter`]. In normal operation only
//! processed error strings are reported, at warning severity; a failed
//! revert to safe is the one condition reported as critical.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Severity of a reported diagnostic message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("info"),
            Severity::Warning => f.write_str("warning"),
            Severity::Critical => f.write_str("critical"),
        }
    }
}

/// Receives formatted status/error strings from the controller.
pub trait DiagnosticsReporter: Send + Sync {
    fn report(&self, severity: Severity, message: &str);
}

/// Forwards diagnostics to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogReporter;

impl DiagnosticsReporter for LogReporter {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => log::info!("{message}"),
            Severity::Warning => log::warn!("{message}"),
            Severity::Critical => log::error!("{message}"),
        }
    }
}

/// Captures diagnostics in memory so tests can assert on them.
#[derive(Clone, Debug, Default)]
pub struct MemoryReporter {
    entries: Arc<Mutex<Vec<(Severity, String)>>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far.
    pub fn entries(&self) -> Vec<(Severity, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl DiagnosticsReporter for MemoryReporter {
    fn report(&self, severity: Severity, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((severity, message.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_reporter_records_in_order() {
        let reporter = MemoryReporter::new();
        reporter.report(Severity::Warning, "first");
        reporter.report(Severity::Critical, "second");

        let entries = reporter.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (Severity::Warning, "first".to_string()));
        assert_eq!(entries[1].0, Severity::Critical);
    }
}
