//! Run-wide error accumulation and exit code policy.
//!
//! Appends happen from worker threads, so every bucket sits behind its own
//! mutex. Reporting happens once at the end of the run.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{error, info};

use crate::error::ErrorCode;

/// Default number of itemized errors per bucket in a report.
pub const DEFAULT_REPORT_LIMIT: usize = 5;

/// Exit code when a critical error stopped the run.
pub const EXIT_CRITICAL: i32 = 2;
/// Exit code when some elements or links failed.
pub const EXIT_PARTIAL: i32 = 1;
/// Exit code of a clean run.
pub const EXIT_OK: i32 = 0;

/// One recorded failure, attributed to a model element when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectedError {
    pub local_id: Option<String>,
    pub message: String,
    /// Stable code of the failure class, where the bucket implies one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

const LINK_ERROR_CODE: &str = ErrorCode::LinkResolutionFailed.code();

/// Errors collected over one run, in three buckets.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    work_items: Mutex<Vec<CollectedError>>,
    links: Mutex<Vec<CollectedError>>,
    critical: Mutex<Vec<CollectedError>>,
}

/// Serializable snapshot of a collector, used for `--json` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorSummary {
    pub exit_code: i32,
    pub work_item_errors: Vec<CollectedError>,
    pub link_errors: Vec<CollectedError>,
    pub critical_errors: Vec<CollectedError>,
}

fn lock(bucket: &Mutex<Vec<CollectedError>>) -> MutexGuard<'_, Vec<CollectedError>> {
    // A panicking appender cannot leave a Vec half-pushed.
    bucket.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ErrorCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_work_item_error(&self, local_id: impl Into<String>, message: impl ToString) {
        lock(&self.work_items).push(CollectedError {
            local_id: Some(local_id.into()),
            message: message.to_string(),
            error_code: None,
        });
    }

    pub fn add_link_error(&self, local_id: impl Into<String>, message: impl ToString) {
        lock(&self.links).push(CollectedError {
            local_id: Some(local_id.into()),
            message: message.to_string(),
            error_code: Some(LINK_ERROR_CODE),
        });
    }

    /// Append several link errors under one lock acquisition.
    pub fn add_link_errors(&self, errors: impl IntoIterator<Item = (String, String)>) {
        lock(&self.links).extend(errors.into_iter().map(|(local_id, message)| CollectedError {
            local_id: Some(local_id),
            message,
            error_code: Some(LINK_ERROR_CODE),
        }));
    }

    pub fn add_critical_error(&self, message: impl ToString) {
        lock(&self.critical).push(CollectedError {
            local_id: None,
            message: message.to_string(),
            error_code: None,
        });
    }

    /// Move every error of `other` into this collector.
    pub fn absorb(&self, other: Self) {
        let Self {
            work_items,
            links,
            critical,
        } = other;
        let take = |bucket: Mutex<Vec<CollectedError>>| bucket.into_inner().unwrap_or_else(PoisonError::into_inner);
        lock(&self.work_items).extend(take(work_items));
        lock(&self.links).extend(take(links));
        lock(&self.critical).extend(take(critical));
    }

    #[must_use]
    pub fn work_item_error_count(&self) -> usize {
        lock(&self.work_items).len()
    }

    #[must_use]
    pub fn link_error_count(&self) -> usize {
        lock(&self.links).len()
    }

    #[must_use]
    pub fn critical_error_count(&self) -> usize {
        lock(&self.critical).len()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.work_item_error_count() + self.link_error_count() + self.critical_error_count() > 0
    }

    /// `2` if any critical error, else `1` if any element or link error, else `0`.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.critical_error_count() > 0 {
            EXIT_CRITICAL
        } else if self.work_item_error_count() + self.link_error_count() > 0 {
            EXIT_PARTIAL
        } else {
            EXIT_OK
        }
    }

    #[must_use]
    pub fn summary(&self) -> ErrorSummary {
        ErrorSummary {
            exit_code: self.exit_code(),
            work_item_errors: lock(&self.work_items).clone(),
            link_errors: lock(&self.links).clone(),
            critical_errors: lock(&self.critical).clone(),
        }
    }

    /// Human-readable report, at most `limit` itemized entries for the work
    /// item and link buckets. Critical errors are always listed in full.
    #[must_use]
    pub fn report_lines(&self, limit: usize) -> Vec<String> {
        let summary = self.summary();
        let total = summary.work_item_errors.len()
            + summary.link_errors.len()
            + summary.critical_errors.len();
        if total == 0 {
            return vec!["Synchronization completed successfully".to_string()];
        }

        let mut lines = vec![format!("Synchronization completed with {total} errors:")];
        push_bucket(&mut lines, "Work item processing errors", "work item", &summary.work_item_errors, limit);
        push_bucket(&mut lines, "Link processing errors", "link", &summary.link_errors, limit);
        if !summary.critical_errors.is_empty() {
            lines.push(format!("Critical errors: {}", summary.critical_errors.len()));
            lines.extend(summary.critical_errors.iter().map(|e| format!("  - {}", e.message)));
        }
        lines
    }

    /// Emit [`Self::report_lines`] through `tracing` and return the exit code.
    pub fn log_report(&self, limit: usize) -> i32 {
        let code = self.exit_code();
        for line in self.report_lines(limit) {
            if code == EXIT_OK {
                info!("{line}");
            } else {
                error!("{line}");
            }
        }
        code
    }
}

fn push_bucket(lines: &mut Vec<String>, heading: &str, noun: &str, errors: &[CollectedError], limit: usize) {
    if errors.is_empty() {
        return;
    }
    lines.push(format!("{heading}: {}", errors.len()));
    for err in errors.iter().take(limit) {
        let code = err.error_code.map(|code| format!("[{code}] ")).unwrap_or_default();
        lines.push(format!(
            "  - {code}{}: {}",
            err.local_id.as_deref().unwrap_or("-"),
            err.message
        ));
    }
    if errors.len() > limit {
        lines.push(format!("  ... and {} more {noun} errors", errors.len() - limit));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn empty_collector_exits_zero() {
        let collector = ErrorCollector::new();
        assert!(!collector.has_errors());
        assert_eq!(collector.exit_code(), EXIT_OK);
        assert_eq!(collector.report_lines(5), vec!["Synchronization completed successfully"]);
    }

    #[test]
    fn partial_failures_exit_one() {
        let collector = ErrorCollector::new();
        collector.add_link_error("uuid-1", "unknown target");
        assert_eq!(collector.exit_code(), EXIT_PARTIAL);
    }

    #[test]
    fn link_errors_carry_the_link_resolution_code() {
        let collector = ErrorCollector::new();
        collector.add_link_error("uuid-1", "unknown target");
        collector.add_link_errors([("uuid-2".to_string(), "ghost".to_string())]);
        collector.add_work_item_error("uuid-3", "boom");

        let summary = collector.summary();
        assert!(summary.link_errors.iter().all(|e| e.error_code == Some("E3002")));
        assert_eq!(summary.work_item_errors[0].error_code, None);
        let lines = collector.report_lines(5);
        assert!(lines.contains(&"  - [E3002] uuid-1: unknown target".to_string()), "{lines:?}");
        assert!(lines.contains(&"  - uuid-3: boom".to_string()));
    }

    #[test]
    fn critical_errors_win() {
        let collector = ErrorCollector::new();
        collector.add_work_item_error("uuid-1", "boom");
        collector.add_critical_error("failure rate exceeded");
        assert_eq!(collector.exit_code(), EXIT_CRITICAL);
    }

    #[test]
    fn absorbed_errors_keep_their_bucket() {
        let collector = ErrorCollector::new();
        collector.add_work_item_error("a", "first");
        let attempt = ErrorCollector::new();
        attempt.add_work_item_error("b", "second");
        attempt.add_link_error("b", "dangling");
        collector.absorb(attempt);
        assert_eq!(collector.work_item_error_count(), 2);
        assert_eq!(collector.link_error_count(), 1);
        assert_eq!(collector.critical_error_count(), 0);
    }

    #[test]
    fn report_is_capped_per_bucket() {
        let collector = ErrorCollector::new();
        for i in 0..8 {
            collector.add_work_item_error(format!("uuid-{i}"), "bad");
        }
        let lines = collector.report_lines(5);

        assert_eq!(lines[0], "Synchronization completed with 8 errors:");
        assert_eq!(lines[1], "Work item processing errors: 8");
        assert_eq!(lines.iter().filter(|l| l.starts_with("  - ")).count(), 5);
        assert_eq!(lines.last().map(String::as_str), Some("  ... and 3 more work item errors"));
    }

    #[test]
    fn concurrent_appends_are_not_lost() {
        let collector = Arc::new(ErrorCollector::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let collector = Arc::clone(&collector);
                thread::spawn(move || {
                    for i in 0..50 {
                        collector.add_work_item_error(format!("{t}-{i}"), "x");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker thread panicked");
        }
        assert_eq!(collector.work_item_error_count(), 200);
    }
}
