//! Per-run logging context.
//!
//! A [`RunContext`] owns the `sync_run` span of one synchronization run.
//! Components receive it at construction and enter it from every worker
//! thread, so log lines emitted in parallel still carry the run id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::Span;

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Logging scope for one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: String,
    span: Span,
}

impl RunContext {
    /// A context with a fresh run id for `project`.
    #[must_use]
    pub fn new(project: &str) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis());
        let seq = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);
        let run_id = format!("{millis:x}-{seq}");
        let span = tracing::info_span!("sync_run", run_id = %run_id, project = %project);
        Self { run_id, span }
    }

    /// A context without a project, for tests and offline commands.
    #[must_use]
    pub fn detached() -> Self {
        Self::new("-")
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[must_use]
    pub const fn span(&self) -> &Span {
        &self.span
    }

    /// Run `f` inside the run span.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        self.span.in_scope(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_distinct() {
        let a = RunContext::detached();
        let b = RunContext::detached();
        assert_ne!(a.run_id(), b.run_id());
    }

    #[test]
    fn in_scope_returns_value() {
        let ctx = RunContext::new("PROJ");
        assert_eq!(ctx.in_scope(|| 41 + 1), 42);
    }
}
