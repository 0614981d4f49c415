use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Engine activity counters
#[derive(Debug, Default)]
pub struct WorkflowMetrics {
    pub requests_created: AtomicU64,
    pub steps_requested: AtomicU64,
    pub steps_skipped: AtomicU64,
    pub approvals: AtomicU64,
    pub rejections: AtomicU64,
    pub conflicts: AtomicU64,
}

impl WorkflowMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request_created(&self) {
        self.requests_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_step_requested(&self) {
        self.steps_requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_step_skipped(&self) {
        self.steps_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_approval(&self) {
        self.approvals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> WorkflowStats {
        WorkflowStats {
            requests_created: self.requests_created.load(Ordering::Relaxed),
            steps_requested: self.steps_requested.load(Ordering::Relaxed),
            steps_skipped: self.steps_skipped.load(Ordering::Relaxed),
            approvals: self.approvals.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            requests_created = stats.requests_created,
            steps_requested = stats.steps_requested,
            steps_skipped = stats.steps_skipped,
            approvals = stats.approvals,
            rejections = stats.rejections,
            conflicts = stats.conflicts,
            "Workflow metrics"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowStats {
    pub requests_created: u64,
    pub steps_requested: u64,
    pub steps_skipped: u64,
    pub approvals: u64,
    pub rejections: u64,
    pub conflicts: u64,
}

/// Global metrics instance
static WORKFLOW_METRICS: std::sync::LazyLock<WorkflowMetrics> =
    std::sync::LazyLock::new(WorkflowMetrics::new);

pub fn workflow_metrics() -> &'static WorkflowMetrics {
    &WORKFLOW_METRICS
}

/// Create correlated spans for workflow operations
pub fn create_workflow_span(operation: &str, correlation_id: &str) -> tracing::Span {
    tracing::info_span!(
        "workflow",
        workflow.operation = operation,
        correlation.id = correlation_id,
    )
}

/// Time an operation and log its duration
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_accumulate() {
        let metrics = WorkflowMetrics::new();
        metrics.record_request_created();
        metrics.record_step_skipped();
        metrics.record_step_skipped();
        metrics.record_conflict();

        let stats = metrics.get_stats();
        assert_eq!(stats.requests_created, 1);
        assert_eq!(stats.steps_skipped, 2);
        assert_eq!(stats.conflicts, 1);
        assert_eq!(stats.approvals, 0);
    }
}
