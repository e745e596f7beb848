//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Task lifecycle (admissions, completions, failures, retries)
//! - Pipeline stages (imaging, processing, upload durations)
//! - Autofocus (runs by outcome)

use crate::task::Stage;
use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts};

// =============================================================================
// Task Lifecycle Metrics
// =============================================================================

/// Tasks admitted into the imaging stage.
pub static TASKS_ADMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "scopehub_tasks_admitted_total",
        "Total tasks admitted into imaging",
    )
    .unwrap()
});

/// Tasks completed (artifact uploaded and confirmed).
pub static TASKS_COMPLETED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "scopehub_tasks_completed_total",
        "Total tasks completed successfully",
    )
    .unwrap()
});

/// Tasks failed, by stage of failure.
pub static TASKS_FAILED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("scopehub_tasks_failed_total", "Total tasks that failed").unwrap()
});

/// Tasks currently tracked, by stage.
pub static TASKS_BY_STAGE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("scopehub_tasks_by_stage", "Tasks currently in each stage"),
        &["stage"], // "pending", "imaging", "processing", "uploading"
    )
    .unwrap()
});

/// Retry attempts total by stage.
pub static RETRY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("scopehub_retry_attempts_total", "Total stage retry attempts"),
        &["stage"], // "upload"
    )
    .unwrap()
});

// =============================================================================
// Stage Duration Metrics
// =============================================================================

/// Stage execution duration in seconds, by stage and result.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "scopehub_stage_duration_seconds",
            "Duration of a single stage execution",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
        &["stage", "result"], // result: "success", "failed"
    )
    .unwrap()
});

// =============================================================================
// Autofocus Metrics
// =============================================================================

/// Autofocus runs total by outcome.
pub static AUTOFOCUS_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("scopehub_autofocus_runs_total", "Total autofocus runs"),
        &["outcome"], // "completed", "failed", "timed_out", "cancelled"
    )
    .unwrap()
});

// =============================================================================
// Backend Metrics
// =============================================================================

/// Backend request duration.
pub static BACKEND_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "scopehub_backend_request_duration_seconds",
            "Duration of backend API calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["operation"], // "fetch_tasks", "upload", "mark_complete", "mark_failed"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Record a terminal task outcome.
pub fn record_task_outcome(outcome: Stage) {
    match outcome {
        Stage::Completed => TASKS_COMPLETED.inc(),
        Stage::Failed => TASKS_FAILED.inc(),
        _ => {}
    }
}

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(TASKS_ADMITTED.clone()),
        Box::new(TASKS_COMPLETED.clone()),
        Box::new(TASKS_FAILED.clone()),
        Box::new(TASKS_BY_STAGE.clone()),
        Box::new(RETRY_ATTEMPTS.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(AUTOFOCUS_RUNS.clone()),
        Box::new(BACKEND_REQUEST_DURATION.clone()),
    ]
}
