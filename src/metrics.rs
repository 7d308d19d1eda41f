//! Lightweight global metrics for snapsend.
//!
//! Потокобезопасные атомарные счётчики:
//! - export (items / bytes / failures)
//! - выбор parent (explicit / ancestor / sibling / full)
//! - cancel-запросы генератору

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Export -----
static EXPORT_ITEMS_TOTAL: AtomicU64 = AtomicU64::new(0);
static EXPORT_BYTES_TOTAL: AtomicU64 = AtomicU64::new(0);
static EXPORT_FAILURES_TOTAL: AtomicU64 = AtomicU64::new(0);

// ----- Parent selection -----
static PARENT_EXPLICIT: AtomicU64 = AtomicU64::new(0);
static PARENT_ANCESTOR: AtomicU64 = AtomicU64::new(0);
static PARENT_SIBLING: AtomicU64 = AtomicU64::new(0);
static PARENT_FULL: AtomicU64 = AtomicU64::new(0);

// ----- Cancel -----
static GENERATOR_CANCELS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub export_items_total: u64,
    pub export_bytes_total: u64,
    pub export_failures_total: u64,

    pub parent_explicit: u64,
    pub parent_ancestor: u64,
    pub parent_sibling: u64,
    pub parent_full: u64,

    pub generator_cancels: u64,
}

impl MetricsSnapshot {
    /// Share of items that went out incrementally (any parent).
    pub fn incremental_ratio(&self) -> f64 {
        let inc = self.parent_explicit + self.parent_ancestor + self.parent_sibling;
        let total = inc + self.parent_full;
        if total == 0 {
            0.0
        } else {
            inc as f64 / total as f64
        }
    }
}

// ----- Recorders -----
pub fn record_item_exported(bytes: u64) {
    EXPORT_ITEMS_TOTAL.fetch_add(1, Ordering::Relaxed);
    EXPORT_BYTES_TOTAL.fetch_add(bytes, Ordering::Relaxed);
}

pub fn record_export_failure() {
    EXPORT_FAILURES_TOTAL.fetch_add(1, Ordering::Relaxed);
}

pub fn record_parent_explicit() {
    PARENT_EXPLICIT.fetch_add(1, Ordering::Relaxed);
}

pub fn record_parent_ancestor() {
    PARENT_ANCESTOR.fetch_add(1, Ordering::Relaxed);
}

pub fn record_parent_sibling() {
    PARENT_SIBLING.fetch_add(1, Ordering::Relaxed);
}

pub fn record_parent_full() {
    PARENT_FULL.fetch_add(1, Ordering::Relaxed);
}

pub fn record_generator_cancel() {
    GENERATOR_CANCELS.fetch_add(1, Ordering::Relaxed);
}

pub fn metrics_snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        export_items_total: EXPORT_ITEMS_TOTAL.load(Ordering::Relaxed),
        export_bytes_total: EXPORT_BYTES_TOTAL.load(Ordering::Relaxed),
        export_failures_total: EXPORT_FAILURES_TOTAL.load(Ordering::Relaxed),
        parent_explicit: PARENT_EXPLICIT.load(Ordering::Relaxed),
        parent_ancestor: PARENT_ANCESTOR.load(Ordering::Relaxed),
        parent_sibling: PARENT_SIBLING.load(Ordering::Relaxed),
        parent_full: PARENT_FULL.load(Ordering::Relaxed),
        generator_cancels: GENERATOR_CANCELS.load(Ordering::Relaxed),
    }
}

pub fn reset_metrics() {
    EXPORT_ITEMS_TOTAL.store(0, Ordering::Relaxed);
    EXPORT_BYTES_TOTAL.store(0, Ordering::Relaxed);
    EXPORT_FAILURES_TOTAL.store(0, Ordering::Relaxed);
    PARENT_EXPLICIT.store(0, Ordering::Relaxed);
    PARENT_ANCESTOR.store(0, Ordering::Relaxed);
    PARENT_SIBLING.store(0, Ordering::Relaxed);
    PARENT_FULL.store(0, Ordering::Relaxed);
    GENERATOR_CANCELS.store(0, Ordering::Relaxed);
}
