//! Prometheus metrics for the heap service
//!
//! The registry belongs to one service instance; nothing is registered
//! globally.

use super::status::Status;
use crate::heap::HeapStats;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct HeapMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    live_slots: IntGauge,
    live_bytes: IntGauge,
}

impl HeapMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("rck_requests_total", "Heap requests by operation and status"),
            &["op", "status"],
        )?;
        let live_slots = IntGauge::new("rck_live_slots", "Number of live slots")?;
        let live_bytes = IntGauge::new("rck_live_bytes", "Bytes held by live buffers")?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(live_slots.clone()))?;
        registry.register(Box::new(live_bytes.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            live_slots,
            live_bytes,
        })
    }

    pub fn record(&self, op: &str, status: Status) {
        self.requests_total
            .with_label_values(&[op, status.as_str()])
            .inc();
    }

    pub fn observe_heap(&self, stats: &HeapStats) {
        self.live_slots.set(stats.live_slots as i64);
        self.live_bytes.set(stats.live_bytes as i64);
    }

    pub fn requests(&self, op: &str, status: Status) -> u64 {
        self.requests_total
            .with_label_values(&[op, status.as_str()])
            .get()
    }

    /// Render all metrics in Prometheus text exposition format
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl std::fmt::Debug for HeapMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapMetrics").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_export() {
        let metrics = HeapMetrics::new().unwrap();
        metrics.record("allocate_variable", Status::Ok);
        metrics.record("allocate_variable", Status::Ok);
        metrics.record("free_variable", Status::InvalidId);
        metrics.observe_heap(&HeapStats {
            live_slots: 2,
            live_bytes: 48,
            capacity: 2,
            free_ids: 0,
        });

        assert_eq!(metrics.requests("allocate_variable", Status::Ok), 2);
        assert_eq!(metrics.requests("free_variable", Status::InvalidId), 1);

        let text = metrics.export();
        assert!(text.contains("rck_requests_total"));
        assert!(text.contains("rck_live_bytes 48"));
    }
}
