//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Counters cover cycle outcomes, relayed bytes, and rotation deletions.

use std::sync::Arc;

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{TelemetryError, TelemetryResult};

/// Operation kinds reported through the `kind` label.
pub const CYCLE_KINDS: &[&str] = &[
    "regular",
    "archive",
    "restore",
    "download_to_origin",
    "upload_path",
    "upload_local",
];

/// Prometheus-backed metrics registry shared by the orchestrator and scheduler.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    cycles_total: IntCounterVec,
    bytes_transferred_total: IntCounterVec,
    rotation_deletions_total: IntCounterVec,
    cycle_in_flight: IntGauge,
    last_success_unix: IntGauge,
}

/// Snapshot of selected gauges and counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Whether a backup operation currently holds the single-flight slot.
    pub cycle_in_flight: bool,
    /// Unix timestamp of the last successful cycle; zero before the first success.
    pub last_success_unix: i64,
    /// Successful cycles across every kind.
    pub cycles_succeeded: u64,
    /// Failed cycles across every kind.
    pub cycles_failed: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be built or registered.
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new();

        let cycles_total = IntCounterVec::new(
            Opts::new("backhaul_cycles_total", "Backup operations finished by kind and outcome"),
            &["kind", "outcome"],
        )
        .map_err(|source| collector_error("backhaul_cycles_total", source))?;
        let bytes_transferred_total = IntCounterVec::new(
            Opts::new(
                "backhaul_bytes_transferred_total",
                "Bytes relayed between origin, staging, and storage",
            ),
            &["direction"],
        )
        .map_err(|source| collector_error("backhaul_bytes_transferred_total", source))?;
        let rotation_deletions_total = IntCounterVec::new(
            Opts::new(
                "backhaul_rotation_deletions_total",
                "Retention deletions attempted by location and status",
            ),
            &["location", "status"],
        )
        .map_err(|source| collector_error("backhaul_rotation_deletions_total", source))?;
        let cycle_in_flight = IntGauge::with_opts(Opts::new(
            "backhaul_cycle_in_flight",
            "One while a backup operation holds the single-flight slot",
        ))
        .map_err(|source| collector_error("backhaul_cycle_in_flight", source))?;
        let last_success_unix = IntGauge::with_opts(Opts::new(
            "backhaul_last_success_timestamp_seconds",
            "Unix time of the last successful backup operation",
        ))
        .map_err(|source| collector_error("backhaul_last_success_timestamp_seconds", source))?;

        register(&registry, "backhaul_cycles_total", &cycles_total)?;
        register(
            &registry,
            "backhaul_bytes_transferred_total",
            &bytes_transferred_total,
        )?;
        register(
            &registry,
            "backhaul_rotation_deletions_total",
            &rotation_deletions_total,
        )?;
        register(&registry, "backhaul_cycle_in_flight", &cycle_in_flight)?;
        register(
            &registry,
            "backhaul_last_success_timestamp_seconds",
            &last_success_unix,
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                cycles_total,
                bytes_transferred_total,
                rotation_deletions_total,
                cycle_in_flight,
                last_success_unix,
            }),
        })
    }

    /// Count a finished backup operation.
    pub fn inc_cycle(&self, kind: &str, outcome: &str) {
        self.inner
            .cycles_total
            .with_label_values(&[kind, outcome])
            .inc();
    }

    /// Add relayed bytes for a transfer direction (`download`, `upload_primary`, ...).
    pub fn add_bytes(&self, direction: &str, bytes: u64) {
        self.inner
            .bytes_transferred_total
            .with_label_values(&[direction])
            .inc_by(bytes);
    }

    /// Count a retention deletion attempt.
    pub fn inc_rotation_deletion(&self, location: &str, status: &str) {
        self.inner
            .rotation_deletions_total
            .with_label_values(&[location, status])
            .inc();
    }

    /// Flag whether an operation holds the single-flight slot.
    pub fn set_in_flight(&self, in_flight: bool) {
        self.inner.cycle_in_flight.set(i64::from(in_flight));
    }

    /// Record the completion time of a successful operation.
    pub fn mark_success(&self, unix_seconds: i64) {
        self.inner.last_success_unix.set(unix_seconds);
    }

    /// Render the registry in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or produces invalid UTF-8.
    pub fn render(&self) -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycle_in_flight: self.inner.cycle_in_flight.get() > 0,
            last_success_unix: self.inner.last_success_unix.get(),
            cycles_succeeded: self.outcome_total("succeeded"),
            cycles_failed: self.outcome_total("failed"),
        }
    }

    fn outcome_total(&self, outcome: &str) -> u64 {
        CYCLE_KINDS
            .iter()
            .map(|kind| {
                self.inner
                    .cycles_total
                    .with_label_values(&[*kind, outcome])
                    .get()
            })
            .sum()
    }
}

fn collector_error(name: &'static str, source: prometheus::Error) -> TelemetryError {
    TelemetryError::MetricsCollector { name, source }
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> TelemetryResult<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}
