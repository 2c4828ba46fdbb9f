//! Metrics for the HM-11 driver.
//!
//! Every metric the driver records is declared here as a [`Metric`] constant so
//! names are not repeated as string literals at the call sites. Recording goes
//! through the `metrics` facade, which is a no-op until the host installs a
//! recorder.
//!
//! # Example
//!
//! ```rust,ignore
//! use hm11_metrics::{describe_metrics, metric_defs, metrics};
//!
//! describe_metrics();
//! metrics::counter!(metric_defs::COMMAND_SENT.name, "key" => "BAUD").increment(1);
//! ```

pub use metrics;

use metrics::{describe_counter, describe_histogram, Unit};

/// The kind of metric (counter or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A histogram for recording distributions.
    Histogram,
}

impl MetricKind {
    /// Returns the kind as a lowercase string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// ```rust
/// use hm11_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const TIMEOUTS: Metric = Metric::counter("hm11.command.timeouts")
///     .with_description("Exchanges abandoned after the timeout")
///     .with_unit(Unit::Count);
///
/// assert_eq!(TIMEOUTS.kind, MetricKind::Counter);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "hm11.command.sent").
    pub name: &'static str,
    /// The kind of metric.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// The unit of measurement (optional).
    pub unit: Option<Unit>,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    /// Creates a new counter metric with the given name.
    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    /// Creates a new histogram metric with the given name.
    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    /// Sets the description for the metric.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit for the metric.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Sets the expected label keys for the metric.
    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// All metric definitions for the driver.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Command Engine
    // ========================================================================

    /// AT commands written to the module.
    ///
    /// Labels: key (wire name, or `AT` for the bare probe)
    pub const COMMAND_SENT: Metric = Metric::counter("hm11.command.sent")
        .with_description("AT commands written to the module")
        .with_unit(Unit::Count)
        .with_labels(&["key"]);

    /// Exchanges abandoned because no complete reply arrived in time.
    pub const COMMAND_TIMEOUTS: Metric = Metric::counter("hm11.command.timeouts")
        .with_description("AT exchanges that timed out")
        .with_unit(Unit::Count)
        .with_labels(&["key"]);

    /// Time from writing a command to a complete reply.
    pub const COMMAND_LATENCY: Metric = Metric::histogram("hm11.command.latency_ms")
        .with_description("Time to a complete reply")
        .with_unit(Unit::Milliseconds);

    // ========================================================================
    // Baud / Lifecycle
    // ========================================================================

    /// Baud discovery runs, labelled by outcome.
    pub const BAUD_DISCOVERIES: Metric = Metric::counter("hm11.baud.discoveries")
        .with_description("Baud discovery runs")
        .with_unit(Unit::Count)
        .with_labels(&["outcome"]);

    /// Hardware reset pulses issued.
    pub const HARDWARE_RESETS: Metric = Metric::counter("hm11.lifecycle.hardware_resets")
        .with_description("Hardware reset pulses issued")
        .with_unit(Unit::Count);

    // ========================================================================
    // iBeacon
    // ========================================================================

    /// Beacon setup directives the module did not acknowledge.
    pub const BEACON_DIRECTIVE_FAILURES: Metric =
        Metric::counter("hm11.beacon.directive_failures")
            .with_description("Beacon setup directives not acknowledged")
            .with_unit(Unit::Count);

    /// Discovery records seen during scans.
    pub const SCAN_RECORDS: Metric = Metric::counter("hm11.scan.records")
        .with_description("Discovery records seen")
        .with_unit(Unit::Count);

    /// Bytes held in the scan buffer when accumulation stopped.
    pub const SCAN_BUFFER_BYTES: Metric = Metric::histogram("hm11.scan.buffer_bytes")
        .with_description("Scan buffer size when accumulation stopped")
        .with_unit(Unit::Bytes);

    /// Every metric above.
    pub const ALL: &[&Metric] = &[
        &COMMAND_SENT,
        &COMMAND_TIMEOUTS,
        &COMMAND_LATENCY,
        &BAUD_DISCOVERIES,
        &HARDWARE_RESETS,
        &BEACON_DIRECTIVE_FAILURES,
        &SCAN_RECORDS,
        &SCAN_BUFFER_BYTES,
    ];
}

/// Register descriptions for every metric in [`metric_defs::ALL`].
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
