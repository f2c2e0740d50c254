//! Metric names recorded through the `metrics` facade. Install any recorder
//! (for example a Prometheus exporter) in the host binary; without one the
//! macros are no-ops.

pub struct Metric {
    pub name: &'static str,
    description: &'static str,
}

pub const COUNTERS: [Metric; 4] = [
    LEASE_ACQUISITIONS_TOTAL,
    LEASE_STEALS_TOTAL,
    LEASE_LOSSES_TOTAL,
    LEASE_STORE_ERRORS_TOTAL,
];
pub const GAUGES: [Metric; 1] = [LEASES_OWNED];
pub const HISTOGRAMS: [Metric; 1] = [SCAN_CYCLE_DURATION_SECONDS];

pub const LEASES_OWNED: Metric = Metric {
    name: "leasehold_leases_owned",
    description: "Number of partition leases currently held by this host",
};

pub const LEASE_ACQUISITIONS_TOTAL: Metric = Metric {
    name: "leasehold_lease_acquisitions_total",
    description: "Total number of unowned or expired leases acquired by this host",
};

pub const LEASE_STEALS_TOTAL: Metric = Metric {
    name: "leasehold_lease_steals_total",
    description: "Total number of leases taken from another live host for rebalancing",
};

pub const LEASE_LOSSES_TOTAL: Metric = Metric {
    name: "leasehold_lease_losses_total",
    description: "Total number of leases this host stopped owning, by any loss reason",
};

pub const LEASE_STORE_ERRORS_TOTAL: Metric = Metric {
    name: "leasehold_lease_store_errors_total",
    description: "Total number of lease store calls that failed or timed out",
};

pub const SCAN_CYCLE_DURATION_SECONDS: Metric = Metric {
    name: "leasehold_scan_cycle_duration_seconds",
    description: "Duration of one renew / acquire / steal cycle in seconds",
};

/// Registers descriptions for every leasehold metric with the installed recorder.
pub fn describe_metrics() {
    for metric in COUNTERS {
        metrics::describe_counter!(metric.name, metric.description);
    }
    for metric in GAUGES {
        metrics::describe_gauge!(metric.name, metric.description);
    }
    for metric in HISTOGRAMS {
        metrics::describe_histogram!(metric.name, metric.description);
    }
}
