//! Metrics & Observability (C11, §6): a `MetricsSink` trait keeps every
//! other component free of a global Prometheus registry, injected the
//! same way other external collaborators are.

use std::collections::HashMap;
use tmc_core::constants::metrics as metric_names;

/// Labels attached to a single metric observation. Kept as an owned map
/// rather than a fixed struct-per-metric so sinks can be generic.
pub type Labels = HashMap<&'static str, String>;

/// Destination for metric observations. Implementations must be cheap to
/// call from hot paths (reconcile loop, syncer).
pub trait MetricsSink: Send + Sync {
    fn set_gauge(&self, name: &str, labels: &Labels, value: f64);
    fn incr_counter(&self, name: &str, labels: &Labels, delta: u64);
    fn observe_histogram(&self, name: &str, labels: &Labels, value: f64);
}

/// A sink that discards every observation; the default when no
/// observability backend is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn set_gauge(&self, _name: &str, _labels: &Labels, _value: f64) {}
    fn incr_counter(&self, _name: &str, _labels: &Labels, _delta: u64) {}
    fn observe_histogram(&self, _name: &str, _labels: &Labels, _value: f64) {}
}

/// Convenience helpers bound to the §6 metric names, so callers never
/// spell out the metric name string at the call site.
pub struct Recorder<'a> {
    sink: &'a dyn MetricsSink,
}

impl<'a> Recorder<'a> {
    pub fn new(sink: &'a dyn MetricsSink) -> Self {
        Recorder { sink }
    }

    pub fn sync_targets(&self, workspace: &str, count: f64) {
        let labels = Labels::from([("workspace", workspace.to_string())]);
        self.sink.set_gauge(metric_names::UPSTREAM_SYNC_TARGETS_TOTAL, &labels, count);
    }

    pub fn resource_synced(&self, workspace: &str, cluster: &str, resource: &str) {
        let labels = Labels::from([
            ("workspace", workspace.to_string()),
            ("cluster", cluster.to_string()),
            ("resource", resource.to_string()),
        ]);
        self.sink.incr_counter(metric_names::UPSTREAM_RESOURCES_SYNCED_TOTAL, &labels, 1);
    }

    pub fn conflict_resolved(&self, workspace: &str, strategy: &str) {
        let labels = Labels::from([("workspace", workspace.to_string()), ("strategy", strategy.to_string())]);
        self.sink.incr_counter(metric_names::UPSTREAM_CONFLICTS_RESOLVED_TOTAL, &labels, 1);
    }

    pub fn sync_latency(&self, workspace: &str, operation: &str, seconds: f64) {
        let labels = Labels::from([("workspace", workspace.to_string()), ("operation", operation.to_string())]);
        self.sink.observe_histogram(metric_names::UPSTREAM_SYNC_LATENCY_SECONDS, &labels, seconds);
    }
}

#[cfg(feature = "prometheus")]
pub mod prometheus_sink {
    use super::*;
    use parking_lot::Mutex;
    use prometheus::{Gauge, GaugeVec, Histogram, HistogramVec, IntCounterVec, Opts, Registry};
    use std::collections::HashMap as StdHashMap;

    /// A [`MetricsSink`] backed by the `prometheus` crate's own
    /// `Registry`, not a process-global one (§9 design note: "expose
    /// capabilities as explicit configuration ... inject a metrics sink
    /// interface").
    pub struct PrometheusSink {
        registry: Registry,
        gauges: Mutex<StdHashMap<String, GaugeVec>>,
        counters: Mutex<StdHashMap<String, IntCounterVec>>,
        histograms: Mutex<StdHashMap<String, HistogramVec>>,
    }

    impl PrometheusSink {
        pub fn new(registry: Registry) -> Self {
            PrometheusSink { registry, gauges: Mutex::new(StdHashMap::new()), counters: Mutex::new(StdHashMap::new()), histograms: Mutex::new(StdHashMap::new()) }
        }

        pub fn registry(&self) -> &Registry {
            &self.registry
        }

        fn gauge_for(&self, name: &str, label_names: &[&str]) -> GaugeVec {
            let mut gauges = self.gauges.lock();
            gauges
                .entry(name.to_string())
                .or_insert_with(|| {
                    let gauge = GaugeVec::new(Opts::new(name, name), label_names).expect("valid gauge opts");
                    let _ = self.registry.register(Box::new(gauge.clone()));
                    gauge
                })
                .clone()
        }

        fn counter_for(&self, name: &str, label_names: &[&str]) -> IntCounterVec {
            let mut counters = self.counters.lock();
            counters
                .entry(name.to_string())
                .or_insert_with(|| {
                    let counter = IntCounterVec::new(Opts::new(name, name), label_names).expect("valid counter opts");
                    let _ = self.registry.register(Box::new(counter.clone()));
                    counter
                })
                .clone()
        }

        fn histogram_for(&self, name: &str, label_names: &[&str]) -> HistogramVec {
            let mut histograms = self.histograms.lock();
            histograms
                .entry(name.to_string())
                .or_insert_with(|| {
                    let opts = prometheus::HistogramOpts::new(name, name).buckets(metric_names::latency_buckets());
                    let histogram = HistogramVec::new(opts, label_names).expect("valid histogram opts");
                    let _ = self.registry.register(Box::new(histogram.clone()));
                    histogram
                })
                .clone()
        }

        fn label_values<'a>(&self, labels: &'a Labels) -> (Vec<&'static str>, Vec<&'a str>) {
            let mut names = Vec::with_capacity(labels.len());
            let mut values = Vec::with_capacity(labels.len());
            let mut sorted: Vec<(&&str, &String)> = labels.iter().collect();
            sorted.sort_by_key(|(k, _)| **k);
            for (name, value) in sorted {
                names.push(*name);
                values.push(value.as_str());
            }
            (names, values)
        }
    }

    impl MetricsSink for PrometheusSink {
        fn set_gauge(&self, name: &str, labels: &Labels, value: f64) {
            let (names, values) = self.label_values(labels);
            let gauge: Gauge = self.gauge_for(name, &names).with_label_values(&values);
            gauge.set(value);
        }

        fn incr_counter(&self, name: &str, labels: &Labels, delta: u64) {
            let (names, values) = self.label_values(labels);
            self.counter_for(name, &names).with_label_values(&values).inc_by(delta);
        }

        fn observe_histogram(&self, name: &str, labels: &Labels, value: f64) {
            let (names, values) = self.label_values(labels);
            let histogram: Histogram = self.histogram_for(name, &names).with_label_values(&values);
            histogram.observe(value);
        }
    }
}

#[cfg(feature = "prometheus")]
pub use prometheus_sink::PrometheusSink;
