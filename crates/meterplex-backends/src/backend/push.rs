//! Push backend: statsd-style line accumulation.
//!
//! Between flushes, counters are summed, gauges keep their last value, and
//! timings keep every observation up to a per-key cap (the excess is counted
//! and flushed as `{key}.dropped`). Labels are not part of the statsd key, so
//! binding only produces a new handle on the same key. Shipping the lines
//! (UDP, agent socket) is left to the caller of `flush`.
//!
//! Only a subset of the registry is exported here; TLS counters, byte counters
//! and certificate expiry are reported absent.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use meterplex_core::scalable::HistogramWithScale;
use meterplex_core::{
    Counter, CounterWithHeaders, Gauge, Histogram, MeterError, MetricsBackend, Result,
    ScalableHistogram,
};

use super::{AtomicF64, Scopes};
use crate::config::BackendConfig;

/// Observations kept per timing key between flushes when nothing else is set.
pub const DEFAULT_MAX_PENDING_TIMINGS: usize = 1024;

#[derive(Default)]
struct PendingTimings {
    samples: Vec<f64>,
    dropped: u64,
}

struct PushBuffer {
    max_pending_timings: usize,
    counters: DashMap<Arc<str>, AtomicF64>,
    gauges: DashMap<Arc<str>, AtomicF64>,
    timings: DashMap<Arc<str>, PendingTimings>,
}

impl PushBuffer {
    fn new(max_pending_timings: usize) -> Self {
        Self {
            max_pending_timings,
            counters: DashMap::new(),
            gauges: DashMap::new(),
            timings: DashMap::new(),
        }
    }

    fn record_timing(&self, key: &Arc<str>, value: f64) {
        let mut pending = self.timings.entry(Arc::clone(key)).or_default();
        if pending.samples.len() < self.max_pending_timings {
            pending.samples.push(value);
        } else {
            pending.dropped += 1;
        }
    }

    fn flush(&self) -> Vec<String> {
        let mut counters: Vec<String> = self
            .counters
            .iter()
            .filter_map(|e| {
                let v = e.value().take();
                (v != 0.0).then(|| format!("{}:{}|c", e.key(), v))
            })
            .collect();

        let mut timings: Vec<String> = Vec::new();
        for mut e in self.timings.iter_mut() {
            let key = Arc::clone(e.key());
            let pending = std::mem::take(e.value_mut());
            if pending.dropped > 0 {
                counters.push(format!("{}.dropped:{}|c", key, pending.dropped));
            }
            for v in pending.samples {
                timings.push(format!("{}:{}|ms", key, v));
            }
        }
        counters.sort();
        // stable: keeps per-key observation order
        timings.sort_by(|a, b| line_key(a).cmp(line_key(b)));

        let mut gauges: Vec<String> = self
            .gauges
            .iter()
            .map(|e| format!("{}:{}|g", e.key(), e.value().load()))
            .collect();
        gauges.sort();

        counters.extend(gauges);
        counters.extend(timings);
        counters
    }
}

/// Run `f` on the slot for `key`, inserting a default one on first use.
/// Only the first use takes the shard write lock.
fn with_slot<R>(
    map: &DashMap<Arc<str>, AtomicF64>,
    key: &Arc<str>,
    f: impl FnOnce(&AtomicF64) -> R,
) -> R {
    if let Some(slot) = map.get(key) {
        return f(slot.value());
    }
    f(map.entry(Arc::clone(key)).or_default().value())
}

fn line_key(line: &str) -> &str {
    line.split_once(':').map(|(k, _)| k).unwrap_or(line)
}

#[derive(Clone)]
struct PushMetric {
    key: Arc<str>,
    buffer: Arc<PushBuffer>,
}

impl PushMetric {
    fn new(buffer: &Arc<PushBuffer>, prefix: &str, name: &str) -> Self {
        Self {
            key: Arc::from(format!("{prefix}.{name}").as_str()),
            buffer: Arc::clone(buffer),
        }
    }
}

impl Counter for PushMetric {
    fn with(&self, _label_values: &[&str]) -> Arc<dyn Counter> {
        Arc::new(self.clone())
    }

    fn add(&self, delta: f64) {
        with_slot(&self.buffer.counters, &self.key, |c| c.add(delta));
    }
}

impl CounterWithHeaders for PushMetric {
    fn with(&self, _label_values: &[&str]) -> Arc<dyn CounterWithHeaders> {
        Arc::new(self.clone())
    }

    fn add(&self, delta: f64) {
        Counter::add(self, delta);
    }
}

impl Gauge for PushMetric {
    fn with(&self, _label_values: &[&str]) -> Arc<dyn Gauge> {
        Arc::new(self.clone())
    }

    fn set(&self, value: f64) {
        with_slot(&self.buffer.gauges, &self.key, |g| g.set(value));
    }

    fn add(&self, delta: f64) {
        with_slot(&self.buffer.gauges, &self.key, |g| g.add(delta));
    }
}

impl Histogram for PushMetric {
    fn with(&self, _label_values: &[&str]) -> Arc<dyn Histogram> {
        Arc::new(self.clone())
    }

    fn observe(&self, value: f64) {
        self.buffer.record_timing(&self.key, value);
    }
}

#[derive(Debug, Clone)]
pub struct PushOptions {
    pub prefix: String,
    pub unit: Duration,
    pub scopes: Scopes,
    /// Per-key cap on timings held between flushes. Past it, observations
    /// are only counted and reported as `{key}.dropped`.
    pub max_pending_timings: usize,
}

impl PushOptions {
    /// Milliseconds as histogram unit, all scopes on.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            unit: Duration::from_millis(1),
            scopes: Scopes::all(),
            max_pending_timings: DEFAULT_MAX_PENDING_TIMINGS,
        }
    }

    pub fn from_config(cfg: &BackendConfig) -> Result<Self> {
        Ok(Self {
            prefix: cfg.prefix.clone(),
            unit: cfg.unit()?,
            scopes: cfg.scopes(),
            max_pending_timings: cfg
                .max_pending_timings
                .unwrap_or(DEFAULT_MAX_PENDING_TIMINGS),
        })
    }
}

struct ScopeTimers {
    reqs: PushMetric,
    duration: Arc<HistogramWithScale>,
}

impl ScopeTimers {
    fn new(buffer: &Arc<PushBuffer>, opts: &PushOptions, scope: &str) -> Result<Self> {
        let duration = PushMetric::new(buffer, &opts.prefix, &format!("{scope}.request.duration"));
        Ok(Self {
            reqs: PushMetric::new(buffer, &opts.prefix, &format!("{scope}.request.total")),
            duration: Arc::new(HistogramWithScale::new(Arc::new(duration), opts.unit)?),
        })
    }

    fn reqs(&self) -> Arc<dyn CounterWithHeaders> {
        Arc::new(self.reqs.clone())
    }

    fn duration(&self) -> Arc<dyn ScalableHistogram> {
        self.duration.clone()
    }
}

pub struct PushBackend {
    scopes: Scopes,
    buffer: Arc<PushBuffer>,

    config_reloads: PushMetric,
    last_config_reload_success: PushMetric,
    open_connections: PushMetric,

    entry_point: ScopeTimers,
    router: ScopeTimers,
    service: ScopeTimers,
    service_retries: PushMetric,
    service_server_up: PushMetric,
}

impl PushBackend {
    /// Fails with `InvalidUnit` if `opts.unit` is zero, and with `BadConfig`
    /// if `opts.max_pending_timings` is zero.
    pub fn new(opts: PushOptions) -> Result<Self> {
        if opts.max_pending_timings == 0 {
            return Err(MeterError::BadConfig(
                "push backend needs room for at least one pending timing".into(),
            ));
        }
        let buffer = Arc::new(PushBuffer::new(opts.max_pending_timings));
        let p = opts.prefix.as_str();

        Ok(Self {
            scopes: opts.scopes,
            config_reloads: PushMetric::new(&buffer, p, "config.reload.total"),
            last_config_reload_success: PushMetric::new(
                &buffer,
                p,
                "config.reload.lastSuccessTimestamp",
            ),
            open_connections: PushMetric::new(&buffer, p, "open.connections"),
            entry_point: ScopeTimers::new(&buffer, &opts, "entrypoint")?,
            router: ScopeTimers::new(&buffer, &opts, "router")?,
            service: ScopeTimers::new(&buffer, &opts, "service")?,
            service_retries: PushMetric::new(&buffer, p, "service.retries.total"),
            service_server_up: PushMetric::new(&buffer, p, "service.server.up"),
            buffer,
        })
    }

    /// Drain accumulated values as statsd lines: counters (including
    /// `.dropped` timing counts), then gauges, then timings, each sorted by
    /// key. Zero counters are skipped; gauges are reported on every flush.
    pub fn flush(&self) -> Vec<String> {
        self.buffer.flush()
    }
}

impl MetricsBackend for PushBackend {
    fn kind(&self) -> &'static str {
        "push"
    }

    fn config_reloads_counter(&self) -> Option<Arc<dyn Counter>> {
        Some(Arc::new(self.config_reloads.clone()))
    }
    fn last_config_reload_success_gauge(&self) -> Option<Arc<dyn Gauge>> {
        Some(Arc::new(self.last_config_reload_success.clone()))
    }
    fn open_connections_gauge(&self) -> Option<Arc<dyn Gauge>> {
        Some(Arc::new(self.open_connections.clone()))
    }

    fn entry_point_reqs_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        self.scopes.entrypoints.then(|| self.entry_point.reqs())
    }
    fn entry_point_req_duration_histogram(&self) -> Option<Arc<dyn ScalableHistogram>> {
        self.scopes.entrypoints.then(|| self.entry_point.duration())
    }

    fn router_reqs_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        self.scopes.routers.then(|| self.router.reqs())
    }
    fn router_req_duration_histogram(&self) -> Option<Arc<dyn ScalableHistogram>> {
        self.scopes.routers.then(|| self.router.duration())
    }

    fn service_reqs_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        self.scopes.services.then(|| self.service.reqs())
    }
    fn service_req_duration_histogram(&self) -> Option<Arc<dyn ScalableHistogram>> {
        self.scopes.services.then(|| self.service.duration())
    }
    fn service_retries_counter(&self) -> Option<Arc<dyn Counter>> {
        self.scopes
            .services
            .then(|| Arc::new(self.service_retries.clone()) as Arc<dyn Counter>)
    }
    fn service_server_up_gauge(&self) -> Option<Arc<dyn Gauge>> {
        self.scopes
            .services
            .then(|| Arc::new(self.service_server_up.clone()) as Arc<dyn Gauge>)
    }
}
