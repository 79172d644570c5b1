//! Exposition backend: in-process metric families rendered in Prometheus text format.
//!
//! Families are `DashMap`s keyed by label-value vectors, with atomics as values,
//! so recording never takes a global lock. Label values are positional: a family
//! keeps as many bound values as its schema names, and missing ones render as
//! empty strings. Request counters may carry extra labels read from request
//! headers (`header_labels`, label name -> header name).

use std::collections::BTreeMap;
use std::fmt::{Display, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use meterplex_core::scalable::HistogramWithScale;
use meterplex_core::{
    Counter, CounterWithHeaders, Gauge, Histogram, MetricsBackend, Result, ScalableHistogram,
};

use super::{AtomicF64, Scopes};
use crate::config::BackendConfig;

/// Default request duration buckets, in seconds.
pub const DEFAULT_BUCKETS: [f64; 4] = [0.1, 0.3, 1.2, 5.0];

const ENTRY_POINT_LABELS: [&str; 4] = ["code", "method", "protocol", "entrypoint"];
const ENTRY_POINT_TLS_LABELS: [&str; 3] = ["tls_version", "tls_cipher", "entrypoint"];
const ROUTER_LABELS: [&str; 5] = ["code", "method", "protocol", "router", "service"];
const ROUTER_TLS_LABELS: [&str; 4] = ["tls_version", "tls_cipher", "router", "service"];
const SERVICE_LABELS: [&str; 4] = ["code", "method", "protocol", "service"];
const SERVICE_TLS_LABELS: [&str; 3] = ["tls_version", "tls_cipher", "service"];

/// Helper to escape label values.
fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn sample(name: &str, labels: &str, value: impl Display, out: &mut String) {
    if labels.is_empty() {
        let _ = writeln!(out, "{} {}", name, value);
    } else {
        let _ = writeln!(out, "{}{{{}}} {}", name, labels, value);
    }
}

/// Name, help text and label schema shared by every series of a family.
struct Desc {
    name: String,
    help: String,
    labels: Vec<&'static str>,
    /// (label name, header name)
    header_labels: Vec<(String, String)>,
}

impl Desc {
    fn new(prefix: &str, name: &str, help: impl Into<String>, labels: &[&'static str]) -> Self {
        Self {
            name: format!("{prefix}_{name}"),
            help: help.into(),
            labels: labels.to_vec(),
            header_labels: Vec::new(),
        }
    }

    fn with_header_labels(mut self, header_labels: &BTreeMap<String, String>) -> Self {
        self.header_labels = header_labels
            .iter()
            .map(|(label, header)| (label.clone(), header.clone()))
            .collect();
        self
    }

    fn arity(&self) -> usize {
        self.labels.len()
    }

    /// Series key: bound values cut/padded to the schema, then header values.
    fn key(&self, series: &Series) -> Vec<String> {
        let declared = self.labels.len();
        let total = declared + self.header_labels.len();

        let mut key = Vec::with_capacity(total);
        key.extend(series.values.iter().take(declared).cloned());
        key.resize(declared, String::new());
        key.extend(series.headers.iter().take(self.header_labels.len()).cloned());
        key.resize(total, String::new());
        key
    }

    /// Header lookup is case-insensitive; a missing header yields "".
    fn header_values(&self, headers: &[(&str, &str)]) -> Vec<String> {
        self.header_labels
            .iter()
            .map(|(_, wanted)| {
                headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
                    .map(|(_, v)| v.to_string())
                    .unwrap_or_default()
            })
            .collect()
    }

    fn label_str(&self, key: &[String]) -> String {
        self.labels
            .iter()
            .copied()
            .chain(self.header_labels.iter().map(|(l, _)| l.as_str()))
            .zip(key)
            .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn render_header(&self, kind: &str, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(out, "# TYPE {} {}", self.name, kind);
    }
}

/// Label values bound to one handle.
#[derive(Clone, Default)]
struct Series {
    values: Vec<String>,
    headers: Vec<String>,
}

impl Series {
    fn bind(&self, label_values: &[&str]) -> Self {
        let mut next = self.clone();
        next.values.extend(label_values.iter().map(|v| v.to_string()));
        next
    }

    fn bind_headers(&self, desc: &Desc, headers: &[(&str, &str)], label_values: &[&str]) -> Self {
        let mut next = self.bind(label_values);
        next.headers = desc.header_values(headers);
        next
    }
}

struct CounterVec {
    desc: Desc,
    map: DashMap<Vec<String>, AtomicF64>,
}

impl CounterVec {
    fn new(desc: Desc) -> Arc<Self> {
        Arc::new(Self {
            desc,
            map: DashMap::new(),
        })
    }

    /// Counters only go up: negative and NaN deltas are dropped.
    fn add(&self, series: &Series, v: f64) {
        if v.is_nan() || v < 0.0 {
            return;
        }
        let key = self.desc.key(series);
        self.map.entry(key).or_default().add(v);
    }

    fn render(&self, out: &mut String) {
        if self.map.is_empty() {
            return;
        }
        self.desc.render_header("counter", out);

        let mut rows: Vec<(Vec<String>, f64)> = self
            .map
            .iter()
            .map(|r| (r.key().clone(), r.value().load()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        for (key, v) in rows {
            sample(&self.desc.name, &self.desc.label_str(&key), v, out);
        }
    }
}

struct GaugeVec {
    desc: Desc,
    map: DashMap<Vec<String>, AtomicF64>,
}

impl GaugeVec {
    fn new(desc: Desc) -> Arc<Self> {
        Arc::new(Self {
            desc,
            map: DashMap::new(),
        })
    }

    fn set(&self, series: &Series, v: f64) {
        let key = self.desc.key(series);
        self.map.entry(key).or_default().set(v);
    }

    fn add(&self, series: &Series, v: f64) {
        let key = self.desc.key(series);
        self.map.entry(key).or_default().add(v);
    }

    fn render(&self, out: &mut String) {
        if self.map.is_empty() {
            return;
        }
        self.desc.render_header("gauge", out);

        let mut rows: Vec<(Vec<String>, f64)> = self
            .map
            .iter()
            .map(|r| (r.key().clone(), r.value().load()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        for (key, v) in rows {
            sample(&self.desc.name, &self.desc.label_str(&key), v, out);
        }
    }
}

struct AtomicHistogram {
    count: AtomicU64,
    sum: AtomicF64,
    buckets: Vec<AtomicU64>,
}

impl AtomicHistogram {
    fn new(buckets: usize) -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicF64::default(),
            buckets: (0..buckets).map(|_| AtomicU64::new(0)).collect(),
        }
    }
}

struct HistogramVec {
    desc: Desc,
    buckets: Vec<f64>,
    map: DashMap<Vec<String>, AtomicHistogram>,
}

impl HistogramVec {
    fn new(desc: Desc, buckets: Vec<f64>) -> Arc<Self> {
        Arc::new(Self {
            desc,
            buckets,
            map: DashMap::new(),
        })
    }

    fn observe(&self, series: &Series, v: f64) {
        if v.is_nan() {
            return;
        }
        let key = self.desc.key(series);
        let hist = self
            .map
            .entry(key)
            .or_insert_with(|| AtomicHistogram::new(self.buckets.len()));

        hist.count.fetch_add(1, Ordering::Relaxed);
        hist.sum.add(v);

        // Cumulative buckets: increment every bucket whose bound covers v.
        for (le, slot) in self.buckets.iter().zip(&hist.buckets) {
            if v <= *le {
                slot.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn render(&self, out: &mut String) {
        if self.map.is_empty() {
            return;
        }
        self.desc.render_header("histogram", out);

        let mut keys: Vec<Vec<String>> = self.map.iter().map(|r| r.key().clone()).collect();
        keys.sort();

        let name = &self.desc.name;
        for key in keys {
            let Some(hist) = self.map.get(&key) else { continue };

            let label_str = self.desc.label_str(&key);
            let prefix = if label_str.is_empty() {
                String::new()
            } else {
                format!("{},", label_str)
            };

            for (le, slot) in self.buckets.iter().zip(&hist.buckets) {
                let _ = writeln!(
                    out,
                    "{}_bucket{{{}le=\"{}\"}} {}",
                    name,
                    prefix,
                    le,
                    slot.load(Ordering::Relaxed)
                );
            }
            let count = hist.count.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_bucket{{{}le=\"+Inf\"}} {}", name, prefix, count);
            sample(&format!("{name}_sum"), &label_str, hist.sum.load(), out);
            sample(&format!("{name}_count"), &label_str, count, out);
        }
    }
}

struct ExpositionCounter {
    vec: Arc<CounterVec>,
    series: Series,
}

impl ExpositionCounter {
    fn root(vec: &Arc<CounterVec>) -> Self {
        Self {
            vec: Arc::clone(vec),
            series: Series::default(),
        }
    }

    fn bound(&self, series: Series) -> Self {
        Self {
            vec: Arc::clone(&self.vec),
            series,
        }
    }
}

impl Counter for ExpositionCounter {
    fn with(&self, label_values: &[&str]) -> Arc<dyn Counter> {
        Arc::new(self.bound(self.series.bind(label_values)))
    }

    fn add(&self, delta: f64) {
        self.vec.add(&self.series, delta);
    }

    fn label_arity(&self) -> Option<usize> {
        Some(self.vec.desc.arity())
    }
}

impl CounterWithHeaders for ExpositionCounter {
    fn with(&self, label_values: &[&str]) -> Arc<dyn CounterWithHeaders> {
        Arc::new(self.bound(self.series.bind(label_values)))
    }

    fn with_headers(
        &self,
        headers: &[(&str, &str)],
        label_values: &[&str],
    ) -> Arc<dyn CounterWithHeaders> {
        let series = self
            .series
            .bind_headers(&self.vec.desc, headers, label_values);
        Arc::new(self.bound(series))
    }

    fn add(&self, delta: f64) {
        self.vec.add(&self.series, delta);
    }

    fn label_arity(&self) -> Option<usize> {
        Some(self.vec.desc.arity())
    }
}

struct ExpositionGauge {
    vec: Arc<GaugeVec>,
    series: Series,
}

impl ExpositionGauge {
    fn root(vec: &Arc<GaugeVec>) -> Self {
        Self {
            vec: Arc::clone(vec),
            series: Series::default(),
        }
    }
}

impl Gauge for ExpositionGauge {
    fn with(&self, label_values: &[&str]) -> Arc<dyn Gauge> {
        Arc::new(Self {
            vec: Arc::clone(&self.vec),
            series: self.series.bind(label_values),
        })
    }

    fn set(&self, value: f64) {
        self.vec.set(&self.series, value);
    }

    fn add(&self, delta: f64) {
        self.vec.add(&self.series, delta);
    }

    fn label_arity(&self) -> Option<usize> {
        Some(self.vec.desc.arity())
    }
}

struct ExpositionHistogram {
    vec: Arc<HistogramVec>,
    series: Series,
}

impl ExpositionHistogram {
    fn root(vec: &Arc<HistogramVec>) -> Self {
        Self {
            vec: Arc::clone(vec),
            series: Series::default(),
        }
    }

    fn bound(&self, series: Series) -> Self {
        Self {
            vec: Arc::clone(&self.vec),
            series,
        }
    }
}

impl Histogram for ExpositionHistogram {
    fn with(&self, label_values: &[&str]) -> Arc<dyn Histogram> {
        Arc::new(self.bound(self.series.bind(label_values)))
    }

    fn with_headers(&self, headers: &[(&str, &str)], label_values: &[&str]) -> Arc<dyn Histogram> {
        let series = self
            .series
            .bind_headers(&self.vec.desc, headers, label_values);
        Arc::new(self.bound(series))
    }

    fn observe(&self, value: f64) {
        self.vec.observe(&self.series, value);
    }

    fn label_arity(&self) -> Option<usize> {
        Some(self.vec.desc.arity())
    }
}

/// Construction parameters. The prefix has no default: every backend names
/// its own metrics.
#[derive(Debug, Clone)]
pub struct ExpositionOptions {
    pub prefix: String,
    pub unit: Duration,
    pub scopes: Scopes,
    pub buckets: Vec<f64>,
    pub header_labels: BTreeMap<String, String>,
}

impl ExpositionOptions {
    /// Seconds as histogram unit, all scopes on, default buckets.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            unit: Duration::from_secs(1),
            scopes: Scopes::all(),
            buckets: DEFAULT_BUCKETS.to_vec(),
            header_labels: BTreeMap::new(),
        }
    }

    pub fn from_config(cfg: &BackendConfig) -> Result<Self> {
        Ok(Self {
            prefix: cfg.prefix.clone(),
            unit: cfg.unit()?,
            scopes: cfg.scopes(),
            buckets: cfg
                .buckets
                .clone()
                .unwrap_or_else(|| DEFAULT_BUCKETS.to_vec()),
            header_labels: cfg.header_labels.clone(),
        })
    }
}

/// The five request metrics every scope carries.
struct ScopeFamilies {
    reqs: Arc<CounterVec>,
    reqs_tls: Arc<CounterVec>,
    duration_vec: Arc<HistogramVec>,
    duration: Arc<HistogramWithScale>,
    reqs_bytes: Arc<CounterVec>,
    resps_bytes: Arc<CounterVec>,
}

impl ScopeFamilies {
    fn new(
        opts: &ExpositionOptions,
        scope: &str,
        labels: &[&'static str],
        tls_labels: &[&'static str],
    ) -> Result<Self> {
        let p = opts.prefix.as_str();

        let reqs = CounterVec::new(
            Desc::new(
                p,
                &format!("{scope}_requests_total"),
                format!("How many HTTP requests processed on a {scope}, partitioned by status code, protocol, and method."),
                labels,
            )
            .with_header_labels(&opts.header_labels),
        );
        let reqs_tls = CounterVec::new(Desc::new(
            p,
            &format!("{scope}_requests_tls_total"),
            format!("How many HTTP requests with TLS processed on a {scope}, partitioned by TLS version and cipher."),
            tls_labels,
        ));
        let duration_vec = HistogramVec::new(
            Desc::new(
                p,
                &format!("{scope}_request_duration_seconds"),
                format!("How long it took to process the request on a {scope}, partitioned by status code, protocol, and method."),
                labels,
            ),
            opts.buckets.clone(),
        );
        let duration = Arc::new(HistogramWithScale::new(
            Arc::new(ExpositionHistogram::root(&duration_vec)),
            opts.unit,
        )?);
        let reqs_bytes = CounterVec::new(Desc::new(
            p,
            &format!("{scope}_requests_bytes_total"),
            format!("The total size of requests in bytes handled by a {scope}."),
            labels,
        ));
        let resps_bytes = CounterVec::new(Desc::new(
            p,
            &format!("{scope}_responses_bytes_total"),
            format!("The total size of responses in bytes handled by a {scope}."),
            labels,
        ));

        Ok(Self {
            reqs,
            reqs_tls,
            duration_vec,
            duration,
            reqs_bytes,
            resps_bytes,
        })
    }

    fn reqs(&self) -> Arc<dyn CounterWithHeaders> {
        Arc::new(ExpositionCounter::root(&self.reqs))
    }

    fn reqs_tls(&self) -> Arc<dyn CounterWithHeaders> {
        Arc::new(ExpositionCounter::root(&self.reqs_tls))
    }

    fn duration(&self) -> Arc<dyn ScalableHistogram> {
        self.duration.clone()
    }

    fn reqs_bytes(&self) -> Arc<dyn CounterWithHeaders> {
        Arc::new(ExpositionCounter::root(&self.reqs_bytes))
    }

    fn resps_bytes(&self) -> Arc<dyn CounterWithHeaders> {
        Arc::new(ExpositionCounter::root(&self.resps_bytes))
    }

    fn render(&self, out: &mut String) {
        self.reqs.render(out);
        self.reqs_tls.render(out);
        self.duration_vec.render(out);
        self.reqs_bytes.render(out);
        self.resps_bytes.render(out);
    }
}

/// Pull-style backend exporting every registry metric.
pub struct ExpositionBackend {
    scopes: Scopes,

    config_reloads: Arc<CounterVec>,
    last_config_reload_success: Arc<GaugeVec>,
    open_connections: Arc<GaugeVec>,
    tls_certs_not_after: Arc<GaugeVec>,

    entry_point: ScopeFamilies,
    router: ScopeFamilies,
    service: ScopeFamilies,
    service_retries: Arc<CounterVec>,
    service_server_up: Arc<GaugeVec>,
}

impl ExpositionBackend {
    /// Fails with `InvalidUnit` if `opts.unit` is zero.
    pub fn new(opts: ExpositionOptions) -> Result<Self> {
        let p = opts.prefix.as_str();

        Ok(Self {
            scopes: opts.scopes,
            config_reloads: CounterVec::new(Desc::new(
                p,
                "config_reloads_total",
                "Config reloads",
                &[],
            )),
            last_config_reload_success: GaugeVec::new(Desc::new(
                p,
                "config_last_reload_success",
                "Last config reload success",
                &[],
            )),
            open_connections: GaugeVec::new(Desc::new(
                p,
                "open_connections",
                "How many open connections exist, by entrypoint and protocol",
                &["entrypoint", "protocol"],
            )),
            tls_certs_not_after: GaugeVec::new(Desc::new(
                p,
                "tls_certs_not_after",
                "Certificate expiration timestamp",
                &["cn", "serial", "sans"],
            )),
            entry_point: ScopeFamilies::new(
                &opts,
                "entrypoint",
                &ENTRY_POINT_LABELS,
                &ENTRY_POINT_TLS_LABELS,
            )?,
            router: ScopeFamilies::new(&opts, "router", &ROUTER_LABELS, &ROUTER_TLS_LABELS)?,
            service: ScopeFamilies::new(&opts, "service", &SERVICE_LABELS, &SERVICE_TLS_LABELS)?,
            service_retries: CounterVec::new(Desc::new(
                p,
                "service_retries_total",
                "How many request retries happened on a service.",
                &["service"],
            )),
            service_server_up: GaugeVec::new(Desc::new(
                p,
                "service_server_up",
                "service server is up, described by gauge value of 0 or 1.",
                &["service", "url"],
            )),
        })
    }

    /// Render all families with at least one series, in Prometheus text format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.config_reloads.render(&mut out);
        self.last_config_reload_success.render(&mut out);
        self.open_connections.render(&mut out);
        self.tls_certs_not_after.render(&mut out);
        self.entry_point.render(&mut out);
        self.router.render(&mut out);
        self.service.render(&mut out);
        self.service_retries.render(&mut out);
        self.service_server_up.render(&mut out);
        out
    }
}

impl MetricsBackend for ExpositionBackend {
    fn kind(&self) -> &'static str {
        "exposition"
    }

    fn config_reloads_counter(&self) -> Option<Arc<dyn Counter>> {
        Some(Arc::new(ExpositionCounter::root(&self.config_reloads)))
    }
    fn last_config_reload_success_gauge(&self) -> Option<Arc<dyn Gauge>> {
        Some(Arc::new(ExpositionGauge::root(&self.last_config_reload_success)))
    }
    fn open_connections_gauge(&self) -> Option<Arc<dyn Gauge>> {
        Some(Arc::new(ExpositionGauge::root(&self.open_connections)))
    }
    fn tls_certs_not_after_timestamp_gauge(&self) -> Option<Arc<dyn Gauge>> {
        Some(Arc::new(ExpositionGauge::root(&self.tls_certs_not_after)))
    }

    fn entry_point_reqs_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        self.scopes.entrypoints.then(|| self.entry_point.reqs())
    }
    fn entry_point_reqs_tls_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        self.scopes.entrypoints.then(|| self.entry_point.reqs_tls())
    }
    fn entry_point_req_duration_histogram(&self) -> Option<Arc<dyn ScalableHistogram>> {
        self.scopes.entrypoints.then(|| self.entry_point.duration())
    }
    fn entry_point_reqs_bytes_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        self.scopes.entrypoints.then(|| self.entry_point.reqs_bytes())
    }
    fn entry_point_resps_bytes_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        self.scopes.entrypoints.then(|| self.entry_point.resps_bytes())
    }

    fn router_reqs_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        self.scopes.routers.then(|| self.router.reqs())
    }
    fn router_reqs_tls_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        self.scopes.routers.then(|| self.router.reqs_tls())
    }
    fn router_req_duration_histogram(&self) -> Option<Arc<dyn ScalableHistogram>> {
        self.scopes.routers.then(|| self.router.duration())
    }
    fn router_reqs_bytes_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        self.scopes.routers.then(|| self.router.reqs_bytes())
    }
    fn router_resps_bytes_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        self.scopes.routers.then(|| self.router.resps_bytes())
    }

    fn service_reqs_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        self.scopes.services.then(|| self.service.reqs())
    }
    fn service_reqs_tls_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        self.scopes.services.then(|| self.service.reqs_tls())
    }
    fn service_req_duration_histogram(&self) -> Option<Arc<dyn ScalableHistogram>> {
        self.scopes.services.then(|| self.service.duration())
    }
    fn service_retries_counter(&self) -> Option<Arc<dyn Counter>> {
        self.scopes
            .services
            .then(|| Arc::new(ExpositionCounter::root(&self.service_retries)) as Arc<dyn Counter>)
    }
    fn service_server_up_gauge(&self) -> Option<Arc<dyn Gauge>> {
        self.scopes
            .services
            .then(|| Arc::new(ExpositionGauge::root(&self.service_server_up)) as Arc<dyn Gauge>)
    }
    fn service_reqs_bytes_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        self.scopes.services.then(|| self.service.reqs_bytes())
    }
    fn service_resps_bytes_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        self.scopes.services.then(|| self.service.resps_bytes())
    }
}
