//! Backend contract and registry composition.
//!
//! A `MetricsBackend` reports each metric it supports as `Some(instance)` and
//! everything else as `None`. Backends are expected to disagree on what they
//! support; `Registry::compose` keeps the present instances of every accessor,
//! in backend order, behind a fan-out wrapper and derives one enablement flag
//! per scope. The resulting registry is built once at startup and only read
//! afterwards.

use std::fmt;
use std::sync::Arc;

use crate::error::{MeterError, Result};
use crate::fanout::{MultiCounter, MultiCounterWithHeaders, MultiGauge};
use crate::metric::{Counter, CounterWithHeaders, Gauge, ScalableHistogram};
use crate::scalable::MultiScalableHistogram;

/// Implemented by every metric-exporting backend.
///
/// All accessors default to `None` ("not supported"), so a backend only
/// overrides what it actually exports. Each accessor is called once, during
/// composition.
pub trait MetricsBackend: Send + Sync {
    /// Short backend identifier used in logs.
    fn kind(&self) -> &'static str;

    // server

    fn config_reloads_counter(&self) -> Option<Arc<dyn Counter>> {
        None
    }
    fn last_config_reload_success_gauge(&self) -> Option<Arc<dyn Gauge>> {
        None
    }
    fn open_connections_gauge(&self) -> Option<Arc<dyn Gauge>> {
        None
    }
    fn tls_certs_not_after_timestamp_gauge(&self) -> Option<Arc<dyn Gauge>> {
        None
    }

    // entry point

    fn entry_point_reqs_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        None
    }
    fn entry_point_reqs_tls_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        None
    }
    fn entry_point_req_duration_histogram(&self) -> Option<Arc<dyn ScalableHistogram>> {
        None
    }
    fn entry_point_reqs_bytes_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        None
    }
    fn entry_point_resps_bytes_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        None
    }

    // router

    fn router_reqs_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        None
    }
    fn router_reqs_tls_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        None
    }
    fn router_req_duration_histogram(&self) -> Option<Arc<dyn ScalableHistogram>> {
        None
    }
    fn router_reqs_bytes_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        None
    }
    fn router_resps_bytes_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        None
    }

    // service

    fn service_reqs_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        None
    }
    fn service_reqs_tls_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        None
    }
    fn service_req_duration_histogram(&self) -> Option<Arc<dyn ScalableHistogram>> {
        None
    }
    fn service_retries_counter(&self) -> Option<Arc<dyn Counter>> {
        None
    }
    fn service_server_up_gauge(&self) -> Option<Arc<dyn Gauge>> {
        None
    }
    fn service_reqs_bytes_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        None
    }
    fn service_resps_bytes_counter(&self) -> Option<Arc<dyn CounterWithHeaders>> {
        None
    }
}

/// Uniform access to the declared label arity of any capability object.
trait Declared {
    fn declared_arity(&self) -> Option<usize>;
}

impl Declared for dyn Counter {
    fn declared_arity(&self) -> Option<usize> {
        self.label_arity()
    }
}

impl Declared for dyn Gauge {
    fn declared_arity(&self) -> Option<usize> {
        self.label_arity()
    }
}

impl Declared for dyn CounterWithHeaders {
    fn declared_arity(&self) -> Option<usize> {
        self.label_arity()
    }
}

impl Declared for dyn ScalableHistogram {
    fn declared_arity(&self) -> Option<usize> {
        self.label_arity()
    }
}

/// Query every backend once for one accessor and keep the present instances,
/// in backend order. Fails if two backends declare different label arities.
fn gather<T, F>(
    metric: &'static str,
    backends: &[Arc<dyn MetricsBackend>],
    query: F,
) -> Result<Vec<Arc<T>>>
where
    T: Declared + ?Sized,
    F: Fn(&dyn MetricsBackend) -> Option<Arc<T>>,
{
    let mut found = Vec::with_capacity(backends.len());
    let mut schema: Option<(&'static str, usize)> = None;

    for backend in backends {
        let Some(m) = query(&**backend) else { continue };

        if let Some(arity) = m.declared_arity() {
            match schema {
                None => schema = Some((backend.kind(), arity)),
                Some((first, expected)) if expected != arity => {
                    tracing::warn!(
                        metric,
                        first_backend = first,
                        backend = backend.kind(),
                        expected,
                        found = arity,
                        "backends disagree on label arity"
                    );
                    return Err(MeterError::LabelArityMismatch {
                        metric,
                        expected,
                        found: arity,
                    });
                }
                Some(_) => {}
            }
        }
        found.push(m);
    }

    tracing::debug!(metric, backends = found.len(), "metric aggregated");
    Ok(found)
}

/// The composed instrumentation surface.
///
/// Every accessor returns a callable metric: a fan-out over the backends that
/// registered it, possibly empty. The `is_*_enabled` flags tell the request
/// pipeline whether it may skip a whole scope.
#[derive(Clone)]
pub struct Registry {
    ep_enabled: bool,
    router_enabled: bool,
    svc_enabled: bool,

    config_reloads_counter: Arc<dyn Counter>,
    last_config_reload_success_gauge: Arc<dyn Gauge>,
    open_connections_gauge: Arc<dyn Gauge>,
    tls_certs_not_after_timestamp_gauge: Arc<dyn Gauge>,

    entry_point_reqs_counter: Arc<dyn CounterWithHeaders>,
    entry_point_reqs_tls_counter: Arc<dyn CounterWithHeaders>,
    entry_point_req_duration_histogram: Arc<dyn ScalableHistogram>,
    entry_point_reqs_bytes_counter: Arc<dyn CounterWithHeaders>,
    entry_point_resps_bytes_counter: Arc<dyn CounterWithHeaders>,

    router_reqs_counter: Arc<dyn CounterWithHeaders>,
    router_reqs_tls_counter: Arc<dyn CounterWithHeaders>,
    router_req_duration_histogram: Arc<dyn ScalableHistogram>,
    router_reqs_bytes_counter: Arc<dyn CounterWithHeaders>,
    router_resps_bytes_counter: Arc<dyn CounterWithHeaders>,

    service_reqs_counter: Arc<dyn CounterWithHeaders>,
    service_reqs_tls_counter: Arc<dyn CounterWithHeaders>,
    service_req_duration_histogram: Arc<dyn ScalableHistogram>,
    service_retries_counter: Arc<dyn Counter>,
    service_server_up_gauge: Arc<dyn Gauge>,
    service_reqs_bytes_counter: Arc<dyn CounterWithHeaders>,
    service_resps_bytes_counter: Arc<dyn CounterWithHeaders>,
}

fn counter(children: Vec<Arc<dyn Counter>>) -> Arc<dyn Counter> {
    Arc::new(MultiCounter::new(children))
}

fn gauge(children: Vec<Arc<dyn Gauge>>) -> Arc<dyn Gauge> {
    Arc::new(MultiGauge::new(children))
}

fn counter_with_headers(children: Vec<Arc<dyn CounterWithHeaders>>) -> Arc<dyn CounterWithHeaders> {
    Arc::new(MultiCounterWithHeaders::new(children))
}

fn histogram(children: Vec<Arc<dyn ScalableHistogram>>) -> Arc<dyn ScalableHistogram> {
    Arc::new(MultiScalableHistogram::new(children))
}

impl Registry {
    /// Registry with no backends: every metric is a no-op, every flag is false.
    pub fn void() -> Self {
        Self {
            ep_enabled: false,
            router_enabled: false,
            svc_enabled: false,
            config_reloads_counter: counter(Vec::new()),
            last_config_reload_success_gauge: gauge(Vec::new()),
            open_connections_gauge: gauge(Vec::new()),
            tls_certs_not_after_timestamp_gauge: gauge(Vec::new()),
            entry_point_reqs_counter: counter_with_headers(Vec::new()),
            entry_point_reqs_tls_counter: counter_with_headers(Vec::new()),
            entry_point_req_duration_histogram: histogram(Vec::new()),
            entry_point_reqs_bytes_counter: counter_with_headers(Vec::new()),
            entry_point_resps_bytes_counter: counter_with_headers(Vec::new()),
            router_reqs_counter: counter_with_headers(Vec::new()),
            router_reqs_tls_counter: counter_with_headers(Vec::new()),
            router_req_duration_histogram: histogram(Vec::new()),
            router_reqs_bytes_counter: counter_with_headers(Vec::new()),
            router_resps_bytes_counter: counter_with_headers(Vec::new()),
            service_reqs_counter: counter_with_headers(Vec::new()),
            service_reqs_tls_counter: counter_with_headers(Vec::new()),
            service_req_duration_histogram: histogram(Vec::new()),
            service_retries_counter: counter(Vec::new()),
            service_server_up_gauge: gauge(Vec::new()),
            service_reqs_bytes_counter: counter_with_headers(Vec::new()),
            service_resps_bytes_counter: counter_with_headers(Vec::new()),
        }
    }

    /// Compose one registry out of `backends`, preserving their order.
    ///
    /// A backend returning `None` for a metric is simply skipped for that
    /// metric. The only failure is two backends declaring different label
    /// arities for the same metric.
    pub fn compose(backends: &[Arc<dyn MetricsBackend>]) -> Result<Self> {
        if backends.is_empty() {
            return Ok(Self::void());
        }

        let config_reloads_counter =
            gather("config_reloads_counter", backends, |b| b.config_reloads_counter())?;
        let last_config_reload_success_gauge = gather(
            "last_config_reload_success_gauge",
            backends,
            |b| b.last_config_reload_success_gauge(),
        )?;
        let open_connections_gauge =
            gather("open_connections_gauge", backends, |b| b.open_connections_gauge())?;
        let tls_certs_not_after_timestamp_gauge = gather(
            "tls_certs_not_after_timestamp_gauge",
            backends,
            |b| b.tls_certs_not_after_timestamp_gauge(),
        )?;

        let entry_point_reqs_counter =
            gather("entry_point_reqs_counter", backends, |b| b.entry_point_reqs_counter())?;
        let entry_point_reqs_tls_counter = gather("entry_point_reqs_tls_counter", backends, |b| {
            b.entry_point_reqs_tls_counter()
        })?;
        let entry_point_req_duration_histogram = gather(
            "entry_point_req_duration_histogram",
            backends,
            |b| b.entry_point_req_duration_histogram(),
        )?;
        let entry_point_reqs_bytes_counter = gather("entry_point_reqs_bytes_counter", backends, |b| {
            b.entry_point_reqs_bytes_counter()
        })?;
        let entry_point_resps_bytes_counter =
            gather("entry_point_resps_bytes_counter", backends, |b| {
                b.entry_point_resps_bytes_counter()
            })?;

        let router_reqs_counter =
            gather("router_reqs_counter", backends, |b| b.router_reqs_counter())?;
        let router_reqs_tls_counter =
            gather("router_reqs_tls_counter", backends, |b| b.router_reqs_tls_counter())?;
        let router_req_duration_histogram = gather("router_req_duration_histogram", backends, |b| {
            b.router_req_duration_histogram()
        })?;
        let router_reqs_bytes_counter =
            gather("router_reqs_bytes_counter", backends, |b| b.router_reqs_bytes_counter())?;
        let router_resps_bytes_counter =
            gather("router_resps_bytes_counter", backends, |b| b.router_resps_bytes_counter())?;

        let service_reqs_counter =
            gather("service_reqs_counter", backends, |b| b.service_reqs_counter())?;
        let service_reqs_tls_counter =
            gather("service_reqs_tls_counter", backends, |b| b.service_reqs_tls_counter())?;
        let service_req_duration_histogram = gather("service_req_duration_histogram", backends, |b| {
            b.service_req_duration_histogram()
        })?;
        let service_retries_counter =
            gather("service_retries_counter", backends, |b| b.service_retries_counter())?;
        let service_server_up_gauge =
            gather("service_server_up_gauge", backends, |b| b.service_server_up_gauge())?;
        let service_reqs_bytes_counter =
            gather("service_reqs_bytes_counter", backends, |b| b.service_reqs_bytes_counter())?;
        let service_resps_bytes_counter = gather("service_resps_bytes_counter", backends, |b| {
            b.service_resps_bytes_counter()
        })?;

        let ep_enabled =
            !entry_point_reqs_counter.is_empty() || !entry_point_req_duration_histogram.is_empty();
        let router_enabled =
            !router_reqs_counter.is_empty() || !router_req_duration_histogram.is_empty();
        let svc_enabled = !service_reqs_counter.is_empty()
            || !service_req_duration_histogram.is_empty()
            || !service_retries_counter.is_empty()
            || !service_server_up_gauge.is_empty();

        tracing::info!(
            backends = backends.len(),
            ep_enabled,
            router_enabled,
            svc_enabled,
            "metrics registry composed"
        );

        Ok(Self {
            ep_enabled,
            router_enabled,
            svc_enabled,
            config_reloads_counter: counter(config_reloads_counter),
            last_config_reload_success_gauge: gauge(last_config_reload_success_gauge),
            open_connections_gauge: gauge(open_connections_gauge),
            tls_certs_not_after_timestamp_gauge: gauge(tls_certs_not_after_timestamp_gauge),
            entry_point_reqs_counter: counter_with_headers(entry_point_reqs_counter),
            entry_point_reqs_tls_counter: counter_with_headers(entry_point_reqs_tls_counter),
            entry_point_req_duration_histogram: histogram(entry_point_req_duration_histogram),
            entry_point_reqs_bytes_counter: counter_with_headers(entry_point_reqs_bytes_counter),
            entry_point_resps_bytes_counter: counter_with_headers(entry_point_resps_bytes_counter),
            router_reqs_counter: counter_with_headers(router_reqs_counter),
            router_reqs_tls_counter: counter_with_headers(router_reqs_tls_counter),
            router_req_duration_histogram: histogram(router_req_duration_histogram),
            router_reqs_bytes_counter: counter_with_headers(router_reqs_bytes_counter),
            router_resps_bytes_counter: counter_with_headers(router_resps_bytes_counter),
            service_reqs_counter: counter_with_headers(service_reqs_counter),
            service_reqs_tls_counter: counter_with_headers(service_reqs_tls_counter),
            service_req_duration_histogram: histogram(service_req_duration_histogram),
            service_retries_counter: counter(service_retries_counter),
            service_server_up_gauge: gauge(service_server_up_gauge),
            service_reqs_bytes_counter: counter_with_headers(service_reqs_bytes_counter),
            service_resps_bytes_counter: counter_with_headers(service_resps_bytes_counter),
        })
    }

    /// Whether any backend instruments entry points.
    pub fn is_ep_enabled(&self) -> bool {
        self.ep_enabled
    }

    /// Whether any backend instruments routers.
    pub fn is_router_enabled(&self) -> bool {
        self.router_enabled
    }

    /// Whether any backend instruments services.
    pub fn is_svc_enabled(&self) -> bool {
        self.svc_enabled
    }

    pub fn config_reloads_counter(&self) -> Arc<dyn Counter> {
        Arc::clone(&self.config_reloads_counter)
    }

    pub fn last_config_reload_success_gauge(&self) -> Arc<dyn Gauge> {
        Arc::clone(&self.last_config_reload_success_gauge)
    }

    pub fn open_connections_gauge(&self) -> Arc<dyn Gauge> {
        Arc::clone(&self.open_connections_gauge)
    }

    pub fn tls_certs_not_after_timestamp_gauge(&self) -> Arc<dyn Gauge> {
        Arc::clone(&self.tls_certs_not_after_timestamp_gauge)
    }

    pub fn entry_point_reqs_counter(&self) -> Arc<dyn CounterWithHeaders> {
        Arc::clone(&self.entry_point_reqs_counter)
    }

    pub fn entry_point_reqs_tls_counter(&self) -> Arc<dyn CounterWithHeaders> {
        Arc::clone(&self.entry_point_reqs_tls_counter)
    }

    pub fn entry_point_req_duration_histogram(&self) -> Arc<dyn ScalableHistogram> {
        Arc::clone(&self.entry_point_req_duration_histogram)
    }

    pub fn entry_point_reqs_bytes_counter(&self) -> Arc<dyn CounterWithHeaders> {
        Arc::clone(&self.entry_point_reqs_bytes_counter)
    }

    pub fn entry_point_resps_bytes_counter(&self) -> Arc<dyn CounterWithHeaders> {
        Arc::clone(&self.entry_point_resps_bytes_counter)
    }

    pub fn router_reqs_counter(&self) -> Arc<dyn CounterWithHeaders> {
        Arc::clone(&self.router_reqs_counter)
    }

    pub fn router_reqs_tls_counter(&self) -> Arc<dyn CounterWithHeaders> {
        Arc::clone(&self.router_reqs_tls_counter)
    }

    pub fn router_req_duration_histogram(&self) -> Arc<dyn ScalableHistogram> {
        Arc::clone(&self.router_req_duration_histogram)
    }

    pub fn router_reqs_bytes_counter(&self) -> Arc<dyn CounterWithHeaders> {
        Arc::clone(&self.router_reqs_bytes_counter)
    }

    pub fn router_resps_bytes_counter(&self) -> Arc<dyn CounterWithHeaders> {
        Arc::clone(&self.router_resps_bytes_counter)
    }

    pub fn service_reqs_counter(&self) -> Arc<dyn CounterWithHeaders> {
        Arc::clone(&self.service_reqs_counter)
    }

    pub fn service_reqs_tls_counter(&self) -> Arc<dyn CounterWithHeaders> {
        Arc::clone(&self.service_reqs_tls_counter)
    }

    pub fn service_req_duration_histogram(&self) -> Arc<dyn ScalableHistogram> {
        Arc::clone(&self.service_req_duration_histogram)
    }

    pub fn service_retries_counter(&self) -> Arc<dyn Counter> {
        Arc::clone(&self.service_retries_counter)
    }

    pub fn service_server_up_gauge(&self) -> Arc<dyn Gauge> {
        Arc::clone(&self.service_server_up_gauge)
    }

    pub fn service_reqs_bytes_counter(&self) -> Arc<dyn CounterWithHeaders> {
        Arc::clone(&self.service_reqs_bytes_counter)
    }

    pub fn service_resps_bytes_counter(&self) -> Arc<dyn CounterWithHeaders> {
        Arc::clone(&self.service_resps_bytes_counter)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::void()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("ep_enabled", &self.ep_enabled)
            .field("router_enabled", &self.router_enabled)
            .field("svc_enabled", &self.svc_enabled)
            .finish_non_exhaustive()
    }
}
