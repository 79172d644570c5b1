//! Push backend accumulation and flush.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::time::{Duration, Instant};

use meterplex_backends::backend::push::DEFAULT_MAX_PENDING_TIMINGS;
use meterplex_backends::{PushBackend, PushOptions, Scopes};
use meterplex_core::{Counter, CounterWithHeaders, Gauge, MetricsBackend, ScalableHistogram};

fn backend() -> PushBackend {
    PushBackend::new(PushOptions::new("edge")).unwrap()
}

#[test]
fn zero_unit_fails_construction() {
    let mut opts = PushOptions::new("edge");
    opts.unit = Duration::ZERO;
    let err = PushBackend::new(opts).err().expect("must fail");
    assert_eq!(err.code(), "INVALID_UNIT");
}

#[test]
fn counters_are_summed_and_reset_on_flush() {
    let b = backend();
    let c = b.service_reqs_counter().unwrap();
    c.with(&["200"]).add(1.0);
    c.with_headers(&[("Host", "x")], &["500"]).add(2.0);

    assert_eq!(b.flush(), vec!["edge.service.request.total:3|c".to_string()]);
    assert!(b.flush().is_empty());
}

#[test]
fn gauges_keep_last_value_across_flushes() {
    let b = backend();
    let g = b.open_connections_gauge().unwrap();
    g.set(4.0);
    g.with(&["web"]).add(1.0);

    assert_eq!(b.flush(), vec!["edge.open.connections:5|g".to_string()]);
    assert_eq!(b.flush(), vec!["edge.open.connections:5|g".to_string()]);
}

#[test]
fn timings_use_milliseconds_and_drain() {
    let b = backend();
    let h = b.entry_point_req_duration_histogram().unwrap();
    h.observe(12.0);
    h.observe_from_start(Instant::now() + Duration::from_secs(5));

    let lines = b.flush();
    assert_eq!(
        lines,
        vec![
            "edge.entrypoint.request.duration:12|ms".to_string(),
            "edge.entrypoint.request.duration:0|ms".to_string(),
        ]
    );
    assert!(b.flush().is_empty());
}

#[test]
fn flush_orders_counters_gauges_timings() {
    let b = backend();
    b.router_req_duration_histogram().unwrap().observe(1.0);
    b.last_config_reload_success_gauge().unwrap().set(1700000000.0);
    b.service_retries_counter().unwrap().add(1.0);
    b.config_reloads_counter().unwrap().add(1.0);

    assert_eq!(
        b.flush(),
        vec![
            "edge.config.reload.total:1|c".to_string(),
            "edge.service.retries.total:1|c".to_string(),
            "edge.config.reload.lastSuccessTimestamp:1700000000|g".to_string(),
            "edge.router.request.duration:1|ms".to_string(),
        ]
    );
}

#[test]
fn unsupported_metrics_are_absent() {
    let b = backend();
    assert!(b.tls_certs_not_after_timestamp_gauge().is_none());
    assert!(b.entry_point_reqs_tls_counter().is_none());
    assert!(b.entry_point_reqs_bytes_counter().is_none());
    assert!(b.router_resps_bytes_counter().is_none());
    assert!(b.service_reqs_tls_counter().is_none());
    assert!(b.service_resps_bytes_counter().is_none());
}

#[test]
fn labels_are_not_checked() {
    let b = backend();
    assert_eq!(b.service_reqs_counter().unwrap().label_arity(), None);
    assert_eq!(b.service_server_up_gauge().unwrap().label_arity(), None);
}

#[test]
fn disabled_scope_reports_absent() {
    let mut opts = PushOptions::new("edge");
    opts.scopes = Scopes {
        entrypoints: true,
        routers: false,
        services: true,
    };
    let b = PushBackend::new(opts).unwrap();
    assert!(b.router_reqs_counter().is_none());
    assert!(b.router_req_duration_histogram().is_none());
    assert!(b.entry_point_reqs_counter().is_some());
}

#[test]
fn pending_timings_are_capped_per_key() {
    let mut opts = PushOptions::new("edge");
    opts.max_pending_timings = 3;
    let b = PushBackend::new(opts).unwrap();
    let h = b.service_req_duration_histogram().unwrap();

    for i in 0..100_000 {
        h.with(&["api"]).observe(f64::from(i % 7));
    }
    b.router_req_duration_histogram().unwrap().observe(9.0);

    assert_eq!(
        b.flush(),
        vec![
            "edge.service.request.duration.dropped:99997|c".to_string(),
            "edge.router.request.duration:9|ms".to_string(),
            "edge.service.request.duration:0|ms".to_string(),
            "edge.service.request.duration:1|ms".to_string(),
            "edge.service.request.duration:2|ms".to_string(),
        ]
    );

    // the cap applies again after a drain
    h.observe(4.0);
    assert_eq!(b.flush(), vec!["edge.service.request.duration:4|ms".to_string()]);
}

#[test]
fn default_cap_bounds_a_long_run() {
    let b = backend();
    let h = b.entry_point_req_duration_histogram().unwrap();
    for _ in 0..10_000 {
        h.observe(1.0);
    }

    let lines = b.flush();
    assert_eq!(lines.len(), DEFAULT_MAX_PENDING_TIMINGS + 1);
    assert_eq!(
        lines[0],
        format!("edge.entrypoint.request.duration.dropped:{}|c", 10_000 - DEFAULT_MAX_PENDING_TIMINGS)
    );
}

#[test]
fn zero_timing_cap_fails_construction() {
    let mut opts = PushOptions::new("edge");
    opts.max_pending_timings = 0;
    let err = PushBackend::new(opts).err().expect("must fail");
    assert_eq!(err.code(), "BAD_CONFIG");
}

#[test]
fn handles_share_one_key_across_bindings() {
    let b = backend();
    let c = b.service_retries_counter().unwrap();
    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..250 {
                    c.with(&["api"]).add(1.0);
                }
            });
        }
    });
    assert_eq!(b.flush(), vec!["edge.service.retries.total:1000|c".to_string()]);
}
