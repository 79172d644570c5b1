//! Registry composition: filtering, ordering, enablement flags, arity checks.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Instant;

use meterplex_core::{Counter, CounterWithHeaders, Gauge, MetricsBackend, Registry, ScalableHistogram};

use recorder::{init_tracing, Log, RecordingBackend, ALL_METRICS};

/// Drive every accessor through every operation it offers.
fn exercise(registry: &Registry) {
    let h: &[(&str, &str)] = &[("User-Agent", "curl")];

    registry.config_reloads_counter().with(&[]).add(1.0);
    registry.last_config_reload_success_gauge().set(1.0);
    registry.open_connections_gauge().with(&["web", "TCP"]).add(1.0);
    registry.tls_certs_not_after_timestamp_gauge().with(&["cn", "1", "a.example"]).set(2.0);

    registry.entry_point_reqs_counter().with_headers(h, &["200", "GET", "http", "web"]).add(1.0);
    registry.entry_point_reqs_tls_counter().with(&["1.3", "aes", "web"]).add(1.0);
    let ep = registry.entry_point_req_duration_histogram().with(&["200", "GET", "http", "web"]);
    ep.observe(0.5);
    ep.observe_from_start(Instant::now());
    registry.entry_point_reqs_bytes_counter().with(&[]).add(10.0);
    registry.entry_point_resps_bytes_counter().add(20.0);

    registry.router_reqs_counter().with_headers(h, &["200"]).add(1.0);
    registry.router_reqs_tls_counter().add(1.0);
    registry.router_req_duration_histogram().with_headers(h, &[]).observe(0.1);
    registry.router_reqs_bytes_counter().add(1.0);
    registry.router_resps_bytes_counter().add(1.0);

    registry.service_reqs_counter().add(1.0);
    registry.service_reqs_tls_counter().add(1.0);
    registry.service_req_duration_histogram().observe_from_start(Instant::now());
    registry.service_retries_counter().with(&["svc"]).add(1.0);
    registry.service_server_up_gauge().with(&["svc", "http://10.0.0.1"]).set(1.0);
    registry.service_reqs_bytes_counter().add(1.0);
    registry.service_resps_bytes_counter().add(1.0);
}

#[test]
fn void_registry_is_callable_and_disabled() {
    let registry = Registry::void();
    assert!(!registry.is_ep_enabled());
    assert!(!registry.is_router_enabled());
    assert!(!registry.is_svc_enabled());
    exercise(&registry);
}

#[test]
fn compose_empty_is_void() {
    let registry = Registry::compose(&[]).expect("empty compose");
    assert!(!registry.is_ep_enabled());
    assert!(!registry.is_router_enabled());
    assert!(!registry.is_svc_enabled());
    exercise(&registry);
}

#[test]
fn backends_supporting_nothing_yield_inert_surface() {
    let log = Log::default();
    let backends = vec![
        RecordingBackend::new("a", &[], &log).into_arc(),
        RecordingBackend::new("b", &[], &log).into_arc(),
    ];
    let registry = Registry::compose(&backends).unwrap();

    exercise(&registry);
    assert!(log.ops().is_empty());
    assert!(!registry.is_ep_enabled());
    assert!(!registry.is_router_enabled());
    assert!(!registry.is_svc_enabled());
}

#[test]
fn every_accessor_reaches_every_backend_once() {
    init_tracing();
    let log = Log::default();
    let backends = vec![
        RecordingBackend::full("a", &log).into_arc(),
        RecordingBackend::full("b", &log).into_arc(),
    ];
    let registry = Registry::compose(&backends).unwrap();
    exercise(&registry);

    let a = log.for_backend("a");
    let b = log.for_backend("b");
    assert_eq!(a.len(), b.len());
    for metric in ALL_METRICS {
        assert!(a.iter().any(|o| o.metric == metric), "a missed {metric}");
        assert!(b.iter().any(|o| o.metric == metric), "b missed {metric}");
    }

    // Each logical operation is forwarded to "a" then "b".
    let ops = log.ops();
    for pair in ops.chunks(2) {
        assert_eq!(pair[0].backend, "a");
        assert_eq!(pair[1].backend, "b");
        assert_eq!(pair[0].metric, pair[1].metric);
        assert_eq!(pair[0].labels, pair[1].labels);
    }
}

#[test]
fn only_entrypoint_counter_enables_entrypoint_only() {
    let log = Log::default();
    let backends = vec![RecordingBackend::new("r", &["entry_point_reqs_counter"], &log).into_arc()];
    let registry = Registry::compose(&backends).unwrap();

    assert!(registry.is_ep_enabled());
    assert!(!registry.is_router_enabled());
    assert!(!registry.is_svc_enabled());
}

#[test]
fn duration_histogram_alone_enables_scope() {
    let log = Log::default();
    let ep = vec![RecordingBackend::new("r", &["entry_point_req_duration_histogram"], &log).into_arc()];
    assert!(Registry::compose(&ep).unwrap().is_ep_enabled());

    let router = vec![RecordingBackend::new("r", &["router_req_duration_histogram"], &log).into_arc()];
    let registry = Registry::compose(&router).unwrap();
    assert!(registry.is_router_enabled());
    assert!(!registry.is_ep_enabled());
}

#[test]
fn any_service_metric_enables_services() {
    let log = Log::default();
    for metric in [
        "service_reqs_counter",
        "service_req_duration_histogram",
        "service_retries_counter",
        "service_server_up_gauge",
    ] {
        let backends = vec![RecordingBackend::new("r", &[metric], &log).into_arc()];
        let registry = Registry::compose(&backends).unwrap();
        assert!(registry.is_svc_enabled(), "{metric} should enable services");
        assert!(!registry.is_ep_enabled());
        assert!(!registry.is_router_enabled());
    }
}

#[test]
fn secondary_metrics_do_not_enable_scopes() {
    let log = Log::default();
    let backends = vec![RecordingBackend::new(
        "r",
        &[
            "entry_point_reqs_tls_counter",
            "entry_point_reqs_bytes_counter",
            "router_resps_bytes_counter",
            "service_reqs_tls_counter",
            "service_resps_bytes_counter",
        ],
        &log,
    )
    .into_arc()];
    let registry = Registry::compose(&backends).unwrap();

    assert!(!registry.is_ep_enabled());
    assert!(!registry.is_router_enabled());
    assert!(!registry.is_svc_enabled());
}

#[test]
fn absent_backend_never_receives_operations() {
    let log = Log::default();
    let backends = vec![
        RecordingBackend::new("r1", &["service_retries_counter"], &log).into_arc(),
        RecordingBackend::new("r2", &["service_reqs_counter"], &log).into_arc(),
    ];
    let registry = Registry::compose(&backends).unwrap();

    registry.service_retries_counter().add(1.0);

    let ops = log.ops();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].backend, "r1");
    assert_eq!(ops[0].metric, "service_retries_counter");
    assert!(log.for_backend("r2").is_empty());
}

#[test]
fn absence_does_not_reorder_remaining_backends() {
    let log = Log::default();
    let backends = vec![
        RecordingBackend::new("first", &["open_connections_gauge"], &log).into_arc(),
        RecordingBackend::new("middle", &[], &log).into_arc(),
        RecordingBackend::new("last", &["open_connections_gauge"], &log).into_arc(),
    ];
    let registry = Registry::compose(&backends).unwrap();

    registry.open_connections_gauge().with(&["web", "TCP"]).set(3.0);

    let ops = log.ops();
    let order: Vec<_> = ops.iter().map(|o| o.backend).collect();
    assert_eq!(order, vec!["first", "last"]);
    assert!(ops.iter().all(|o| o.op == "set" && o.value == 3.0));
    assert!(ops.iter().all(|o| o.labels == vec!["web".to_string(), "TCP".to_string()]));
}

#[test]
fn conflicting_label_arity_fails_composition() {
    init_tracing();
    let log = Log::default();
    let backends: Vec<Arc<dyn MetricsBackend>> = vec![
        Arc::new(RecordingBackend::new("a", &["service_retries_counter"], &log).with_arity(1)),
        Arc::new(RecordingBackend::new("b", &["service_retries_counter"], &log).with_arity(2)),
    ];

    let err = Registry::compose(&backends).expect_err("must fail");
    assert_eq!(err.code(), "LABEL_ARITY_MISMATCH");
    assert!(err.to_string().contains("service_retries_counter"));
}

#[test]
fn undeclared_arity_never_conflicts() {
    let log = Log::default();
    let backends: Vec<Arc<dyn MetricsBackend>> = vec![
        Arc::new(RecordingBackend::new("a", &["service_retries_counter"], &log).with_arity(1)),
        Arc::new(RecordingBackend::new("b", &["service_retries_counter"], &log)),
        Arc::new(RecordingBackend::new("c", &["service_retries_counter"], &log).with_arity(1)),
    ];

    let registry = Registry::compose(&backends).unwrap();
    registry.service_retries_counter().with(&["svc"]).add(1.0);
    assert_eq!(log.ops().len(), 3);
}

#[test]
fn arity_is_checked_per_metric() {
    let log = Log::default();
    let backends: Vec<Arc<dyn MetricsBackend>> = vec![
        Arc::new(RecordingBackend::new("a", &["service_retries_counter"], &log).with_arity(1)),
        Arc::new(RecordingBackend::new("b", &["router_reqs_counter"], &log).with_arity(5)),
    ];
    assert!(Registry::compose(&backends).is_ok());
}
