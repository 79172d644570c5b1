//! Exposition backend rendering and label handling.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use meterplex_backends::{ExpositionBackend, ExpositionOptions, Scopes};
use meterplex_core::{Counter, CounterWithHeaders, Gauge, MetricsBackend, ScalableHistogram};

fn backend() -> ExpositionBackend {
    ExpositionBackend::new(ExpositionOptions::new("edge")).unwrap()
}

#[test]
fn zero_unit_fails_construction() {
    let mut opts = ExpositionOptions::new("edge");
    opts.unit = Duration::ZERO;
    let err = ExpositionBackend::new(opts).err().expect("must fail");
    assert_eq!(err.code(), "INVALID_UNIT");
}

#[test]
fn empty_backend_renders_nothing() {
    assert_eq!(backend().render(), "");
}

#[test]
fn counter_renders_with_prefix_and_labels() {
    let b = backend();
    let c = b.entry_point_reqs_counter().unwrap();
    c.with(&["200", "GET", "http", "web"]).add(1.0);
    c.with(&["200", "GET", "http", "web"]).add(2.0);

    let out = b.render();
    assert!(out.contains("# TYPE edge_entrypoint_requests_total counter"), "{out}");
    assert!(
        out.contains(
            "edge_entrypoint_requests_total{code=\"200\",method=\"GET\",protocol=\"http\",entrypoint=\"web\"} 3"
        ),
        "{out}"
    );
}

#[test]
fn labelless_counter_renders_without_braces() {
    let b = backend();
    b.config_reloads_counter().unwrap().add(1.0);
    assert!(b.render().contains("\nedge_config_reloads_total 1\n"));
}

#[test]
fn negative_counter_delta_is_ignored() {
    let b = backend();
    let c = b.config_reloads_counter().unwrap();
    c.add(2.0);
    c.add(-1.0);
    assert!(b.render().contains("edge_config_reloads_total 2"));
}

#[test]
fn missing_label_values_render_empty_and_extras_are_dropped() {
    let b = backend();
    b.service_retries_counter().unwrap().add(1.0);
    b.service_retries_counter()
        .unwrap()
        .with(&["api", "unexpected"])
        .add(1.0);

    let out = b.render();
    assert!(out.contains("edge_service_retries_total{service=\"\"} 1"), "{out}");
    assert!(out.contains("edge_service_retries_total{service=\"api\"} 1"), "{out}");
    assert!(!out.contains("unexpected"));
}

#[test]
fn gauges_set_and_add() {
    let b = backend();
    let g = b.open_connections_gauge().unwrap().with(&["web", "TCP"]);
    g.set(5.0);
    g.add(-2.0);

    let out = b.render();
    assert!(out.contains("# TYPE edge_open_connections gauge"));
    assert!(out.contains("edge_open_connections{entrypoint=\"web\",protocol=\"TCP\"} 3"), "{out}");
}

#[test]
fn histogram_buckets_are_cumulative() {
    let b = backend();
    let h = b.service_req_duration_histogram().unwrap().with(&["200", "GET", "http", "api"]);
    h.observe(0.25);
    h.observe(2.0);
    h.observe(10.0);

    let out = b.render();
    let labels = "code=\"200\",method=\"GET\",protocol=\"http\",service=\"api\"";
    for (le, n) in [("0.1", 0), ("0.3", 1), ("1.2", 1), ("5", 2), ("+Inf", 3)] {
        let line = format!("edge_service_request_duration_seconds_bucket{{{labels},le=\"{le}\"}} {n}");
        assert!(out.contains(&line), "missing {line}\n{out}");
    }
    assert!(out.contains(&format!("edge_service_request_duration_seconds_sum{{{labels}}} 12.25")));
    assert!(out.contains(&format!("edge_service_request_duration_seconds_count{{{labels}}} 3")));
}

#[test]
fn histogram_from_start_uses_configured_unit() {
    let mut opts = ExpositionOptions::new("edge");
    opts.unit = Duration::from_millis(1);
    opts.buckets = vec![100.0, 1000.0];
    let b = ExpositionBackend::new(opts).unwrap();

    b.router_req_duration_histogram()
        .unwrap()
        .observe_from_start(Instant::now() - Duration::from_millis(300));

    let out = b.render();
    assert!(out.contains("le=\"100\"} 0"), "{out}");
    assert!(out.contains("le=\"1000\"} 1"), "{out}");
}

#[test]
fn header_labels_are_read_case_insensitively() {
    let mut opts = ExpositionOptions::new("edge");
    opts.header_labels = BTreeMap::from([("useragent".to_string(), "User-Agent".to_string())]);
    let b = ExpositionBackend::new(opts).unwrap();

    let c = b.router_reqs_counter().unwrap();
    c.with_headers(&[("user-agent", "curl/8")], &["200", "GET", "http", "r1", "s1"])
        .add(1.0);
    c.with(&["404", "GET", "http", "r1", "s1"]).add(1.0);

    let out = b.render();
    assert!(
        out.contains("edge_router_requests_total{code=\"200\",method=\"GET\",protocol=\"http\",router=\"r1\",service=\"s1\",useragent=\"curl/8\"} 1"),
        "{out}"
    );
    assert!(out.contains("code=\"404\",method=\"GET\",protocol=\"http\",router=\"r1\",service=\"s1\",useragent=\"\"} 1"), "{out}");
}

#[test]
fn header_labels_only_apply_to_request_counters() {
    let mut opts = ExpositionOptions::new("edge");
    opts.header_labels = BTreeMap::from([("host".to_string(), "Host".to_string())]);
    let b = ExpositionBackend::new(opts).unwrap();

    b.entry_point_reqs_bytes_counter()
        .unwrap()
        .with_headers(&[("Host", "a.example")], &["200", "GET", "http", "web"])
        .add(100.0);

    let out = b.render();
    assert!(out.contains("edge_entrypoint_requests_bytes_total{code=\"200\",method=\"GET\",protocol=\"http\",entrypoint=\"web\"} 100"), "{out}");
    assert!(!out.contains("a.example"));
}

#[test]
fn label_values_are_escaped() {
    let b = backend();
    b.service_retries_counter()
        .unwrap()
        .with(&["a\"b\\c\nd"])
        .add(1.0);
    assert!(b.render().contains(r#"service="a\"b\\c\nd""#));
}

#[test]
fn disabled_scopes_report_absent() {
    let mut opts = ExpositionOptions::new("edge");
    opts.scopes = Scopes {
        entrypoints: false,
        routers: true,
        services: false,
    };
    let b = ExpositionBackend::new(opts).unwrap();

    assert!(b.entry_point_reqs_counter().is_none());
    assert!(b.entry_point_req_duration_histogram().is_none());
    assert!(b.router_reqs_counter().is_some());
    assert!(b.service_retries_counter().is_none());
    assert!(b.service_server_up_gauge().is_none());
    assert!(b.config_reloads_counter().is_some());
}

#[test]
fn declares_label_arity_per_metric() {
    let b = backend();
    assert_eq!(b.config_reloads_counter().unwrap().label_arity(), Some(0));
    assert_eq!(b.tls_certs_not_after_timestamp_gauge().unwrap().label_arity(), Some(3));
    assert_eq!(b.router_reqs_counter().unwrap().label_arity(), Some(5));
    assert_eq!(b.service_req_duration_histogram().unwrap().label_arity(), Some(4));
}
