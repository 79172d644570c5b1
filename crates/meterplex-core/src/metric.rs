//! Metric capabilities every backend instance exposes.
//!
//! Binding (`with`, `with_headers`) never mutates the receiver: it returns a
//! fresh instance carrying the bound label values. Two callers binding different
//! label sets on the same shared instance therefore never see each other's values.
//!
//! `label_arity` lets a backend declare how many label values its schema takes.
//! `None` means the backend does not check labels at all.

use std::sync::Arc;
use std::time::Instant;

/// Monotonic counter.
pub trait Counter: Send + Sync {
    fn with(&self, label_values: &[&str]) -> Arc<dyn Counter>;
    fn add(&self, delta: f64);

    fn label_arity(&self) -> Option<usize> {
        None
    }
}

/// Settable numeric state.
pub trait Gauge: Send + Sync {
    fn with(&self, label_values: &[&str]) -> Arc<dyn Gauge>;
    fn set(&self, value: f64);
    fn add(&self, delta: f64);

    fn label_arity(&self) -> Option<usize> {
        None
    }
}

/// Distribution of observed values.
pub trait Histogram: Send + Sync {
    fn with(&self, label_values: &[&str]) -> Arc<dyn Histogram>;

    /// Bind label values plus request headers. Backends without header labels
    /// ignore `headers`.
    fn with_headers(&self, headers: &[(&str, &str)], label_values: &[&str]) -> Arc<dyn Histogram> {
        let _ = headers;
        self.with(label_values)
    }

    fn observe(&self, value: f64);

    fn label_arity(&self) -> Option<usize> {
        None
    }
}

/// Counter that can additionally derive label values from request headers.
pub trait CounterWithHeaders: Send + Sync {
    fn with(&self, label_values: &[&str]) -> Arc<dyn CounterWithHeaders>;

    /// Bind label values plus request headers. Backends without header labels
    /// ignore `headers`.
    fn with_headers(
        &self,
        headers: &[(&str, &str)],
        label_values: &[&str],
    ) -> Arc<dyn CounterWithHeaders> {
        let _ = headers;
        self.with(label_values)
    }

    fn add(&self, delta: f64);

    fn label_arity(&self) -> Option<usize> {
        None
    }
}

/// Histogram with a fixed time unit, so callers can record a duration from a
/// start instant without converting it themselves.
pub trait ScalableHistogram: Send + Sync {
    fn with(&self, label_values: &[&str]) -> Arc<dyn ScalableHistogram>;

    fn with_headers(
        &self,
        headers: &[(&str, &str)],
        label_values: &[&str],
    ) -> Arc<dyn ScalableHistogram> {
        let _ = headers;
        self.with(label_values)
    }

    /// Record `value` as is.
    fn observe(&self, value: f64);

    /// Record the time elapsed since `start`, expressed in the histogram's unit.
    fn observe_from_start(&self, start: Instant);

    fn label_arity(&self) -> Option<usize> {
        None
    }
}
