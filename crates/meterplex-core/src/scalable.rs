//! Time-scaled histograms.
//!
//! `HistogramWithScale` pairs a backend histogram with a unit so that
//! `observe_from_start` records elapsed time as a multiple of that unit
//! (seconds for an exposition backend, milliseconds for a push backend).
//! The unit is validated once, at construction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{MeterError, Result};
use crate::fanout::declared_arity;
use crate::metric::{Histogram, ScalableHistogram};

/// Convert a signed nanosecond count into a histogram unit.
///
/// Zero and negative counts are rejected with `InvalidUnit`.
pub fn unit_from_nanos(nanos: i64) -> Result<Duration> {
    if nanos <= 0 {
        return Err(MeterError::InvalidUnit(format!(
            "{nanos}ns (unit must be positive)"
        )));
    }
    Ok(Duration::from_nanos(nanos.unsigned_abs()))
}

/// A histogram plus the time unit `observe_from_start` divides elapsed time by.
pub struct HistogramWithScale {
    histogram: Arc<dyn Histogram>,
    unit: Duration,
}

impl HistogramWithScale {
    /// Fails with `InvalidUnit` for a zero unit.
    pub fn new(histogram: Arc<dyn Histogram>, unit: Duration) -> Result<Self> {
        if unit.is_zero() {
            return Err(MeterError::InvalidUnit(
                "0ns (unit must be positive)".into(),
            ));
        }
        Ok(Self { histogram, unit })
    }

    /// Unit elapsed time is expressed in.
    pub fn unit(&self) -> Duration {
        self.unit
    }

    fn bound(&self, histogram: Arc<dyn Histogram>) -> Arc<dyn ScalableHistogram> {
        // unit was validated when `self` was built
        Arc::new(Self {
            histogram,
            unit: self.unit,
        })
    }
}

impl ScalableHistogram for HistogramWithScale {
    fn with(&self, label_values: &[&str]) -> Arc<dyn ScalableHistogram> {
        self.bound(self.histogram.with(label_values))
    }

    fn with_headers(
        &self,
        headers: &[(&str, &str)],
        label_values: &[&str],
    ) -> Arc<dyn ScalableHistogram> {
        self.bound(self.histogram.with_headers(headers, label_values))
    }

    fn observe(&self, value: f64) {
        self.histogram.observe(value);
    }

    fn observe_from_start(&self, start: Instant) {
        // A start in the future saturates to zero elapsed.
        let elapsed = Instant::now().saturating_duration_since(start);
        let scaled = elapsed.as_nanos() as f64 / self.unit.as_nanos() as f64;
        self.histogram.observe(scaled.max(0.0));
    }

    fn label_arity(&self) -> Option<usize> {
        self.histogram.label_arity()
    }
}

/// Broadcasts both observation forms to every child histogram, in order.
#[derive(Clone, Default)]
pub struct MultiScalableHistogram(Vec<Arc<dyn ScalableHistogram>>);

impl MultiScalableHistogram {
    /// Children receive observations in the order given.
    pub fn new(children: Vec<Arc<dyn ScalableHistogram>>) -> Self {
        Self(children)
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when observations go nowhere.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl ScalableHistogram for MultiScalableHistogram {
    fn with(&self, label_values: &[&str]) -> Arc<dyn ScalableHistogram> {
        Arc::new(Self(self.0.iter().map(|h| h.with(label_values)).collect()))
    }

    fn with_headers(
        &self,
        headers: &[(&str, &str)],
        label_values: &[&str],
    ) -> Arc<dyn ScalableHistogram> {
        Arc::new(Self(
            self.0
                .iter()
                .map(|h| h.with_headers(headers, label_values))
                .collect(),
        ))
    }

    fn observe(&self, value: f64) {
        for h in &self.0 {
            h.observe(value);
        }
    }

    fn observe_from_start(&self, start: Instant) {
        for h in &self.0 {
            h.observe_from_start(start);
        }
    }

    fn label_arity(&self) -> Option<usize> {
        declared_arity(self.0.iter().map(|h| h.label_arity()))
    }
}
