//! Fan-out wrappers: one logical metric forwarding to an ordered list of children.
//!
//! Every mutating call reaches each child once, in construction order. A wrapper
//! with zero children is a valid no-op metric, which is what the void registry
//! hands out. The child list is immutable; binding builds a new wrapper.

use std::sync::Arc;

use crate::metric::{Counter, CounterWithHeaders, Gauge, Histogram};

/// First arity declared by any child.
pub(crate) fn declared_arity(arities: impl Iterator<Item = Option<usize>>) -> Option<usize> {
    arities.flatten().next()
}

/// Broadcasts every counter operation to its children, in order.
#[derive(Clone, Default)]
pub struct MultiCounter(Vec<Arc<dyn Counter>>);

impl MultiCounter {
    /// Children receive operations in the order given.
    pub fn new(children: Vec<Arc<dyn Counter>>) -> Self {
        Self(children)
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the no-op wrapper the void registry hands out.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Counter for MultiCounter {
    fn with(&self, label_values: &[&str]) -> Arc<dyn Counter> {
        Arc::new(Self(self.0.iter().map(|c| c.with(label_values)).collect()))
    }

    fn add(&self, delta: f64) {
        for c in &self.0 {
            c.add(delta);
        }
    }

    fn label_arity(&self) -> Option<usize> {
        declared_arity(self.0.iter().map(|c| c.label_arity()))
    }
}

/// Broadcasts every gauge operation to its children, in order.
#[derive(Clone, Default)]
pub struct MultiGauge(Vec<Arc<dyn Gauge>>);

impl MultiGauge {
    /// Children receive operations in the order given.
    pub fn new(children: Vec<Arc<dyn Gauge>>) -> Self {
        Self(children)
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the no-op wrapper the void registry hands out.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Gauge for MultiGauge {
    fn with(&self, label_values: &[&str]) -> Arc<dyn Gauge> {
        Arc::new(Self(self.0.iter().map(|g| g.with(label_values)).collect()))
    }

    fn set(&self, value: f64) {
        for g in &self.0 {
            g.set(value);
        }
    }

    fn add(&self, delta: f64) {
        for g in &self.0 {
            g.add(delta);
        }
    }

    fn label_arity(&self) -> Option<usize> {
        declared_arity(self.0.iter().map(|g| g.label_arity()))
    }
}

/// Broadcasts every histogram operation to its children, in order.
#[derive(Clone, Default)]
pub struct MultiHistogram(Vec<Arc<dyn Histogram>>);

impl MultiHistogram {
    /// Children receive operations in the order given.
    pub fn new(children: Vec<Arc<dyn Histogram>>) -> Self {
        Self(children)
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the no-op wrapper the void registry hands out.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Histogram for MultiHistogram {
    fn with(&self, label_values: &[&str]) -> Arc<dyn Histogram> {
        Arc::new(Self(self.0.iter().map(|h| h.with(label_values)).collect()))
    }

    fn with_headers(&self, headers: &[(&str, &str)], label_values: &[&str]) -> Arc<dyn Histogram> {
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

    fn label_arity(&self) -> Option<usize> {
        declared_arity(self.0.iter().map(|h| h.label_arity()))
    }
}

/// Broadcasts every header-aware counter operation to its children, in order.
#[derive(Clone, Default)]
pub struct MultiCounterWithHeaders(Vec<Arc<dyn CounterWithHeaders>>);

impl MultiCounterWithHeaders {
    /// Children receive operations in the order given.
    pub fn new(children: Vec<Arc<dyn CounterWithHeaders>>) -> Self {
        Self(children)
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the no-op wrapper the void registry hands out.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl CounterWithHeaders for MultiCounterWithHeaders {
    fn with(&self, label_values: &[&str]) -> Arc<dyn CounterWithHeaders> {
        Arc::new(Self(self.0.iter().map(|c| c.with(label_values)).collect()))
    }

    fn with_headers(
        &self,
        headers: &[(&str, &str)],
        label_values: &[&str],
    ) -> Arc<dyn CounterWithHeaders> {
        Arc::new(Self(
            self.0
                .iter()
                .map(|c| c.with_headers(headers, label_values))
                .collect(),
        ))
    }

    fn add(&self, delta: f64) {
        for c in &self.0 {
            c.add(delta);
        }
    }

    fn label_arity(&self) -> Option<usize> {
        declared_arity(self.0.iter().map(|c| c.label_arity()))
    }
}
