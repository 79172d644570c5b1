//! Concrete metric backends.
//!
//! - `exposition`: pull-style, renders Prometheus text format.
//! - `push`: accumulates statsd lines for the caller to ship.
//!
//! Both report unsupported or disabled metrics as absent, which the registry
//! composition filters out.

pub mod exposition;
pub mod push;

use std::sync::atomic::{AtomicU64, Ordering};

/// Which request scopes a backend instruments.
///
/// A disabled scope makes every accessor of that scope report absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scopes {
    pub entrypoints: bool,
    pub routers: bool,
    pub services: bool,
}

impl Scopes {
    pub fn all() -> Self {
        Self {
            entrypoints: true,
            routers: true,
            services: true,
        }
    }
}

impl Default for Scopes {
    fn default() -> Self {
        Self::all()
    }
}

/// f64 stored as bits in an `AtomicU64`.
#[derive(Debug, Default)]
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn set(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn add(&self, delta: f64) {
        // fetch_update only fails when the closure returns None
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }

    /// Reset to zero, returning the previous value.
    pub(crate) fn take(&self) -> f64 {
        f64::from_bits(self.0.swap(0f64.to_bits(), Ordering::Relaxed))
    }
}
