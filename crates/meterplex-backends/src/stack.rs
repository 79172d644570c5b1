//! Startup wiring: config -> backends -> composed registry.
//!
//! Built once, before traffic is admitted. Any failure here (bad unit, label
//! schema conflict) is returned to the caller so the process refuses to start.

use std::sync::Arc;

use meterplex_core::error::Result;
use meterplex_core::{MetricsBackend, Registry};

use crate::backend::exposition::{ExpositionBackend, ExpositionOptions};
use crate::backend::push::{PushBackend, PushOptions};
use crate::config::{BackendKind, MetricsConfig};

pub struct MetricsStack {
    registry: Registry,
    exposition: Vec<Arc<ExpositionBackend>>,
    push: Vec<Arc<PushBackend>>,
}

impl MetricsStack {
    /// Validate `cfg`, build every configured backend in config order, and
    /// compose them.
    pub fn new(cfg: &MetricsConfig) -> Result<Self> {
        cfg.validate()?;

        let mut backends: Vec<Arc<dyn MetricsBackend>> = Vec::with_capacity(cfg.backends.len());
        let mut exposition = Vec::new();
        let mut push = Vec::new();

        for (index, b) in cfg.backends.iter().enumerate() {
            match b.kind {
                BackendKind::Exposition => {
                    let backend = Arc::new(ExpositionBackend::new(ExpositionOptions::from_config(b)?)?);
                    exposition.push(Arc::clone(&backend));
                    backends.push(backend);
                }
                BackendKind::Push => {
                    let backend = Arc::new(PushBackend::new(PushOptions::from_config(b)?)?);
                    push.push(Arc::clone(&backend));
                    backends.push(backend);
                }
            }
            tracing::debug!(index, kind = ?b.kind, prefix = %b.prefix, "metrics backend built");
        }

        let registry = Registry::compose(&backends)?;

        Ok(Self {
            registry,
            exposition,
            push,
        })
    }

    /// Stack with no backends at all.
    pub fn disabled() -> Self {
        Self {
            registry: Registry::void(),
            exposition: Vec::new(),
            push: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Concatenated text exposition of every exposition backend.
    pub fn render(&self) -> String {
        self.exposition.iter().map(|b| b.render()).collect()
    }

    /// Drain every push backend, in config order.
    pub fn flush(&self) -> Vec<String> {
        self.push.iter().flat_map(|b| b.flush()).collect()
    }
}
