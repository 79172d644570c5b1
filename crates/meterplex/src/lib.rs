//! meterplex: one metrics registry over any number of backends.
//!
//! - [`core`]: the metric traits, fan-out wrappers, `Registry::compose` and
//!   `Registry::void`. Request-handling code only ever sees a `Registry`.
//! - [`backends`]: the exposition (Prometheus text) and push (statsd lines)
//!   backends, the YAML config loader, and `MetricsStack`, which builds the
//!   configured backends at startup and hands out the composed registry.

pub mod core {
    pub use meterplex_core::*;
}

pub mod backends {
    pub use meterplex_backends::*;
}
