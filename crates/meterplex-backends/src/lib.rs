//! meterplex reference backends, configuration, and startup wiring.
//!
//! The core crate only knows how to compose backends. This crate decides which
//! backends exist (from a strict YAML config), defines their metric names and
//! label schemas, and hands the composed registry to the rest of the process.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod backend;
pub mod config;
pub mod stack;

pub use backend::exposition::{ExpositionBackend, ExpositionOptions};
pub use backend::push::{PushBackend, PushOptions};
pub use backend::Scopes;
pub use stack::MetricsStack;
