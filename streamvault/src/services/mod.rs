//! Service layer: wiring and lifecycle of the application services.

pub mod container;

pub use container::{ServiceContainer, ServiceStats};
