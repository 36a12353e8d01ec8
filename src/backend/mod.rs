//! GPU access layer.
//!
//! [`traits`] and [`types`] define what the render graph records against;
//! [`wgpu_backend`] is the implementation that actually talks to a GPU.
//! Tests run against an in-memory recording backend instead.

pub mod traits;
pub mod types;
pub mod wgpu_backend;

#[cfg(test)]
pub(crate) mod test_backend;

pub use traits::*;
pub use types::*;
