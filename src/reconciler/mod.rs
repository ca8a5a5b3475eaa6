//! Delivery reconciliation engine.
//!
//! - `core`: the `Reconciler` handle and its public operations
//! - `tasks`: supervised per-delivery tasks and their `*_once` steps
//! - `tests`: engine behaviour on a paused clock

pub mod core;
pub mod tasks;

pub use self::core::Reconciler;
