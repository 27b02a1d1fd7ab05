//! Request handlers for sync cycles.

mod cycle;

pub use cycle::*;
