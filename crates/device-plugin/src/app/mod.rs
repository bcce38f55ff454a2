//! Application module
//!
//! Top-level lifecycle of the device plugin process: wiring, signal handling
//! and shutdown.

pub mod core;
pub mod signals;

pub use self::core::Application;
