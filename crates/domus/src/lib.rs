//! Domus - field bus controller
//!
//! This crate provides the controller application, including:
//! - Configuration loading (`domus.toml` plus environment overrides)
//! - The in-process loopback transport feeding the message router
//! - Point polling and write commands over arbitrated buses
//! - Station wiring and lifecycle

// Re-export core crates
pub use domus_bus;
pub use domus_dispatch;

// Configuration
pub mod config;

// Point polling and writes
pub mod points;

// Station wiring
pub mod station;

// Loopback transport
pub mod transport;
