//! TableCloth - disposable Windows Sandbox sessions for untrusted sites
//!
//! This crate provides:
//! - Sandbox profile composition and folder mapping
//! - Single-session sandbox launch and supervision
//! - Child process supervision with cancellation
//! - Local reverse proxy in front of the control-plane server
//! - Health checks with a decaying poll schedule

pub mod concurrency;
pub mod config;
pub mod paths;
pub mod process;
pub mod proxy;
pub mod sandbox;
pub mod status;

pub use config::Config;
