//! Render Guard - sliding-window admission control
//!
//! This crate protects a stateless HTML rendering service from excessive
//! request volume. Each caller, identified by a validated site token or its
//! proxy-reported address, gets a per-endpoint budget of admissions within a
//! trailing time window. Denied callers receive a 429 with retry metadata and
//! produce at most one masked warning per hour.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;

pub use error::{GuardError, Result};
