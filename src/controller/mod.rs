//! # Controller
//!
//! Attendee-specific controller logic.
//!
//! - `backoff`: Conflict retry schedule for optimistic-concurrency writes
//! - `reconciler`: Attendee provisioning and teardown
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod reconciler;
pub mod server;
