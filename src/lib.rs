//! Workshop Provisioner Library
//!
//! This library provides the core functionality for the Workshop Provisioner:
//! a generic, level-triggered reconciliation engine and the `WorkshopAttendee`
//! reconciler built on top of it.
//!
//! ## Quick Start
//!
//! ```rust
//! use workshop_provisioner::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod cli;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod store;
