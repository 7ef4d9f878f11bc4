//! # Custom Resource Definitions
//!
//! CRD types for the Workshop Provisioner.
//!
//! ## Module Structure
//!
//! - `spec.rs` - The `WorkshopAttendee` resource and its spec
//! - `status.rs` - Status block owned by the controller (phase, children, kubeconfig)

mod spec;
mod status;

// Re-export all public types
pub use spec::{WorkshopAttendee, WorkshopAttendeeSpec};
pub use status::{AttendeePhase, WorkshopAttendeeStatus};
