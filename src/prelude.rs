//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ## Usage
//!
//! ```rust
//! use workshop_provisioner::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Engine
pub use crate::runtime::{Controller, Reconcile, RetryExhausted, RuntimeSettings, WorkQueue};

// Store seam
pub use crate::store::{KubeStore, MemoryStore, ObjectKey, ObjectStore, StoreError, WatchEvent};

// Reconciler types
pub use crate::controller::reconciler::{
    LogNotifier, Notifier, NotifyError, Reconciler, ReconcilerError, Stores,
};

// Config types
pub use crate::config::{ConfigHandle, ConfigPublisher, ControllerConfig};
