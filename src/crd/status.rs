//! # WorkshopAttendee Status
//!
//! Status types owned exclusively by the controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Overall provisioning phase of an attendee
///
/// An absent phase (`None` in the status) means the attendee has never been
/// reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema)]
pub enum AttendeePhase {
    /// At least one child resource was (re)created and has not been confirmed since
    Creating,
    /// Every child resource was found present and the kubeconfig is published
    Ready,
    /// Deletion was requested; children are being torn down
    Deleting,
}

impl AttendeePhase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendeePhase::Creating => "Creating",
            AttendeePhase::Ready => "Ready",
            AttendeePhase::Deleting => "Deleting",
        }
    }
}

impl fmt::Display for AttendeePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of the WorkshopAttendee resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkshopAttendeeStatus {
    /// Current overall state of provisioning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<AttendeePhase>,
    /// Address the last completion notification was sent to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notified: Option<String>,
    /// Namespace provisioned for the attendee
    /// Recorded before any child is created and used for teardown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Time each child resource was last created, keyed by child
    /// Examples: "namespace", "serviceaccount", "deployment:app1"
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, DateTime<Utc>>,
    /// kubectl config granting the attendee access to its namespace
    /// Only set once every child resource is present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,
    /// Last error that exhausted the controller's retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When `last_error` was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_time: Option<DateTime<Utc>>,
}

impl WorkshopAttendeeStatus {
    /// Same status with the error stamp removed
    #[must_use]
    pub fn without_error_stamp(&self) -> Self {
        Self {
            last_error: None,
            last_error_time: None,
            ..self.clone()
        }
    }
}
