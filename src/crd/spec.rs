//! # WorkshopAttendee Spec
//!
//! Main CRD specification.

use serde::{Deserialize, Serialize};

/// WorkshopAttendee Custom Resource Definition
///
/// One attendee of a workshop. The controller provisions an isolated namespace,
/// a ServiceAccount with a token, a RoleBinding and a fixed set of workload
/// Deployments for every attendee, then publishes a ready-to-use kubeconfig in
/// the status and notifies the attendee.
///
/// # Example
///
/// ```yaml
/// apiVersion: provisioner.k8s.carsonoid.net/v1alpha1
/// kind: WorkshopAttendee
/// metadata:
///   name: jane
/// spec:
///   email: jane@example.com
/// ```
#[derive(
    kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, PartialEq, schemars::JsonSchema,
)]
#[kube(
    kind = "WorkshopAttendee",
    group = "provisioner.k8s.carsonoid.net",
    version = "v1alpha1",
    status = "crate::crd::WorkshopAttendeeStatus",
    shortname = "wa",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}, {"name":"Email", "type":"string", "jsonPath":".spec.email"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkshopAttendeeSpec {
    /// Address the access credentials are sent to once provisioning completes
    #[serde(default)]
    pub email: String,
}
