//! # CRD Generator
//!
//! Prints the `WorkshopAttendee` CustomResourceDefinition as YAML.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/workshopattendee.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::CustomResourceExt;
use workshop_provisioner::crd::WorkshopAttendee;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&WorkshopAttendee::crd())?);
    Ok(())
}
