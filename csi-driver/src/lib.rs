//! Paravirtual Block Volume CSI Node Plugin Library
//!
//! Node side of a Kubernetes CSI driver for block volumes that a control
//! plane attaches to the VM out-of-band. The plugin finds the attached
//! device by its stable link, formats and mounts it to a staging path, and
//! bind mounts it into workload paths.
//!
//! This library provides:
//! - CSI Identity and Node service implementations
//! - Device resolution and mount table inspection
//! - Platform mount operations behind the [`platform::Mounter`] trait

/// CSI proto generated types
pub mod csi {
    tonic::include_proto!("csi.v1");
}

pub mod capability;
pub mod device;
pub mod endpoint;
pub mod error;
pub mod identity;
pub mod locks;
pub mod metrics;
pub mod mounts;
pub mod node;
pub mod platform;

pub use endpoint::Endpoint;
pub use error::{NodeError, Result};
pub use identity::IdentityService;
pub use node::{NodeConfig, NodeService};
