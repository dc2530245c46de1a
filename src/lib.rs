// Nexus Control - Ansible control-node integration
//
// Tracks playbook and inventory paths on managed hosts acting as Ansible
// control nodes, introspects inventories and discovers playbooks over a
// remote channel, and hands playbook runs to an external task scheduler.

pub mod config;
pub mod discover;
pub mod facade;
pub mod gateway;
pub mod hosts;
pub mod introspect;
pub mod output;
pub mod registry;
pub mod schedule;

#[cfg(test)]
mod testing;

pub use config::ControlNodeConfig;
pub use facade::{ControlNodeIntegration, SavePathRequest};
pub use gateway::{RemoteAgentGateway, RemoteChannel, RemoteOutcome};
pub use hosts::{Actor, HostDirectory, ManagedHost};
pub use output::{ControlNodeError, Failure, FailureKind, ResultJson};
pub use registry::{AnsiblePath, PathKind, PathRegistry};

/// Version of the Nexus Control tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::discover::{PlaybookNode, PlaybookTree};
    pub use crate::facade::{ControlNodeIntegration, SavePathRequest};
    pub use crate::hosts::{Actor, HostId};
    pub use crate::introspect::{InventoryNode, InventoryTree};
    pub use crate::output::{ControlNodeError, ResultJson};
    pub use crate::registry::{PathId, PathKind};
    pub use crate::schedule::{PlaybookRunRequest, TrackingId};
}
