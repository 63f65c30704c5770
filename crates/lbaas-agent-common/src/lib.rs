//! Common infrastructure for the LBaaS agent manager.
//!
//! This crate provides what the agent daemon and its test tooling share:
//!
//! - [`types`]: Deployed objects, agent identity, FDB entries and records
//! - [`source`]: Traits for the device driver, the control-plane client and
//!   the L2 population listener
//! - [`error`]: Error types for agent operations
//!
//! # Architecture
//!
//! The agent manager sits between two independently updated views:
//!
//! 1. The managed device reports what is actually deployed
//! 2. The control plane reports what should exist and who is authoritative
//! 3. The agent purges what the device has but the control plane forgot
//! 4. Learned forwarding entries are pushed into the device's tunnels

pub mod error;
pub mod source;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{AgentError, AgentResult};
pub use source::{
    ControlPlaneStateSource, DeviceStateSource, DynControlPlaneStateSource,
    DynDeviceStateSource, DynL2PopulationListener, L2PopulationListener,
};
pub use types::{
    AgentIdentity, ArpEntry, ClusterwideAgent, DeployedObject, DeployedObjects, FdbEntries,
    FdbEntry, FdbRecord, FdbRecordChange, ObjectKind, PoolMember, PortBinding, RequestContext,
    FLOODING_MAC, PROVISIONING_STATUS_UNKNOWN,
};
