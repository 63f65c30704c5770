//! Contracts of the collaborators the agent manager drives.
//!
//! The device driver, the control-plane RPC client and the L2 population
//! notifier live outside this workspace. The agent manager only sees them
//! through these traits, so every call is awaited in sequence and any
//! retry or backoff is the implementor's business.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AgentResult;
use crate::types::{
    ArpEntry, ClusterwideAgent, DeployedObjects, FdbEntries, FdbRecord, FdbRecordChange,
    ObjectKind, PoolMember, RequestContext,
};

/// View of the managed device(s) through the device driver.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: the reconciliation timer and the
/// FDB notification path call into the same driver handle concurrently.
#[async_trait]
pub trait DeviceStateSource: Send + Sync {
    /// Lists every object of `kind` currently deployed, keyed by id.
    async fn list_deployed(&self, kind: ObjectKind) -> AgentResult<DeployedObjects>;

    /// Deletes one object from the device.
    async fn purge(
        &self,
        kind: ObjectKind,
        id: &str,
        tenant_id: &str,
        hostnames: &[String],
    ) -> AgentResult<()>;

    /// Saves the running device configuration.
    async fn backup_configuration(&self) -> AgentResult<()>;

    /// Removes tenant folders that no longer hold any load balancer.
    async fn purge_orphaned_folders(&self) -> AgentResult<()>;

    /// Removes nodes not used by any of the given members, per tenant.
    async fn purge_orphaned_nodes(
        &self,
        tenant_members: &HashMap<String, Vec<PoolMember>>,
    ) -> AgentResult<()>;

    /// Loads or creates the record and makes its endpoint match.
    async fn ensure_fdb_record(&self, record: &FdbRecord) -> AgentResult<FdbRecordChange>;

    /// Deletes the record if present.
    async fn remove_fdb_record(&self, record: &FdbRecord) -> AgentResult<()>;

    async fn ensure_arp_entry(&self, entry: &ArpEntry) -> AgentResult<()>;

    async fn remove_arp_entry(&self, entry: &ArpEntry) -> AgentResult<()>;
}

/// View of the control plane through its RPC client.
#[async_trait]
pub trait ControlPlaneStateSource: Send + Sync {
    /// Returns the agent registered as authoritative for the environment,
    /// or `None` when no agent is registered.
    async fn get_clusterwide_agent(
        &self,
        environment_prefix: &str,
        environment_group_number: u32,
    ) -> AgentResult<Option<ClusterwideAgent>>;

    /// Returns the provisioning status the control plane holds for each id.
    ///
    /// Ids the control plane no longer knows are reported as
    /// [`crate::PROVISIONING_STATUS_UNKNOWN`].
    async fn validate_state(
        &self,
        kind: ObjectKind,
        ids: &[String],
    ) -> AgentResult<HashMap<String, String>>;

    /// Returns the members of each pool.
    async fn get_pools_members(
        &self,
        pool_ids: &[String],
    ) -> AgentResult<HashMap<String, Vec<PoolMember>>>;
}

/// Downstream consumer of processed FDB entry sets.
#[async_trait]
pub trait L2PopulationListener: Send + Sync {
    async fn add_fdb_entries(&self, context: &RequestContext, entries: &FdbEntries)
        -> AgentResult<()>;

    async fn remove_fdb_entries(
        &self,
        context: &RequestContext,
        entries: &FdbEntries,
    ) -> AgentResult<()>;
}

/// Shared device driver handle.
pub type DynDeviceStateSource = Arc<dyn DeviceStateSource>;

/// Shared control-plane client handle.
pub type DynControlPlaneStateSource = Arc<dyn ControlPlaneStateSource>;

/// Shared L2 population listener handle.
pub type DynL2PopulationListener = Arc<dyn L2PopulationListener>;
