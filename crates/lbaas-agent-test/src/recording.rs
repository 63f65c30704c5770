//! Recording collaborators
//!
//! Each recorder keeps an in-memory model of its side of the world, logs
//! every call it receives, and fails calls that match an injected predicate.
//! A failing call is still recorded.

use std::collections::HashMap;

use async_trait::async_trait;
use lbaas_agent_common::{
    AgentError, AgentResult, ArpEntry, ClusterwideAgent, ControlPlaneStateSource, DeployedObject,
    DeployedObjects, DeviceStateSource, FdbEntries, FdbRecord, FdbRecordChange,
    L2PopulationListener, ObjectKind, PoolMember, RequestContext, PROVISIONING_STATUS_UNKNOWN,
};
use parking_lot::Mutex;

type FailPredicate<C> = Box<dyn Fn(&C) -> bool + Send + Sync>;

/// A call received by [`RecordingDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    ListDeployed(ObjectKind),
    Purge {
        kind: ObjectKind,
        id: String,
        tenant_id: String,
        hostnames: Vec<String>,
    },
    BackupConfiguration,
    PurgeOrphanedFolders,
    PurgeOrphanedNodes(HashMap<String, Vec<PoolMember>>),
    EnsureFdbRecord(FdbRecord),
    RemoveFdbRecord(FdbRecord),
    EnsureArpEntry(ArpEntry),
    RemoveArpEntry(ArpEntry),
}

impl DeviceCall {
    /// Short operation name, matching the trait method.
    pub fn name(&self) -> &'static str {
        match self {
            DeviceCall::ListDeployed(_) => "list_deployed",
            DeviceCall::Purge { .. } => "purge",
            DeviceCall::BackupConfiguration => "backup_configuration",
            DeviceCall::PurgeOrphanedFolders => "purge_orphaned_folders",
            DeviceCall::PurgeOrphanedNodes(_) => "purge_orphaned_nodes",
            DeviceCall::EnsureFdbRecord(_) => "ensure_fdb_record",
            DeviceCall::RemoveFdbRecord(_) => "remove_fdb_record",
            DeviceCall::EnsureArpEntry(_) => "ensure_arp_entry",
            DeviceCall::RemoveArpEntry(_) => "remove_arp_entry",
        }
    }

    /// Returns true if the call changes device state.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, DeviceCall::ListDeployed(_))
    }
}

/// In-memory device driver.
#[derive(Default)]
pub struct RecordingDevice {
    deployed: Mutex<HashMap<ObjectKind, DeployedObjects>>,
    fdb_records: Mutex<HashMap<(String, String), FdbRecord>>,
    arp_entries: Mutex<HashMap<(String, String), ArpEntry>>,
    calls: Mutex<Vec<DeviceCall>>,
    fail_when: Mutex<Vec<FailPredicate<DeviceCall>>>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places an object on the device.
    pub fn deploy(&self, kind: ObjectKind, object: DeployedObject) {
        self.deployed
            .lock()
            .entry(kind)
            .or_default()
            .insert(object.id.clone(), object);
    }

    /// Returns what is currently deployed for `kind`.
    pub fn deployed(&self, kind: ObjectKind) -> DeployedObjects {
        self.deployed.lock().get(&kind).cloned().unwrap_or_default()
    }

    /// Pre-populates a tunnel FDB record.
    pub fn insert_fdb_record(&self, record: FdbRecord) {
        self.fdb_records
            .lock()
            .insert((record.tunnel_name.clone(), record.mac.clone()), record);
    }

    pub fn fdb_record(&self, tunnel_name: &str, mac: &str) -> Option<FdbRecord> {
        self.fdb_records
            .lock()
            .get(&(tunnel_name.to_string(), mac.to_string()))
            .cloned()
    }

    pub fn fdb_record_count(&self) -> usize {
        self.fdb_records.lock().len()
    }

    pub fn arp_entry(&self, partition: &str, ip_address: &str) -> Option<ArpEntry> {
        self.arp_entries
            .lock()
            .get(&(partition.to_string(), ip_address.to_string()))
            .cloned()
    }

    /// Fails every subsequent call matching the predicate.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&DeviceCall) -> bool + Send + Sync + 'static,
    {
        self.fail_when.lock().push(Box::new(predicate));
    }

    /// Returns a copy of every call received so far.
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: DeviceCall) -> AgentResult<()> {
        let name = call.name();
        let fails = self.fail_when.lock().iter().any(|p| p(&call));
        self.calls.lock().push(call);
        if fails {
            return Err(AgentError::device(name, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceStateSource for RecordingDevice {
    async fn list_deployed(&self, kind: ObjectKind) -> AgentResult<DeployedObjects> {
        self.record(DeviceCall::ListDeployed(kind))?;
        Ok(self.deployed(kind))
    }

    async fn purge(
        &self,
        kind: ObjectKind,
        id: &str,
        tenant_id: &str,
        hostnames: &[String],
    ) -> AgentResult<()> {
        self.record(DeviceCall::Purge {
            kind,
            id: id.to_string(),
            tenant_id: tenant_id.to_string(),
            hostnames: hostnames.to_vec(),
        })?;
        if let Some(objects) = self.deployed.lock().get_mut(&kind) {
            objects.remove(id);
        }
        Ok(())
    }

    async fn backup_configuration(&self) -> AgentResult<()> {
        self.record(DeviceCall::BackupConfiguration)
    }

    async fn purge_orphaned_folders(&self) -> AgentResult<()> {
        self.record(DeviceCall::PurgeOrphanedFolders)
    }

    async fn purge_orphaned_nodes(
        &self,
        tenant_members: &HashMap<String, Vec<PoolMember>>,
    ) -> AgentResult<()> {
        self.record(DeviceCall::PurgeOrphanedNodes(tenant_members.clone()))
    }

    async fn ensure_fdb_record(&self, record: &FdbRecord) -> AgentResult<FdbRecordChange> {
        self.record(DeviceCall::EnsureFdbRecord(record.clone()))?;
        let key = (record.tunnel_name.clone(), record.mac.clone());
        let mut records = self.fdb_records.lock();
        let change = match records.get(&key) {
            None => FdbRecordChange::Created,
            Some(existing) if existing.endpoint != record.endpoint => {
                FdbRecordChange::EndpointUpdated
            }
            Some(_) => FdbRecordChange::Unchanged,
        };
        records.insert(key, record.clone());
        Ok(change)
    }

    async fn remove_fdb_record(&self, record: &FdbRecord) -> AgentResult<()> {
        self.record(DeviceCall::RemoveFdbRecord(record.clone()))?;
        self.fdb_records
            .lock()
            .remove(&(record.tunnel_name.clone(), record.mac.clone()));
        Ok(())
    }

    async fn ensure_arp_entry(&self, entry: &ArpEntry) -> AgentResult<()> {
        self.record(DeviceCall::EnsureArpEntry(entry.clone()))?;
        self.arp_entries.lock().insert(
            (entry.partition.clone(), entry.ip_address.clone()),
            entry.clone(),
        );
        Ok(())
    }

    async fn remove_arp_entry(&self, entry: &ArpEntry) -> AgentResult<()> {
        self.record(DeviceCall::RemoveArpEntry(entry.clone()))?;
        self.arp_entries
            .lock()
            .remove(&(entry.partition.clone(), entry.ip_address.clone()));
        Ok(())
    }
}

/// A call received by [`RecordingControlPlane`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPlaneCall {
    GetClusterwideAgent {
        environment_prefix: String,
        environment_group_number: u32,
    },
    ValidateState {
        kind: ObjectKind,
        ids: Vec<String>,
    },
    GetPoolsMembers(Vec<String>),
}

impl ControlPlaneCall {
    pub fn name(&self) -> &'static str {
        match self {
            ControlPlaneCall::GetClusterwideAgent { .. } => "get_clusterwide_agent",
            ControlPlaneCall::ValidateState { .. } => "validate_state",
            ControlPlaneCall::GetPoolsMembers(_) => "get_pools_members",
        }
    }
}

/// In-memory control plane.
///
/// Like the real plugin, `validate_state` reports
/// [`PROVISIONING_STATUS_UNKNOWN`] for ids it holds no status for.
#[derive(Default)]
pub struct RecordingControlPlane {
    clusterwide_agent: Mutex<Option<ClusterwideAgent>>,
    statuses: Mutex<HashMap<ObjectKind, HashMap<String, String>>>,
    members: Mutex<HashMap<String, Vec<PoolMember>>>,
    calls: Mutex<Vec<ControlPlaneCall>>,
    fail_when: Mutex<Vec<FailPredicate<ControlPlaneCall>>>,
}

impl RecordingControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Control plane with `host` registered as the clusterwide agent.
    pub fn with_clusterwide_agent(host: impl Into<String>) -> Self {
        let cp = Self::default();
        cp.set_clusterwide_agent(Some(ClusterwideAgent::new(host)));
        cp
    }

    pub fn set_clusterwide_agent(&self, agent: Option<ClusterwideAgent>) {
        *self.clusterwide_agent.lock() = agent;
    }

    pub fn set_status(&self, kind: ObjectKind, id: impl Into<String>, status: impl Into<String>) {
        self.statuses
            .lock()
            .entry(kind)
            .or_default()
            .insert(id.into(), status.into());
    }

    pub fn set_pool_members(&self, pool_id: impl Into<String>, members: Vec<PoolMember>) {
        self.members.lock().insert(pool_id.into(), members);
    }

    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&ControlPlaneCall) -> bool + Send + Sync + 'static,
    {
        self.fail_when.lock().push(Box::new(predicate));
    }

    pub fn calls(&self) -> Vec<ControlPlaneCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: ControlPlaneCall) -> AgentResult<()> {
        let name = call.name();
        let fails = self.fail_when.lock().iter().any(|p| p(&call));
        self.calls.lock().push(call);
        if fails {
            return Err(AgentError::control_plane(name, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlaneStateSource for RecordingControlPlane {
    async fn get_clusterwide_agent(
        &self,
        environment_prefix: &str,
        environment_group_number: u32,
    ) -> AgentResult<Option<ClusterwideAgent>> {
        self.record(ControlPlaneCall::GetClusterwideAgent {
            environment_prefix: environment_prefix.to_string(),
            environment_group_number,
        })?;
        Ok(self.clusterwide_agent.lock().clone())
    }

    async fn validate_state(
        &self,
        kind: ObjectKind,
        ids: &[String],
    ) -> AgentResult<HashMap<String, String>> {
        self.record(ControlPlaneCall::ValidateState {
            kind,
            ids: ids.to_vec(),
        })?;
        let statuses = self.statuses.lock();
        let known = statuses.get(&kind);
        Ok(ids
            .iter()
            .map(|id| {
                let status = known
                    .and_then(|s| s.get(id))
                    .cloned()
                    .unwrap_or_else(|| PROVISIONING_STATUS_UNKNOWN.to_string());
                (id.clone(), status)
            })
            .collect())
    }

    async fn get_pools_members(
        &self,
        pool_ids: &[String],
    ) -> AgentResult<HashMap<String, Vec<PoolMember>>> {
        self.record(ControlPlaneCall::GetPoolsMembers(pool_ids.to_vec()))?;
        let members = self.members.lock();
        Ok(pool_ids
            .iter()
            .filter_map(|id| members.get(id).map(|m| (id.clone(), m.clone())))
            .collect())
    }
}

/// A notification received by [`RecordingL2Population`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum L2PopulationCall {
    Add(RequestContext, FdbEntries),
    Remove(RequestContext, FdbEntries),
}

/// In-memory L2 population listener.
#[derive(Default)]
pub struct RecordingL2Population {
    calls: Mutex<Vec<L2PopulationCall>>,
    failing: Mutex<bool>,
}

impl RecordingL2Population {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn calls(&self) -> Vec<L2PopulationCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: L2PopulationCall) -> AgentResult<()> {
        self.calls.lock().push(call);
        if *self.failing.lock() {
            return Err(AgentError::internal("l2 population listener unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl L2PopulationListener for RecordingL2Population {
    async fn add_fdb_entries(
        &self,
        context: &RequestContext,
        entries: &FdbEntries,
    ) -> AgentResult<()> {
        self.record(L2PopulationCall::Add(context.clone(), entries.clone()))
    }

    async fn remove_fdb_entries(
        &self,
        context: &RequestContext,
        entries: &FdbEntries,
    ) -> AgentResult<()> {
        self.record(L2PopulationCall::Remove(context.clone(), entries.clone()))
    }
}
