//! Orphan reconciliation
//!
//! Removes from the device the load-balancer objects the control plane no
//! longer knows about. Only the agent the control plane names as
//! authoritative for the environment runs a pass; every other agent skips.
//!
//! A pass saves the device configuration first, then walks
//! [`ObjectKind::RECONCILE_ORDER`]. Each kind is listed, its hosted objects
//! are validated against the control plane in one batch, and the objects
//! reported as [`PROVISIONING_STATUS_UNKNOWN`] are purged. The first kind
//! that fails ends the pass; whatever was already purged stays purged.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use lbaas_agent_common::{
    AgentError, AgentIdentity, AgentResult, DeployedObject, DeployedObjects,
    DynControlPlaneStateSource, DynDeviceStateSource, ObjectKind, PoolMember,
    PROVISIONING_STATUS_UNKNOWN,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Why a pass did not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The control plane has no authoritative agent for the environment
    NoClusterwideAgent,
    /// Another agent is authoritative
    NotAuthoritative { authoritative_host: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoClusterwideAgent => write!(f, "no clusterwide agent registered"),
            SkipReason::NotAuthoritative { authoritative_host } => {
                write!(f, "clusterwide agent is {}", authoritative_host)
            }
        }
    }
}

/// Why a pass stopped before completing.
#[derive(Debug, Error)]
pub enum ReconcileFailure {
    #[error("clusterwide agent lookup failed: {0}")]
    ClusterwideAgent(#[source] AgentError),

    #[error("device configuration backup failed: {0}")]
    Backup(#[source] AgentError),

    #[error("purging orphaned {kind} objects failed: {source}")]
    Kind {
        kind: ObjectKind,
        #[source]
        source: AgentError,
    },
}

/// Result of one reconciliation pass.
#[derive(Debug)]
pub enum ReconcileOutcome {
    Skipped(SkipReason),
    Completed(PurgeReport),
    Failed(ReconcileFailure),
}

impl ReconcileOutcome {
    /// True unless the pass ran to completion.
    pub fn needs_retry(&self) -> bool {
        !matches!(self, ReconcileOutcome::Completed(_))
    }

    pub fn report(&self) -> Option<&PurgeReport> {
        match self {
            ReconcileOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// What a pass (or a single purge routine) removed from the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    purged: BTreeMap<ObjectKind, Vec<String>>,
    /// Tenant folders were scrubbed after load balancers went away
    pub folders_scrubbed: bool,
    /// Unused nodes were scrubbed against the remaining pool members
    pub nodes_scrubbed: bool,
}

impl PurgeReport {
    /// Ids purged for `kind`, sorted.
    pub fn purged(&self, kind: ObjectKind) -> &[String] {
        self.purged.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total(&self) -> usize {
        self.purged.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0 && !self.folders_scrubbed && !self.nodes_scrubbed
    }

    fn record(&mut self, kind: ObjectKind, ids: Vec<String>) {
        if !ids.is_empty() {
            self.purged.entry(kind).or_default().extend(ids);
        }
    }

    fn absorb(&mut self, other: PurgeReport) {
        for (kind, ids) in other.purged {
            self.record(kind, ids);
        }
        self.folders_scrubbed |= other.folders_scrubbed;
        self.nodes_scrubbed |= other.nodes_scrubbed;
    }
}

/// Objects of one kind confirmed orphaned, waiting to be purged.
#[derive(Debug)]
struct PurgeBatch {
    kind: ObjectKind,
    targets: Vec<DeployedObject>,
}

/// Runs orphan reconciliation passes for one agent.
pub struct OrphanReconciler {
    identity: AgentIdentity,
    device: DynDeviceStateSource,
    control_plane: DynControlPlaneStateSource,
}

impl OrphanReconciler {
    pub fn new(
        identity: AgentIdentity,
        device: DynDeviceStateSource,
        control_plane: DynControlPlaneStateSource,
    ) -> Self {
        Self {
            identity,
            device,
            control_plane,
        }
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Runs one pass.
    pub async fn reconcile(&self) -> ReconcileOutcome {
        if let Err(reason) = self.check_authoritative().await {
            return reason;
        }

        info!(host = %self.identity.host, "Authoritative agent, saving device configuration");
        if let Err(e) = self.device.backup_configuration().await {
            error!(error = %e, "Device configuration backup failed, skipping orphan purge");
            return ReconcileOutcome::Failed(ReconcileFailure::Backup(e));
        }

        let mut report = PurgeReport::default();
        for kind in ObjectKind::RECONCILE_ORDER {
            match self.reconcile_kind(kind).await {
                Ok(step) => report.absorb(step),
                Err(source) => {
                    error!(
                        kind = %kind,
                        error = %source,
                        purged = report.total(),
                        "Orphan purge aborted"
                    );
                    return ReconcileOutcome::Failed(ReconcileFailure::Kind { kind, source });
                }
            }
        }

        info!(purged = report.total(), "Orphan reconciliation complete");
        ReconcileOutcome::Completed(report)
    }

    async fn check_authoritative(&self) -> Result<(), ReconcileOutcome> {
        let agent = self
            .control_plane
            .get_clusterwide_agent(
                &self.identity.environment_prefix,
                self.identity.environment_group_number,
            )
            .await
            .map_err(|e| {
                error!(error = %e, "Unable to look up clusterwide agent");
                ReconcileOutcome::Failed(ReconcileFailure::ClusterwideAgent(e))
            })?;

        match agent {
            None => {
                info!(
                    environment_prefix = %self.identity.environment_prefix,
                    group = self.identity.environment_group_number,
                    "No clusterwide agent registered, skipping orphan purge"
                );
                Err(ReconcileOutcome::Skipped(SkipReason::NoClusterwideAgent))
            }
            Some(agent) if agent.host != self.identity.host => {
                debug!(
                    clusterwide_agent = %agent.host,
                    "Not the clusterwide agent, skipping orphan purge"
                );
                Err(ReconcileOutcome::Skipped(SkipReason::NotAuthoritative {
                    authoritative_host: agent.host,
                }))
            }
            Some(_) => Ok(()),
        }
    }

    async fn reconcile_kind(&self, kind: ObjectKind) -> AgentResult<PurgeReport> {
        let deployed = self.device.list_deployed(kind).await?;
        if deployed.is_empty() {
            debug!(kind = %kind, "Nothing deployed");
            return Ok(PurgeReport::default());
        }

        debug!(kind = %kind, count = deployed.len(), "Checking deployed objects");
        match kind {
            ObjectKind::LoadBalancer => self.purge_orphaned_loadbalancers(&deployed).await,
            ObjectKind::Listener => self.purge_orphaned_listeners(&deployed).await,
            ObjectKind::L7Policy => self.purge_orphaned_l7_policys(&deployed).await,
            ObjectKind::Pool => self.purge_orphaned_pools(&deployed).await,
            ObjectKind::HealthMonitor => self.purge_orphaned_health_monitors(&deployed).await,
        }
    }

    /// Purges orphaned load balancers, then scrubs emptied tenant folders.
    pub async fn purge_orphaned_loadbalancers(
        &self,
        loadbalancers: &DeployedObjects,
    ) -> AgentResult<PurgeReport> {
        let mut report = PurgeReport::default();
        let purged = self
            .purge_unknown(ObjectKind::LoadBalancer, loadbalancers.values())
            .await?;

        if !purged.is_empty() {
            self.device.purge_orphaned_folders().await?;
            report.folders_scrubbed = true;
        }
        report.record(ObjectKind::LoadBalancer, purged);
        Ok(report)
    }

    pub async fn purge_orphaned_listeners(
        &self,
        listeners: &DeployedObjects,
    ) -> AgentResult<PurgeReport> {
        let mut report = PurgeReport::default();
        let purged = self
            .purge_unknown(ObjectKind::Listener, listeners.values())
            .await?;
        report.record(ObjectKind::Listener, purged);
        Ok(report)
    }

    /// Purges orphaned L7 policies no deployed listener holds on to.
    pub async fn purge_orphaned_l7_policys(
        &self,
        policies: &DeployedObjects,
    ) -> AgentResult<PurgeReport> {
        let mut report = PurgeReport::default();
        if policies.is_empty() {
            return Ok(report);
        }

        let listeners = self.device.list_deployed(ObjectKind::Listener).await?;
        let detached = policies.values().filter(|policy| {
            let attached = listeners
                .values()
                .any(|l| l.references_l7_policy(&policy.id))
                || policy
                    .listener_id
                    .as_ref()
                    .is_some_and(|id| listeners.contains_key(id));
            if attached {
                debug!(l7policy = %policy.id, "L7 policy attached to a deployed listener");
            }
            !attached
        });

        let purged = self.purge_unknown(ObjectKind::L7Policy, detached).await?;
        report.record(ObjectKind::L7Policy, purged);
        Ok(report)
    }

    /// Purges orphaned pools, then scrubs nodes no surviving member uses.
    pub async fn purge_orphaned_pools(&self, pools: &DeployedObjects) -> AgentResult<PurgeReport> {
        let mut report = PurgeReport::default();
        let purged = self.purge_unknown(ObjectKind::Pool, pools.values()).await?;

        let deployed: Vec<&DeployedObject> = pools.values().collect();
        if !deployed.is_empty() {
            report.nodes_scrubbed = self.scrub_orphaned_nodes(&deployed, &purged).await?;
        }
        report.record(ObjectKind::Pool, purged);
        Ok(report)
    }

    /// Purges orphaned health monitors no deployed pool uses.
    pub async fn purge_orphaned_health_monitors(
        &self,
        monitors: &DeployedObjects,
    ) -> AgentResult<PurgeReport> {
        let mut report = PurgeReport::default();
        if monitors.is_empty() {
            return Ok(report);
        }

        let pools = self.device.list_deployed(ObjectKind::Pool).await?;
        let unused = monitors.values().filter(|monitor| {
            let in_use = pools
                .values()
                .any(|p| p.monitor.as_deref() == Some(monitor.id.as_str()));
            if in_use {
                debug!(health_monitor = %monitor.id, "Health monitor used by a deployed pool");
            }
            !in_use
        });

        let purged = self.purge_unknown(ObjectKind::HealthMonitor, unused).await?;
        report.record(ObjectKind::HealthMonitor, purged);
        Ok(report)
    }

    /// Asks the device to drop nodes no member of `pools` uses.
    ///
    /// Members are fetched from the control plane and grouped by the
    /// tenant of their pool. Every tenant of `pools` is sent, with an empty
    /// list when none of its pools has members left. Returns false when
    /// there was nothing to send.
    pub async fn purge_orphaned_nodes(&self, pools: &DeployedObjects) -> AgentResult<bool> {
        let pools: Vec<&DeployedObject> = pools.values().collect();
        self.scrub_orphaned_nodes(&pools, &[]).await
    }

    /// Members of `purged` pools are dropped even if the control plane
    /// still reports them.
    async fn scrub_orphaned_nodes(
        &self,
        pools: &[&DeployedObject],
        purged: &[String],
    ) -> AgentResult<bool> {
        if pools.is_empty() {
            return Ok(false);
        }

        let mut pool_ids: Vec<String> = pools.iter().map(|p| p.id.clone()).collect();
        pool_ids.sort();
        let members = self.control_plane.get_pools_members(&pool_ids).await?;

        let mut tenant_members: HashMap<String, Vec<PoolMember>> = HashMap::new();
        for pool in pools {
            let entry = tenant_members.entry(pool.tenant_id.clone()).or_default();
            if purged.contains(&pool.id) {
                continue;
            }
            if let Some(pool_members) = members.get(&pool.id) {
                entry.extend(pool_members.iter().cloned());
            }
        }

        debug!(tenants = tenant_members.len(), "Purging orphaned nodes");
        self.device.purge_orphaned_nodes(&tenant_members).await?;
        Ok(true)
    }

    async fn purge_unknown<'a, I>(&self, kind: ObjectKind, objects: I) -> AgentResult<Vec<String>>
    where
        I: Iterator<Item = &'a DeployedObject>,
    {
        let batch = self.validate(kind, objects).await?;
        self.execute(batch).await
    }

    /// Keeps the hosted objects the control plane reports as unknown.
    async fn validate<'a, I>(&self, kind: ObjectKind, objects: I) -> AgentResult<PurgeBatch>
    where
        I: Iterator<Item = &'a DeployedObject>,
    {
        let mut candidates: Vec<&DeployedObject> = objects.filter(|o| o.has_hosts()).collect();
        if candidates.is_empty() {
            return Ok(PurgeBatch {
                kind,
                targets: Vec::new(),
            });
        }
        candidates.sort_by(|a, b| a.id.cmp(&b.id));

        let ids: Vec<String> = candidates.iter().map(|o| o.id.clone()).collect();
        let statuses = self.control_plane.validate_state(kind, &ids).await?;

        let targets = candidates
            .into_iter()
            .filter(|o| match statuses.get(&o.id) {
                Some(status) => status == PROVISIONING_STATUS_UNKNOWN,
                None => {
                    warn!(
                        kind = %kind,
                        id = %o.id,
                        "No provisioning status returned, keeping object"
                    );
                    false
                }
            })
            .cloned()
            .collect();

        Ok(PurgeBatch { kind, targets })
    }

    async fn execute(&self, batch: PurgeBatch) -> AgentResult<Vec<String>> {
        let PurgeBatch { kind, targets } = batch;
        let mut purged = Vec::with_capacity(targets.len());

        for object in targets {
            self.device
                .purge(kind, &object.id, &object.tenant_id, &object.hostnames)
                .await?;
            info!(
                kind = %kind,
                id = %object.id,
                tenant_id = %object.tenant_id,
                "Purged orphaned object"
            );
            purged.push(object.id);
        }

        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use lbaas_agent_test::fixtures::*;
    use lbaas_agent_test::{
        ControlPlaneCall, DeviceCall, DeviceVerifier, RecordingControlPlane, RecordingDevice,
    };
    use pretty_assertions::assert_eq;

    fn reconciler(
        control_plane: RecordingControlPlane,
    ) -> (Arc<RecordingDevice>, Arc<RecordingControlPlane>, OrphanReconciler) {
        let device = Arc::new(RecordingDevice::new());
        let control_plane = Arc::new(control_plane);
        let reconciler = OrphanReconciler::new(
            AgentIdentity::new(ENVIRONMENT_PREFIX, ENVIRONMENT_GROUP_NUMBER, AGENT_HOST),
            device.clone(),
            control_plane.clone(),
        );
        (device, control_plane, reconciler)
    }

    fn objects(list: impl IntoIterator<Item = DeployedObject>) -> DeployedObjects {
        list.into_iter().map(|o| (o.id.clone(), o)).collect()
    }

    fn validated(cp: &RecordingControlPlane) -> Vec<(ObjectKind, Vec<String>)> {
        cp.calls()
            .into_iter()
            .filter_map(|c| match c {
                ControlPlaneCall::ValidateState { kind, ids } => Some((kind, ids)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_needs_retry() {
        assert!(ReconcileOutcome::Skipped(SkipReason::NoClusterwideAgent).needs_retry());
        assert!(ReconcileOutcome::Failed(ReconcileFailure::Backup(AgentError::device(
            "backup_configuration",
            "down"
        )))
        .needs_retry());
        assert!(!ReconcileOutcome::Completed(PurgeReport::default()).needs_retry());
    }

    #[test]
    fn test_failure_display() {
        let failure = ReconcileFailure::Kind {
            kind: ObjectKind::Pool,
            source: AgentError::device("purge", "timeout"),
        };
        assert!(failure.to_string().starts_with("purging orphaned pool objects failed"));
    }

    #[tokio::test]
    async fn test_no_clusterwide_agent_skips() {
        let (device, cp, reconciler) = reconciler(RecordingControlPlane::new());

        let outcome = reconciler.reconcile().await;

        assert!(matches!(
            outcome,
            ReconcileOutcome::Skipped(SkipReason::NoClusterwideAgent)
        ));
        assert!(device.calls().is_empty());
        assert_eq!(
            cp.calls(),
            vec![ControlPlaneCall::GetClusterwideAgent {
                environment_prefix: ENVIRONMENT_PREFIX.to_string(),
                environment_group_number: ENVIRONMENT_GROUP_NUMBER,
            }]
        );
    }

    #[tokio::test]
    async fn test_other_agent_skips() {
        let (device, _cp, reconciler) =
            reconciler(RecordingControlPlane::with_clusterwide_agent(OTHER_HOST));
        ServiceFixture::new("1", AGENT_HOST).unknown().deploy_into(&device);

        match reconciler.reconcile().await {
            ReconcileOutcome::Skipped(SkipReason::NotAuthoritative { authoritative_host }) => {
                assert_eq!(authoritative_host, OTHER_HOST);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(device.calls().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failure_fails() {
        let cp = RecordingControlPlane::new();
        cp.fail_when(|c| matches!(c, ControlPlaneCall::GetClusterwideAgent { .. }));
        let (device, _cp, reconciler) = reconciler(cp);

        assert!(matches!(
            reconciler.reconcile().await,
            ReconcileOutcome::Failed(ReconcileFailure::ClusterwideAgent(_))
        ));
        assert!(device.calls().is_empty());
    }

    #[tokio::test]
    async fn test_backup_failure_stops_pass() {
        let (device, _cp, reconciler) =
            reconciler(RecordingControlPlane::with_clusterwide_agent(AGENT_HOST));
        ServiceFixture::new("1", AGENT_HOST).unknown().deploy_into(&device);
        device.fail_when(|c| matches!(c, DeviceCall::BackupConfiguration));

        assert!(matches!(
            reconciler.reconcile().await,
            ReconcileOutcome::Failed(ReconcileFailure::Backup(_))
        ));
        assert_eq!(device.calls(), vec![DeviceCall::BackupConfiguration]);
    }

    #[tokio::test]
    async fn test_authoritative_pass_purges_everything_unknown() {
        let (device, _cp, reconciler) =
            reconciler(RecordingControlPlane::with_clusterwide_agent(AGENT_HOST));
        ServiceFixture::new("1", AGENT_HOST).deploy_into(&device);

        let outcome = reconciler.reconcile().await;

        let report = outcome.report().unwrap();
        assert_eq!(report.purged(ObjectKind::LoadBalancer), ["lb-1"]);
        assert_eq!(report.purged(ObjectKind::Listener), ["li-1"]);
        // The listener holding the policy is gone by the time policies run
        assert_eq!(report.purged(ObjectKind::L7Policy), ["pol-1"]);
        assert_eq!(report.purged(ObjectKind::Pool), ["pool-1"]);
        assert_eq!(report.purged(ObjectKind::HealthMonitor), ["hm-1"]);
        assert!(report.folders_scrubbed);
        assert!(report.nodes_scrubbed);

        let verifier = DeviceVerifier::new(&device);
        assert!(verifier
            .assert_before("backup_configuration", "list_deployed")
            .is_ok());
        assert_eq!(
            verifier.listed(),
            vec![
                ObjectKind::LoadBalancer,
                ObjectKind::Listener,
                ObjectKind::L7Policy,
                ObjectKind::Listener,
                ObjectKind::Pool,
                ObjectKind::HealthMonitor,
                ObjectKind::Pool,
            ]
        );
    }

    #[tokio::test]
    async fn test_active_objects_survive() {
        let cp = RecordingControlPlane::with_clusterwide_agent(AGENT_HOST);
        let svc = ServiceFixture::new("1", AGENT_HOST);
        for (kind, obj) in svc.objects() {
            cp.set_status(kind, obj.id.clone(), "ACTIVE");
        }
        cp.set_pool_members("pool-1", vec![PoolMember::new("m-1", MEMBER_ADDRESS, 80)]);
        let (device, cp, reconciler) = reconciler(cp);
        svc.deploy_into(&device);

        let report = match reconciler.reconcile().await {
            ReconcileOutcome::Completed(report) => report,
            other => panic!("unexpected outcome: {:?}", other),
        };

        assert_eq!(report.total(), 0);
        assert!(!report.folders_scrubbed);
        assert!(report.nodes_scrubbed);
        assert_eq!(DeviceVerifier::new(&device).count("purge"), 0);

        // Attached policy and used monitor are never validated
        let kinds: Vec<ObjectKind> = validated(&cp).into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            kinds,
            vec![ObjectKind::LoadBalancer, ObjectKind::Listener, ObjectKind::Pool]
        );
    }

    #[tokio::test]
    async fn test_loadbalancer_failure_aborts_remaining_kinds() {
        let (device, _cp, reconciler) =
            reconciler(RecordingControlPlane::with_clusterwide_agent(AGENT_HOST));
        ServiceFixture::new("1", AGENT_HOST).deploy_into(&device);
        device.fail_when(|c| matches!(c, DeviceCall::Purge { kind: ObjectKind::LoadBalancer, .. }));

        let outcome = reconciler.reconcile().await;

        assert!(matches!(
            outcome,
            ReconcileOutcome::Failed(ReconcileFailure::Kind {
                kind: ObjectKind::LoadBalancer,
                ..
            })
        ));
        assert!(outcome.needs_retry());
        assert_eq!(
            DeviceVerifier::new(&device).listed(),
            vec![ObjectKind::LoadBalancer]
        );
        assert_eq!(device.deployed(ObjectKind::Listener).len(), 1);
    }

    #[tokio::test]
    async fn test_empty_mapping_issues_no_calls() {
        let (device, cp, reconciler) = reconciler(RecordingControlPlane::new());
        let empty = DeployedObjects::new();

        reconciler.purge_orphaned_loadbalancers(&empty).await.unwrap();
        reconciler.purge_orphaned_listeners(&empty).await.unwrap();
        reconciler.purge_orphaned_l7_policys(&empty).await.unwrap();
        reconciler.purge_orphaned_pools(&empty).await.unwrap();
        reconciler.purge_orphaned_health_monitors(&empty).await.unwrap();
        assert!(!reconciler.purge_orphaned_nodes(&empty).await.unwrap());

        assert!(device.calls().is_empty());
        assert!(cp.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unhosted_objects_are_not_candidates() {
        let (device, cp, reconciler) = reconciler(RecordingControlPlane::new());
        let listeners = objects([
            DeployedObject::new("li-a", TENANT_ID),
            DeployedObject::new("li-b", TENANT_ID).with_hostnames([""]),
        ]);

        let report = reconciler.purge_orphaned_listeners(&listeners).await.unwrap();

        assert_eq!(report.total(), 0);
        assert!(cp.calls().is_empty());
        assert!(device.calls().is_empty());
    }

    #[tokio::test]
    async fn test_validation_is_batched_and_sorted() {
        let cp = RecordingControlPlane::new();
        cp.set_status(ObjectKind::Listener, "li-b", "ACTIVE");
        let (device, cp, reconciler) = reconciler(cp);
        let listeners = objects([
            DeployedObject::new("li-c", TENANT_ID).with_hostnames([AGENT_HOST]),
            DeployedObject::new("li-a", TENANT_ID).with_hostnames([AGENT_HOST]),
            DeployedObject::new("li-b", TENANT_ID).with_hostnames([AGENT_HOST]),
        ]);

        let report = reconciler.purge_orphaned_listeners(&listeners).await.unwrap();

        assert_eq!(
            validated(&cp),
            vec![(
                ObjectKind::Listener,
                vec!["li-a".to_string(), "li-b".to_string(), "li-c".to_string()]
            )]
        );
        assert_eq!(report.purged(ObjectKind::Listener), ["li-a", "li-c"]);
        assert_eq!(DeviceVerifier::new(&device).purged(ObjectKind::Listener), vec!["li-a", "li-c"]);
    }

    #[tokio::test]
    async fn test_loadbalancer_purge_arguments_and_folder_scrub() {
        let (device, _cp, reconciler) = reconciler(RecordingControlPlane::new());
        let lb = DeployedObject::new("lb-1", TENANT_ID)
            .with_hostnames([AGENT_HOST])
            .with_provisioning_status(PROVISIONING_STATUS_UNKNOWN);

        reconciler
            .purge_orphaned_loadbalancers(&objects([lb]))
            .await
            .unwrap();

        assert_eq!(
            device.calls(),
            vec![
                DeviceCall::Purge {
                    kind: ObjectKind::LoadBalancer,
                    id: "lb-1".to_string(),
                    tenant_id: TENANT_ID.to_string(),
                    hostnames: vec![AGENT_HOST.to_string()],
                },
                DeviceCall::PurgeOrphanedFolders,
            ]
        );
    }

    #[tokio::test]
    async fn test_no_loadbalancer_purged_no_folder_scrub() {
        let cp = RecordingControlPlane::new();
        cp.set_status(ObjectKind::LoadBalancer, "lb-1", "ACTIVE");
        let (device, _cp, reconciler) = reconciler(cp);
        let lb = DeployedObject::new("lb-1", TENANT_ID).with_hostnames([AGENT_HOST]);

        let report = reconciler
            .purge_orphaned_loadbalancers(&objects([lb]))
            .await
            .unwrap();

        assert!(!report.folders_scrubbed);
        assert_eq!(DeviceVerifier::new(&device).count("purge_orphaned_folders"), 0);
    }

    #[tokio::test]
    async fn test_l7_policy_detached_is_purged() {
        let (device, cp, reconciler) = reconciler(RecordingControlPlane::new());
        device.deploy(
            ObjectKind::Listener,
            DeployedObject::new("li-1", TENANT_ID)
                .with_hostnames([AGENT_HOST])
                .with_l7_policy(""),
        );
        let policies =
            objects([DeployedObject::new("pol-1", TENANT_ID).with_hostnames([AGENT_HOST])]);

        let report = reconciler.purge_orphaned_l7_policys(&policies).await.unwrap();

        assert_eq!(report.purged(ObjectKind::L7Policy), ["pol-1"]);
        assert_eq!(
            validated(&cp),
            vec![(ObjectKind::L7Policy, vec!["pol-1".to_string()])]
        );
    }

    #[tokio::test]
    async fn test_l7_policy_attached_by_path_is_kept() {
        let (device, cp, reconciler) = reconciler(RecordingControlPlane::new());
        device.deploy(
            ObjectKind::Listener,
            DeployedObject::new("li-1", TENANT_ID)
                .with_hostnames([AGENT_HOST])
                .with_l7_policy(format!("/Project_{}/pol-1", TENANT_ID)),
        );
        let policies =
            objects([DeployedObject::new("pol-1", TENANT_ID).with_hostnames([AGENT_HOST])]);

        let report = reconciler.purge_orphaned_l7_policys(&policies).await.unwrap();

        assert_eq!(report.total(), 0);
        assert!(validated(&cp).is_empty());
        assert_eq!(DeviceVerifier::new(&device).count("purge"), 0);
    }

    #[tokio::test]
    async fn test_l7_policy_attached_by_parent_is_kept() {
        let (device, cp, reconciler) = reconciler(RecordingControlPlane::new());
        device.deploy(
            ObjectKind::Listener,
            DeployedObject::new("li-1", TENANT_ID).with_hostnames([AGENT_HOST]),
        );
        let policies = objects([DeployedObject::new("pol-1", TENANT_ID)
            .with_hostnames([AGENT_HOST])
            .with_listener("li-1")]);

        reconciler.purge_orphaned_l7_policys(&policies).await.unwrap();

        assert!(validated(&cp).is_empty());
    }

    #[tokio::test]
    async fn test_health_monitor_in_use_is_kept() {
        let (device, cp, reconciler) = reconciler(RecordingControlPlane::new());
        device.deploy(
            ObjectKind::Pool,
            DeployedObject::new("pool-1", TENANT_ID)
                .with_hostnames([AGENT_HOST])
                .with_monitor("hm-1"),
        );
        let monitors = objects([
            DeployedObject::new("hm-1", TENANT_ID).with_hostnames([AGENT_HOST]),
            DeployedObject::new("hm-2", TENANT_ID).with_hostnames([AGENT_HOST]),
        ]);

        let report = reconciler
            .purge_orphaned_health_monitors(&monitors)
            .await
            .unwrap();

        assert_eq!(report.purged(ObjectKind::HealthMonitor), ["hm-2"]);
        assert_eq!(
            validated(&cp),
            vec![(ObjectKind::HealthMonitor, vec!["hm-2".to_string()])]
        );
    }

    #[tokio::test]
    async fn test_pool_purge_scrubs_nodes_by_tenant() {
        let cp = RecordingControlPlane::new();
        cp.set_status(ObjectKind::Pool, "pool-a", "ACTIVE");
        cp.set_status(ObjectKind::Pool, "pool-b", "ACTIVE");
        cp.set_pool_members("pool-a", vec![PoolMember::new("m-1", "10.0.0.1", 80)]);
        cp.set_pool_members("pool-b", vec![PoolMember::new("m-2", "10.0.0.2", 443)]);
        let (device, cp, reconciler) = reconciler(cp);
        let pools = objects([
            DeployedObject::new("pool-a", "tenant-a").with_hostnames([AGENT_HOST]),
            DeployedObject::new("pool-b", "tenant-b").with_hostnames([AGENT_HOST]),
            DeployedObject::new("pool-c", "tenant-a").with_hostnames([AGENT_HOST]),
        ]);

        let report = reconciler.purge_orphaned_pools(&pools).await.unwrap();

        assert_eq!(report.purged(ObjectKind::Pool), ["pool-c"]);
        assert!(report.nodes_scrubbed);
        assert!(cp
            .calls()
            .contains(&ControlPlaneCall::GetPoolsMembers(vec![
                "pool-a".to_string(),
                "pool-b".to_string(),
                "pool-c".to_string(),
            ])));

        let scrubbed = device.calls().into_iter().find_map(|c| match c {
            DeviceCall::PurgeOrphanedNodes(map) => Some(map),
            _ => None,
        });
        let scrubbed = scrubbed.unwrap();
        assert_eq!(scrubbed["tenant-a"], vec![PoolMember::new("m-1", "10.0.0.1", 80)]);
        assert_eq!(scrubbed["tenant-b"], vec![PoolMember::new("m-2", "10.0.0.2", 443)]);
    }

    #[tokio::test]
    async fn test_tenant_losing_its_last_pool_gets_empty_node_list() {
        let cp = RecordingControlPlane::new();
        cp.set_status(ObjectKind::Pool, "pool-a", "ACTIVE");
        cp.set_pool_members("pool-a", vec![PoolMember::new("m-1", "10.0.0.1", 80)]);
        // Members the control plane still lists for a purged pool are ignored
        cp.set_pool_members("pool-b", vec![PoolMember::new("m-2", "10.0.0.2", 80)]);
        let (device, _cp, reconciler) = reconciler(cp);
        let pools = objects([
            DeployedObject::new("pool-a", "tenant-a").with_hostnames([AGENT_HOST]),
            DeployedObject::new("pool-b", "tenant-b").with_hostnames([AGENT_HOST]),
        ]);

        let report = reconciler.purge_orphaned_pools(&pools).await.unwrap();

        assert_eq!(report.purged(ObjectKind::Pool), ["pool-b"]);
        let scrubbed = device
            .calls()
            .into_iter()
            .find_map(|c| match c {
                DeviceCall::PurgeOrphanedNodes(map) => Some(map),
                _ => None,
            })
            .unwrap();
        assert_eq!(scrubbed.len(), 2);
        assert_eq!(
            scrubbed["tenant-a"],
            vec![PoolMember::new("m-1", "10.0.0.1", 80)]
        );
        assert!(scrubbed["tenant-b"].is_empty());
    }

    #[tokio::test]
    async fn test_all_pools_purged_still_scrubs_nodes() {
        let (device, _cp, reconciler) = reconciler(RecordingControlPlane::new());
        let pools = objects([
            DeployedObject::new("pool-b", "tenant-b").with_hostnames([AGENT_HOST]),
        ]);

        let report = reconciler.purge_orphaned_pools(&pools).await.unwrap();

        assert!(report.nodes_scrubbed);
        let expected: HashMap<String, Vec<PoolMember>> =
            HashMap::from([("tenant-b".to_string(), Vec::new())]);
        assert_eq!(
            device.calls(),
            vec![
                DeviceCall::Purge {
                    kind: ObjectKind::Pool,
                    id: "pool-b".to_string(),
                    tenant_id: "tenant-b".to_string(),
                    hostnames: vec![AGENT_HOST.to_string()],
                },
                DeviceCall::PurgeOrphanedNodes(expected),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_status_is_left_alone() {
        let (device, _cp, reconciler) = reconciler(RecordingControlPlane::new());
        let pools =
            objects([DeployedObject::new("pool-1", TENANT_ID).with_hostnames([AGENT_HOST])]);
        // validate_state answers for every id; an empty answer needs a custom source
        let empty_answer = Arc::new(EmptyValidation);
        let reconciler = OrphanReconciler::new(
            reconciler.identity().clone(),
            device.clone(),
            empty_answer,
        );

        let report = reconciler.purge_orphaned_pools(&pools).await.unwrap();

        assert_eq!(report.total(), 0);
        assert_eq!(DeviceVerifier::new(&device).count("purge"), 0);
    }

    struct EmptyValidation;

    #[async_trait::async_trait]
    impl lbaas_agent_common::ControlPlaneStateSource for EmptyValidation {
        async fn get_clusterwide_agent(
            &self,
            _environment_prefix: &str,
            _environment_group_number: u32,
        ) -> AgentResult<Option<lbaas_agent_common::ClusterwideAgent>> {
            Ok(None)
        }

        async fn validate_state(
            &self,
            _kind: ObjectKind,
            _ids: &[String],
        ) -> AgentResult<HashMap<String, String>> {
            Ok(HashMap::new())
        }

        async fn get_pools_members(
            &self,
            _pool_ids: &[String],
        ) -> AgentResult<HashMap<String, Vec<PoolMember>>> {
            Ok(HashMap::new())
        }
    }
}
