//! LBaaS agent manager
//!
//! Entry point used by the agent process: owns the tunnel cache and drives
//! orphan reconciliation and FDB propagation. Nothing here returns an error
//! to an RPC caller; failures are logged and reported in the returned value.

use std::sync::Arc;

use lbaas_agent_common::{
    AgentResult, DynControlPlaneStateSource, DynDeviceStateSource, DynL2PopulationListener,
    FdbEntries, RequestContext,
};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::fdb::{FdbBatchReport, FdbPropagator};
use crate::reconcile::{OrphanReconciler, ReconcileOutcome};
use crate::tunnel_cache::TunnelCache;

/// Logged when the control plane asks for an FDB update.
pub const UPDATE_FDB_UNSUPPORTED: &str = "update_fdb_entries: the LBaaSv2 Agent does not handle an \
     update of the IP address of a neutron port. This port is generally tied to a member. If the \
     IP address of a member was changed, be sure to also recreate the member in neutron-lbaas with \
     the new address.";

pub struct AgentManager {
    config: AgentConfig,
    tunnels: Arc<TunnelCache>,
    reconciler: OrphanReconciler,
    fdb: FdbPropagator,
    pass: Mutex<()>,
}

impl AgentManager {
    /// Builds the manager around its collaborators.
    ///
    /// Fails only if `config` does not validate.
    pub fn new(
        config: AgentConfig,
        device: DynDeviceStateSource,
        control_plane: DynControlPlaneStateSource,
        l2pop: Option<DynL2PopulationListener>,
    ) -> AgentResult<Self> {
        config.validate()?;

        let tunnels = Arc::new(TunnelCache::new());
        let reconciler = OrphanReconciler::new(config.identity(), device.clone(), control_plane);
        let fdb = FdbPropagator::new(device, Arc::clone(&tunnels), l2pop);

        info!(
            host = %config.agent.host,
            environment_prefix = %config.agent.environment_prefix,
            group = config.agent.environment_group_number,
            "LBaaS agent manager initialized"
        );

        Ok(Self {
            config,
            tunnels,
            reconciler,
            fdb,
            pass: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Tunnel cache shared with network discovery.
    pub fn tunnel_cache(&self) -> &Arc<TunnelCache> {
        &self.tunnels
    }

    /// Access to the individual purge routines.
    pub fn reconciler(&self) -> &OrphanReconciler {
        &self.reconciler
    }

    /// Runs one reconciliation pass. Overlapping callers wait for the
    /// running pass to finish.
    pub async fn reconcile(&self) -> ReconcileOutcome {
        let _pass = self.pass.lock().await;
        self.reconciler.reconcile().await
    }

    /// Returns true if the pass was skipped or failed and should be retried.
    pub async fn clean_orphaned_objects_and_save_device_config(&self) -> bool {
        self.reconcile().await.needs_retry()
    }

    pub async fn add_fdb_entries(
        &self,
        context: &RequestContext,
        entries: &FdbEntries,
    ) -> FdbBatchReport {
        debug!(networks = entries.len(), "add_fdb_entries");
        self.fdb.add_fdb_entries(context, entries).await
    }

    pub async fn remove_fdb_entries(
        &self,
        context: &RequestContext,
        entries: &FdbEntries,
    ) -> FdbBatchReport {
        debug!(networks = entries.len(), "remove_fdb_entries");
        self.fdb.remove_fdb_entries(context, entries).await
    }

    /// Port address changes are not applied; members must be recreated.
    pub fn update_fdb_entries(&self, _context: &RequestContext, _entries: &FdbEntries) {
        warn!("{}", UPDATE_FDB_UNSUPPORTED);
    }

    /// Applies the FDB entries held back until the network's tunnel
    /// appeared on the device.
    pub async fn tunnel_ready(&self, context: &RequestContext, network_id: &str) -> FdbBatchReport {
        match self.fdb.tunnel_ready(context, network_id).await {
            Ok(report) => report,
            Err(e) => {
                warn!(network_id, error = %e, "Tunnel ready for unknown network");
                FdbBatchReport {
                    failed: vec![(network_id.to_string(), e)],
                    ..Default::default()
                }
            }
        }
    }

    /// Runs reconciliation on the configured interval until `shutdown`
    /// fires. A pass that has started always runs to completion.
    pub async fn run_periodic(self: Arc<Self>, shutdown: CancellationToken) {
        if !self.config.reconcile.enabled {
            info!("Periodic orphan reconciliation disabled");
            return;
        }

        let period = self.config.reconcile_interval();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = period.as_secs(), "Periodic orphan reconciliation started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Periodic orphan reconciliation stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match self.reconcile().await {
                        ReconcileOutcome::Completed(report) => {
                            debug!(purged = report.total(), "Reconciliation pass done");
                        }
                        ReconcileOutcome::Skipped(reason) => {
                            debug!(%reason, "Reconciliation pass skipped");
                        }
                        ReconcileOutcome::Failed(failure) => {
                            error!(
                                error = %failure,
                                "Reconciliation pass failed, retrying next cycle"
                            );
                        }
                    }
                }
            }
        }
    }
}
