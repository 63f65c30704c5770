//! FDB propagation
//!
//! Applies forwarding entries learned through L2 population to the overlay
//! tunnels of the device, then forwards every received entry set, once and
//! unchanged, to the registered
//! [`L2PopulationListener`](lbaas_agent_common::L2PopulationListener).
//! Networks this agent has no tunnel for are still forwarded.
//!
//! Batches are processed one at a time. Inside a batch every network is
//! independent: a network that fails is logged and reported, the others
//! still go through.

use std::net::IpAddr;
use std::sync::Arc;

use lbaas_agent_common::{
    AgentError, AgentResult, ArpEntry, DynDeviceStateSource, DynL2PopulationListener,
    FdbEntries, FdbEntry, FdbRecord, RequestContext,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::tunnel_cache::{TunnelCache, TunnelRecord};

/// Outcome of one FDB batch, per network id.
#[derive(Debug, Default)]
pub struct FdbBatchReport {
    /// Networks whose entries reached the device
    pub applied: Vec<String>,
    /// Networks with no known tunnel on this agent
    pub skipped: Vec<String>,
    /// Networks whose tunnel is not on the device yet
    pub deferred: Vec<String>,
    pub failed: Vec<(String, AgentError)>,
    /// Device FDB records written or removed
    pub records: usize,
    /// True if the L2 population listener accepted the entry set
    pub notified: bool,
}

impl FdbBatchReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Add,
    Remove,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Add => "add",
            Direction::Remove => "remove",
        }
    }
}

/// Writes FDB entries into device tunnels.
pub struct FdbPropagator {
    device: DynDeviceStateSource,
    tunnels: Arc<TunnelCache>,
    l2pop: Option<DynL2PopulationListener>,
    gate: Mutex<()>,
}

impl FdbPropagator {
    pub fn new(
        device: DynDeviceStateSource,
        tunnels: Arc<TunnelCache>,
        l2pop: Option<DynL2PopulationListener>,
    ) -> Self {
        Self {
            device,
            tunnels,
            l2pop,
            gate: Mutex::new(()),
        }
    }

    pub fn tunnels(&self) -> &Arc<TunnelCache> {
        &self.tunnels
    }

    /// Applies `entries` to the tunnels this agent knows about.
    pub async fn add_fdb_entries(
        &self,
        context: &RequestContext,
        entries: &FdbEntries,
    ) -> FdbBatchReport {
        let _batch = self.gate.lock().await;
        let mut report = self.process(entries, Direction::Add).await;
        report.notified = self.notify(context, entries, Direction::Add).await;
        report
    }

    /// Withdraws `entries` from the tunnels this agent knows about.
    pub async fn remove_fdb_entries(
        &self,
        context: &RequestContext,
        entries: &FdbEntries,
    ) -> FdbBatchReport {
        let _batch = self.gate.lock().await;
        let mut report = self.process(entries, Direction::Remove).await;
        report.notified = self.notify(context, entries, Direction::Remove).await;
        report
    }

    /// Marks the tunnel of `network_id` as present on the device and
    /// applies whatever was deferred for it.
    ///
    /// The deferred entries were forwarded to the listener when they were
    /// received, so they are not forwarded again.
    pub async fn tunnel_ready(
        &self,
        _context: &RequestContext,
        network_id: &str,
    ) -> AgentResult<FdbBatchReport> {
        let _batch = self.gate.lock().await;

        let Some(pending) = self.tunnels.mark_exists(network_id)? else {
            debug!(network_id, "Tunnel ready, nothing deferred");
            return Ok(FdbBatchReport::default());
        };

        info!(
            network_id,
            bindings = pending.binding_count(),
            "Tunnel ready, applying deferred FDB entries"
        );
        let mut entries = FdbEntries::new();
        entries.insert(network_id.to_string(), pending);
        Ok(self.process(&entries, Direction::Add).await)
    }

    async fn process(&self, entries: &FdbEntries, direction: Direction) -> FdbBatchReport {
        let mut report = FdbBatchReport::default();

        for (network_id, entry) in entries {
            let Some(tunnel) = self.tunnels.get(network_id) else {
                debug!(
                    network_id = %network_id,
                    op = direction.as_str(),
                    "No tunnel for network, ignoring FDB entries"
                );
                report.skipped.push(network_id.clone());
                continue;
            };

            if !tunnel.exists {
                match direction {
                    Direction::Add => self.tunnels.defer(network_id, entry),
                    Direction::Remove => self.tunnels.discard_deferred(network_id, entry),
                }
                debug!(
                    network_id = %network_id,
                    tunnel = %tunnel.tunnel_name(),
                    op = direction.as_str(),
                    "Tunnel not on device yet, FDB entries deferred"
                );
                report.deferred.push(network_id.clone());
                continue;
            }

            match self.apply(network_id, &tunnel, entry, direction).await {
                Ok(records) => {
                    report.records += records;
                    report.applied.push(network_id.clone());
                }
                Err(e) => {
                    warn!(
                        network_id = %network_id,
                        tunnel = %tunnel.tunnel_name(),
                        op = direction.as_str(),
                        error = %e,
                        "Failed to update tunnel FDB"
                    );
                    report.failed.push((network_id.clone(), e));
                }
            }
        }

        report
    }

    async fn apply(
        &self,
        network_id: &str,
        tunnel: &TunnelRecord,
        entry: &FdbEntry,
        direction: Direction,
    ) -> AgentResult<usize> {
        // Validate the whole entry before touching the device
        let targets = device_targets(network_id, tunnel, entry)?;

        for (record, arp) in &targets {
            match direction {
                Direction::Add => {
                    let change = self.device.ensure_fdb_record(record).await?;
                    debug!(
                        tunnel = %record.tunnel_name,
                        mac = %record.mac,
                        endpoint = %record.endpoint,
                        ?change,
                        "FDB record ensured"
                    );
                    self.device.ensure_arp_entry(arp).await?;
                }
                Direction::Remove => {
                    self.device.remove_fdb_record(record).await?;
                    self.device.remove_arp_entry(arp).await?;
                }
            }
        }

        Ok(targets.len())
    }

    async fn notify(
        &self,
        context: &RequestContext,
        entries: &FdbEntries,
        direction: Direction,
    ) -> bool {
        let Some(listener) = &self.l2pop else {
            return false;
        };

        let result = match direction {
            Direction::Add => listener.add_fdb_entries(context, entries).await,
            Direction::Remove => listener.remove_fdb_entries(context, entries).await,
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    networks = entries.len(),
                    op = direction.as_str(),
                    error = %e,
                    "L2 population listener rejected FDB entries"
                );
                false
            }
        }
    }
}

/// Device records for every non-flooding binding of `entry`.
fn device_targets(
    network_id: &str,
    tunnel: &TunnelRecord,
    entry: &FdbEntry,
) -> AgentResult<Vec<(FdbRecord, ArpEntry)>> {
    let tunnel_name = tunnel.tunnel_name();
    let mut targets = Vec::with_capacity(entry.binding_count());

    for (ip_address, bindings) in &entry.ports {
        for binding in bindings.iter().filter(|b| !b.is_flooding()) {
            validate_ip(network_id, ip_address)?;
            validate_mac(network_id, &binding.mac)?;
            validate_ip(network_id, &binding.vtep_ip)?;

            targets.push((
                FdbRecord {
                    partition: tunnel.partition.clone(),
                    tunnel_name: tunnel_name.clone(),
                    mac: binding.mac.clone(),
                    endpoint: binding.vtep_ip.clone(),
                },
                ArpEntry {
                    partition: tunnel.partition.clone(),
                    ip_address: ip_address.clone(),
                    mac: binding.mac.clone(),
                },
            ));
        }
    }

    Ok(targets)
}

fn validate_ip(network_id: &str, ip: &str) -> AgentResult<()> {
    ip.parse::<IpAddr>().map(|_| ()).map_err(|_| {
        AgentError::invalid_fdb_entry(network_id, format!("invalid IP address: {}", ip))
    })
}

/// Accepts six colon-separated hex octets.
fn validate_mac(network_id: &str, mac: &str) -> AgentResult<()> {
    let parts: Vec<&str> = mac.split(':').collect();
    let valid = parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && u8::from_str_radix(p, 16).is_ok());

    if !valid {
        return Err(AgentError::invalid_fdb_entry(
            network_id,
            format!("invalid MAC address: {}", mac),
        ));
    }
    Ok(())
}
