//! Tunnel cache - overlay metadata per network
//!
//! Written by network discovery, read by FDB propagation. Backed by a
//! sharded map so that readers and writers of unrelated networks never
//! contend on a single lock. Guards are never held across an await: every
//! read hands out a clone.

use dashmap::DashMap;
use lbaas_agent_common::{AgentError, AgentResult, FdbEntry};
use tracing::debug;

/// Overlay tunnel known for one network on this agent's host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRecord {
    pub network_id: String,
    /// Tunnel type (e.g., "vxlan", "gre")
    pub tunnel_type: String,
    pub segment_id: u32,
    pub local_host: String,
    /// Device partition holding the tunnel
    pub partition: String,
    /// Local tunnel endpoint address
    pub local_ip: String,
    /// Remote VTEP address
    pub remote_ip: String,
    /// True once the tunnel is confirmed on the device
    pub exists: bool,
}

impl TunnelRecord {
    pub fn new(
        network_id: impl Into<String>,
        tunnel_type: impl Into<String>,
        segment_id: u32,
        local_host: impl Into<String>,
        partition: impl Into<String>,
    ) -> Self {
        Self {
            network_id: network_id.into(),
            tunnel_type: tunnel_type.into(),
            segment_id,
            local_host: local_host.into(),
            partition: partition.into(),
            local_ip: String::new(),
            remote_ip: String::new(),
            exists: false,
        }
    }

    /// Set the local tunnel IP (builder pattern)
    pub fn with_local_ip(mut self, local_ip: impl Into<String>) -> Self {
        self.local_ip = local_ip.into();
        self
    }

    /// Set the remote VTEP IP (builder pattern)
    pub fn with_remote_ip(mut self, remote_ip: impl Into<String>) -> Self {
        self.remote_ip = remote_ip.into();
        self
    }

    /// Set the device existence flag (builder pattern)
    pub fn with_exists(mut self, exists: bool) -> Self {
        self.exists = exists;
        self
    }

    /// Name of the tunnel object on the device
    pub fn tunnel_name(&self) -> String {
        format!("tunnel-{}-{}", self.tunnel_type, self.segment_id)
    }
}

/// Network id -> tunnel record, plus FDB entries waiting for their tunnel.
#[derive(Debug, Default)]
pub struct TunnelCache {
    records: DashMap<String, TunnelRecord>,
    deferred: DashMap<String, FdbEntry>,
}

impl TunnelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, network_id: &str) -> Option<TunnelRecord> {
        self.records.get(network_id).map(|r| r.value().clone())
    }

    /// Stores the record for its network. Last write wins.
    pub fn put(&self, record: TunnelRecord) -> Option<TunnelRecord> {
        debug!(
            network_id = %record.network_id,
            tunnel = %record.tunnel_name(),
            exists = record.exists,
            "Caching tunnel"
        );
        self.records.insert(record.network_id.clone(), record)
    }

    /// Drops the record and any FDB entries deferred for it.
    pub fn evict(&self, network_id: &str) -> Option<TunnelRecord> {
        self.deferred.remove(network_id);
        self.records.remove(network_id).map(|(_, r)| r)
    }

    pub fn contains(&self, network_id: &str) -> bool {
        self.records.contains_key(network_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn network_ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.key().clone()).collect()
    }

    /// Holds entries for a tunnel that is not on the device yet.
    pub fn defer(&self, network_id: &str, entry: &FdbEntry) {
        self.deferred
            .entry(network_id.to_string())
            .and_modify(|pending| pending.merge(entry))
            .or_insert_with(|| entry.clone());
    }

    /// Forgets deferred bindings that were withdrawn before being applied.
    pub fn discard_deferred(&self, network_id: &str, entry: &FdbEntry) {
        let now_empty = match self.deferred.get_mut(network_id) {
            Some(mut pending) => {
                pending.subtract(entry);
                pending.ports.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.deferred.remove(network_id);
        }
    }

    pub fn take_deferred(&self, network_id: &str) -> Option<FdbEntry> {
        self.deferred.remove(network_id).map(|(_, e)| e)
    }

    pub fn deferred_bindings(&self, network_id: &str) -> usize {
        self.deferred
            .get(network_id)
            .map(|e| e.binding_count())
            .unwrap_or(0)
    }

    /// Marks the tunnel as present on the device and hands back the
    /// entries that were waiting for it.
    pub fn mark_exists(&self, network_id: &str) -> AgentResult<Option<FdbEntry>> {
        match self.records.get_mut(network_id) {
            Some(mut record) => record.exists = true,
            None => return Err(AgentError::tunnel_not_found(network_id)),
        }
        Ok(self.take_deferred(network_id))
    }
}
