//! Data model shared between the agent manager and its collaborators.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Provisioning status reported for objects the control plane no longer knows.
pub const PROVISIONING_STATUS_UNKNOWN: &str = "Unknown";

/// MAC used by L2 population to announce a flooding entry toward a VTEP.
pub const FLOODING_MAC: &str = "00:00:00:00:00:00";

/// Kinds of load-balancer configuration objects deployed on a device.
///
/// Declaration order is the reconciliation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    LoadBalancer,
    Listener,
    L7Policy,
    Pool,
    HealthMonitor,
}

impl ObjectKind {
    /// Fixed order in which a reconciliation pass visits the kinds.
    pub const RECONCILE_ORDER: [ObjectKind; 5] = [
        ObjectKind::LoadBalancer,
        ObjectKind::Listener,
        ObjectKind::L7Policy,
        ObjectKind::Pool,
        ObjectKind::HealthMonitor,
    ];

    /// Returns the kind name as used in logs and RPC method names.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::LoadBalancer => "loadbalancer",
            ObjectKind::Listener => "listener",
            ObjectKind::L7Policy => "l7policy",
            ObjectKind::Pool => "pool",
            ObjectKind::HealthMonitor => "health_monitor",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configuration object as reported by the device driver.
///
/// References to other objects are plain identifiers; lookups happen
/// against a separate listing of the referenced kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedObject {
    pub id: String,
    pub tenant_id: String,
    /// Agent hosts that own the object.
    #[serde(default)]
    pub hostnames: Vec<String>,
    #[serde(default)]
    pub provisioning_status: Option<String>,
    /// Pool -> health monitor id.
    #[serde(default)]
    pub monitor: Option<String>,
    /// L7 policy -> parent listener id.
    #[serde(default)]
    pub listener_id: Option<String>,
    /// Listener -> attached L7 policies, possibly as device paths.
    #[serde(default)]
    pub l7_policies: Vec<String>,
}

impl DeployedObject {
    pub fn new(id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }

    pub fn with_hostnames<I, S>(mut self, hostnames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hostnames = hostnames.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_provisioning_status(mut self, status: impl Into<String>) -> Self {
        self.provisioning_status = Some(status.into());
        self
    }

    pub fn with_monitor(mut self, monitor_id: impl Into<String>) -> Self {
        self.monitor = Some(monitor_id.into());
        self
    }

    pub fn with_listener(mut self, listener_id: impl Into<String>) -> Self {
        self.listener_id = Some(listener_id.into());
        self
    }

    pub fn with_l7_policy(mut self, policy: impl Into<String>) -> Self {
        self.l7_policies.push(policy.into());
        self
    }

    /// Returns true if at least one agent host is recorded for the object.
    pub fn has_hosts(&self) -> bool {
        self.hostnames.iter().any(|h| !h.is_empty())
    }

    /// Returns true if the listener references the given L7 policy id.
    ///
    /// Device paths such as `/Project_t/wrapper_policy_x` match on their
    /// last segment.
    pub fn references_l7_policy(&self, policy_id: &str) -> bool {
        self.l7_policies
            .iter()
            .filter(|p| !p.is_empty())
            .any(|p| p.rsplit('/').next() == Some(policy_id))
    }
}

/// Deployed objects of one kind, keyed by id.
pub type DeployedObjects = HashMap<String, DeployedObject>;

/// Identity of this agent within its environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub environment_prefix: String,
    pub environment_group_number: u32,
    pub host: String,
}

impl AgentIdentity {
    pub fn new(
        environment_prefix: impl Into<String>,
        environment_group_number: u32,
        host: impl Into<String>,
    ) -> Self {
        Self {
            environment_prefix: environment_prefix.into(),
            environment_group_number,
            host: host.into(),
        }
    }
}

/// The agent the control plane considers authoritative for an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterwideAgent {
    pub host: String,
}

impl ClusterwideAgent {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

/// A pool member as known to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMember {
    pub id: String,
    pub address: String,
    pub protocol_port: u16,
}

impl PoolMember {
    pub fn new(id: impl Into<String>, address: impl Into<String>, protocol_port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            protocol_port,
        }
    }
}

/// One learned (MAC, VTEP-IP) pair.
///
/// Serialized as a two-element array, the way L2 population sends it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct PortBinding {
    pub mac: String,
    pub vtep_ip: String,
}

impl PortBinding {
    pub fn new(mac: impl Into<String>, vtep_ip: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            vtep_ip: vtep_ip.into(),
        }
    }

    pub fn is_flooding(&self) -> bool {
        self.mac == FLOODING_MAC
    }
}

impl From<(String, String)> for PortBinding {
    fn from((mac, vtep_ip): (String, String)) -> Self {
        Self { mac, vtep_ip }
    }
}

impl From<PortBinding> for (String, String) {
    fn from(binding: PortBinding) -> Self {
        (binding.mac, binding.vtep_ip)
    }
}

/// Forwarding entries learned for one network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FdbEntry {
    pub network_type: String,
    pub segment_id: u32,
    /// Destination IP address -> learned bindings.
    #[serde(default)]
    pub ports: BTreeMap<String, Vec<PortBinding>>,
}

impl FdbEntry {
    pub fn new(network_type: impl Into<String>, segment_id: u32) -> Self {
        Self {
            network_type: network_type.into(),
            segment_id,
            ports: BTreeMap::new(),
        }
    }

    pub fn with_port(
        mut self,
        ip_address: impl Into<String>,
        mac: impl Into<String>,
        vtep_ip: impl Into<String>,
    ) -> Self {
        self.ports
            .entry(ip_address.into())
            .or_default()
            .push(PortBinding::new(mac, vtep_ip));
        self
    }

    /// Total number of bindings across all destination addresses.
    pub fn binding_count(&self) -> usize {
        self.ports.values().map(Vec::len).sum()
    }

    /// Adds the bindings of `other` that are not already present.
    pub fn merge(&mut self, other: &FdbEntry) {
        for (ip, bindings) in &other.ports {
            let existing = self.ports.entry(ip.clone()).or_default();
            for binding in bindings {
                if !existing.contains(binding) {
                    existing.push(binding.clone());
                }
            }
        }
    }

    /// Drops every binding also present in `other`, pruning empty addresses.
    pub fn subtract(&mut self, other: &FdbEntry) {
        for (ip, bindings) in &other.ports {
            if let Some(existing) = self.ports.get_mut(ip) {
                existing.retain(|b| !bindings.contains(b));
            }
        }
        self.ports.retain(|_, bindings| !bindings.is_empty());
    }
}

/// FDB entries keyed by network id.
pub type FdbEntries = BTreeMap<String, FdbEntry>;

/// A forwarding record inside a device tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FdbRecord {
    pub partition: String,
    pub tunnel_name: String,
    pub mac: String,
    pub endpoint: String,
}

/// A static ARP entry on the device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArpEntry {
    pub partition: String,
    pub ip_address: String,
    pub mac: String,
}

/// What the device did when asked to ensure an FDB record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdbRecordChange {
    Created,
    EndpointUpdated,
    Unchanged,
}

/// Opaque context of an inbound RPC request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
}
