//! Test fixtures for common agent manager scenarios
//!
//! Provides a fully wired load-balancer service and FDB notifications
//! shaped like the ones L2 population sends.

use lbaas_agent_common::{
    DeployedObject, FdbEntries, FdbEntry, ObjectKind, PROVISIONING_STATUS_UNKNOWN,
};

use crate::RecordingDevice;

/// Host string of the agent under test.
pub const AGENT_HOST: &str = "conf.host:agent_hash";

/// Host string of some other agent in the environment.
pub const OTHER_HOST: &str = "not me";

pub const ENVIRONMENT_PREFIX: &str = "Project";

pub const ENVIRONMENT_GROUP_NUMBER: u32 = 1;

pub const TENANT_ID: &str = "d9ed216f67f04a84bf8fd97c155855cd";

pub const NETWORK_ID: &str = "cdf1eb6d-9b17-422c-9b8b-6a0b9b8a6b1c";

pub const SEGMENT_ID: u32 = 23;

pub const MEMBER_MAC: &str = "92:37:a2:b2:12:38";

pub const MEMBER_VTEP: &str = "201.0.155.5";

pub const MEMBER_ADDRESS: &str = "10.2.1.2";

/// One of each object kind, wired together the way a deployed service is.
///
/// Listener -> L7 policy, L7 policy -> listener, pool -> health monitor.
#[derive(Debug, Clone)]
pub struct ServiceFixture {
    pub loadbalancer: DeployedObject,
    pub listener: DeployedObject,
    pub l7_policy: DeployedObject,
    pub pool: DeployedObject,
    pub health_monitor: DeployedObject,
}

impl ServiceFixture {
    /// Builds a service owned by `host`, ids suffixed with `suffix`.
    pub fn new(suffix: &str, host: &str) -> Self {
        let listener_id = format!("li-{}", suffix);
        let policy_id = format!("pol-{}", suffix);
        let monitor_id = format!("hm-{}", suffix);

        Self {
            loadbalancer: DeployedObject::new(format!("lb-{}", suffix), TENANT_ID)
                .with_hostnames([host]),
            listener: DeployedObject::new(listener_id.clone(), TENANT_ID)
                .with_hostnames([host])
                .with_l7_policy(format!("/{}_{}/{}", ENVIRONMENT_PREFIX, TENANT_ID, policy_id)),
            l7_policy: DeployedObject::new(policy_id, TENANT_ID)
                .with_hostnames([host])
                .with_listener(listener_id),
            pool: DeployedObject::new(format!("pool-{}", suffix), TENANT_ID)
                .with_hostnames([host])
                .with_monitor(monitor_id.clone()),
            health_monitor: DeployedObject::new(monitor_id, TENANT_ID).with_hostnames([host]),
        }
    }

    /// Marks every object as unknown to the control plane.
    pub fn unknown(mut self) -> Self {
        for obj in self.objects_mut() {
            obj.provisioning_status = Some(PROVISIONING_STATUS_UNKNOWN.to_string());
        }
        self
    }

    /// Returns each object with its kind, in reconciliation order.
    pub fn objects(&self) -> [(ObjectKind, &DeployedObject); 5] {
        [
            (ObjectKind::LoadBalancer, &self.loadbalancer),
            (ObjectKind::Listener, &self.listener),
            (ObjectKind::L7Policy, &self.l7_policy),
            (ObjectKind::Pool, &self.pool),
            (ObjectKind::HealthMonitor, &self.health_monitor),
        ]
    }

    fn objects_mut(&mut self) -> [&mut DeployedObject; 5] {
        [
            &mut self.loadbalancer,
            &mut self.listener,
            &mut self.l7_policy,
            &mut self.pool,
            &mut self.health_monitor,
        ]
    }

    /// Deploys every object of the service on the device.
    pub fn deploy_into(&self, device: &RecordingDevice) {
        for (kind, obj) in self.objects() {
            device.deploy(kind, obj.clone());
        }
    }
}

/// A single-binding VXLAN notification for [`NETWORK_ID`].
pub fn vxlan_fdb_entries() -> FdbEntries {
    fdb_entries_for(NETWORK_ID, MEMBER_ADDRESS, MEMBER_MAC, MEMBER_VTEP)
}

/// A single-binding VXLAN notification for an arbitrary network.
pub fn fdb_entries_for(network_id: &str, address: &str, mac: &str, vtep: &str) -> FdbEntries {
    let mut entries = FdbEntries::new();
    entries.insert(
        network_id.to_string(),
        FdbEntry::new("vxlan", SEGMENT_ID).with_port(address, mac, vtep),
    );
    entries
}
