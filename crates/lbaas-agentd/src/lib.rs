//! LBaaS agent manager daemon library
//!
//! Keeps the configuration deployed on load-balancer devices consistent
//! with the control plane:
//!
//! - [`reconcile`]: periodic removal of orphaned objects, run only by the
//!   clusterwide (authoritative) agent of an environment
//! - [`fdb`]: propagation of learned forwarding entries into overlay tunnels
//! - [`tunnel_cache`]: per-network tunnel metadata shared by both
//! - [`agent_manager`]: the RPC-facing entry point tying them together
//!
//! # Architecture
//!
//! ```text
//! control plane RPC --> AgentManager --> OrphanReconciler --> device driver
//!                            |
//!   L2 population ---------->+--> FdbPropagator --> device driver
//!                                      |       +--> L2 population listener
//!                                      v
//!                                 TunnelCache <-- network discovery
//! ```

pub mod agent_manager;
pub mod config;
pub mod fdb;
pub mod reconcile;
pub mod tunnel_cache;

pub use agent_manager::{AgentManager, UPDATE_FDB_UNSUPPORTED};
pub use config::{AgentConfig, AgentSection, ReconcileSection, DEFAULT_CONFIG_PATH};
pub use fdb::{FdbBatchReport, FdbPropagator};
pub use reconcile::{
    OrphanReconciler, PurgeReport, ReconcileFailure, ReconcileOutcome, SkipReason,
};
pub use tunnel_cache::{TunnelCache, TunnelRecord};
