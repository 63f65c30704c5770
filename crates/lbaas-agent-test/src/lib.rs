//! Test infrastructure for the LBaaS agent manager
//!
//! Provides:
//! - Recording implementations of the device driver, control-plane client
//!   and L2 population listener, with failure injection
//! - Fixtures for deployed services and FDB notifications
//! - Verification helpers over the recorded calls

pub mod fixtures;
mod recording;
mod verification;

pub use recording::*;
pub use verification::*;
