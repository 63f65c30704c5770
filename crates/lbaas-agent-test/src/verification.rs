//! Verification helpers for testing the agent manager
//!
//! Assertion helpers over the calls a [`RecordingDevice`] received.

use lbaas_agent_common::ObjectKind;
use thiserror::Error;

use crate::{DeviceCall, RecordingDevice};

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected {expected} '{operation}' calls, found {actual}")]
    CallCountMismatch {
        operation: String,
        expected: usize,
        actual: usize,
    },

    #[error("Expected '{first}' before '{second}'")]
    OrderViolation { first: String, second: String },

    #[error("Unexpected device mutation: {call}")]
    UnexpectedMutation { call: String },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Device call verification helper
pub struct DeviceVerifier<'a> {
    device: &'a RecordingDevice,
}

impl<'a> DeviceVerifier<'a> {
    pub fn new(device: &'a RecordingDevice) -> Self {
        Self { device }
    }

    /// Number of calls to `operation` (see [`DeviceCall::name`]).
    pub fn count(&self, operation: &str) -> usize {
        self.device
            .calls()
            .iter()
            .filter(|c| c.name() == operation)
            .count()
    }

    /// Ids purged for `kind`, in call order.
    pub fn purged(&self, kind: ObjectKind) -> Vec<String> {
        self.device
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                DeviceCall::Purge { kind: k, id, .. } if k == kind => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Kinds that were listed, in call order.
    pub fn listed(&self) -> Vec<ObjectKind> {
        self.device
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                DeviceCall::ListDeployed(kind) => Some(kind),
                _ => None,
            })
            .collect()
    }

    /// Verify the number of calls to an operation
    pub fn assert_count(&self, operation: &str, expected: usize) -> VerifyResult<()> {
        let actual = self.count(operation);
        if actual != expected {
            return Err(VerificationError::CallCountMismatch {
                operation: operation.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Verify the device state was never changed
    pub fn assert_no_mutations(&self) -> VerifyResult<()> {
        match self.device.calls().into_iter().find(DeviceCall::is_mutation) {
            Some(call) => Err(VerificationError::UnexpectedMutation {
                call: format!("{:?}", call),
            }),
            None => Ok(()),
        }
    }

    /// Verify the first call to `first` precedes every call to `second`
    pub fn assert_before(&self, first: &str, second: &str) -> VerifyResult<()> {
        let calls = self.device.calls();
        let first_pos = calls.iter().position(|c| c.name() == first);
        let second_pos = calls.iter().position(|c| c.name() == second);

        match (first_pos, second_pos) {
            (Some(a), Some(b)) if a < b => Ok(()),
            (Some(_), None) => Ok(()),
            _ => Err(VerificationError::OrderViolation {
                first: first.to_string(),
                second: second.to_string(),
            }),
        }
    }
}
