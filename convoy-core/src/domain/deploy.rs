//! Deployment domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Health of a service's replica set at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplicaHealth {
    pub desired: u32,
    pub healthy: u32,
}

impl ReplicaHealth {
    pub fn new(desired: u32, healthy: u32) -> Self {
        Self { desired, healthy }
    }

    /// All desired replicas are healthy (and there is at least one)
    pub fn is_fully_healthy(&self) -> bool {
        self.desired > 0 && self.healthy >= self.desired
    }
}

impl fmt::Display for ReplicaHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} healthy", self.healthy, self.desired)
    }
}

/// Outcome of a successful rollout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployResult {
    pub service: String,
    pub image_uri: String,
    /// Image the service ran before this rollout
    pub previous_image: Option<String>,
    pub replicas: ReplicaHealth,
}

/// What happened to the prior revision after a failed rollout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// The live service was never touched
    NotNeeded,
    /// The prior image is running and healthy again
    RolledBack { restored_image: String },
    /// The prior revision could not be restored
    Failed {
        restored_image: Option<String>,
        reason: String,
    },
}

impl fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackOutcome::NotNeeded => write!(f, "not needed"),
            RollbackOutcome::RolledBack { restored_image } => {
                write!(f, "rolled back to {}", restored_image)
            }
            RollbackOutcome::Failed { reason, .. } => write!(f, "failed: {}", reason),
        }
    }
}
