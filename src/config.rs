//! Client configuration and contract deployment resolution.
//!
//! Deployment addresses are an explicit map threaded into the client at
//! construction, keyed by chain id. There is no process-wide mutable state.

use crate::types::Address;
use std::collections::HashMap;

/// A contract deployment on one network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Deployment {
    pub address: Address,
    pub chain_name: String,
}

/// Contract addresses per chain id.
#[derive(Clone, Debug, Default)]
pub struct DeploymentMap {
    inner: HashMap<u64, Deployment>,
}

impl DeploymentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a deployment for a chain id (builder style).
    pub fn with_deployment(
        mut self,
        chain_id: u64,
        address: Address,
        chain_name: impl Into<String>,
    ) -> Self {
        self.inner.insert(
            chain_id,
            Deployment {
                address,
                chain_name: chain_name.into(),
            },
        );
        self
    }

    /// Resolve the deployment for a chain id. Zero-address entries count as
    /// not deployed.
    pub fn deployment_for(&self, chain_id: u64) -> Option<&Deployment> {
        self.inner
            .get(&chain_id)
            .filter(|d| !d.address.is_zero())
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Voting client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Contract deployments per chain id.
    pub deployments: DeploymentMap,
    /// Validity window for decryption signatures, in whole days.
    pub signature_validity_days: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            deployments: DeploymentMap::new(),
            signature_validity_days: 7,
        }
    }
}
