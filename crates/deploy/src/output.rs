use std::{collections::BTreeMap, path::Path};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    environment::{CompilerSettings, Environment},
    orchestrator::RunState,
    plan::DeploymentPlan,
    registry::{ContractRegistry, Resolution},
};

/// A contract recorded in a run output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRecord {
    pub address: Address,
    pub artifact: String,
    pub resolution: Resolution,
}

/// Addresses and metadata written after a run.
///
/// Saved whether the run completed or not, so a failed run can be resumed by
/// feeding [`RunOutput::known_addresses`] back into the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    pub environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<u64>,
    /// Fingerprint of the plan that produced this output.
    pub plan_hash: String,
    pub compiler: CompilerSettings,
    pub state: RunState,
    pub deployed_at: DateTime<Utc>,
    /// Version of the tool that wrote the file.
    pub version: String,
    pub contracts: BTreeMap<String, ContractRecord>,
}

impl RunOutput {
    pub fn new(
        env: &Environment,
        plan: &DeploymentPlan,
        compiler: CompilerSettings,
        registry: &ContractRegistry,
        state: RunState,
    ) -> Self {
        let contracts = registry
            .iter()
            .map(|contract| {
                (
                    contract.name.clone(),
                    ContractRecord {
                        address: contract.address,
                        artifact: contract.artifact.clone(),
                        resolution: contract.resolution,
                    },
                )
            })
            .collect();

        Self {
            environment: env.name.clone(),
            network_id: env.network_id,
            plan_hash: plan.fingerprint(),
            compiler,
            state,
            deployed_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            contracts,
        }
    }

    /// Logical name to address mapping, usable as known addresses.
    pub fn known_addresses(&self) -> BTreeMap<String, Address> {
        self.contracts
            .iter()
            .map(|(name, record)| (name.clone(), record.address))
            .collect()
    }

    /// Whether `plan` is the plan this output was written for.
    pub fn matches_plan(&self, plan: &DeploymentPlan) -> bool {
        self.plan_hash == plan.fingerprint()
    }

    /// Save this output as formatted JSON.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run output")?;

        std::fs::write(path, json)
            .context(format!("Failed to write run output to {}", path.display()))?;

        tracing::info!(path = %path.display(), contracts = self.contracts.len(), "Run output saved");
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Run output file does not exist: {}", path.display());
        }

        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read run output from {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse run output JSON")
    }
}
