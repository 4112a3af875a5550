//! Deployment environments and contract variant selection.

use std::collections::BTreeMap;

use alloy_core::primitives::{Address, address};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{DeployError, plan::ContractSpec};

/// The UniswapV2-compatible router used by the protocol on every network.
pub const DEFAULT_ROUTER: Address = address!("cCAFCf876caB8f9542d6972f87B5D62e1182767d");

/// Known-address key under which the router is registered.
pub const ROUTER_KEY: &str = "UniswapRouter";

/// Which family of contracts an environment deploys.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Variant {
    /// Mock contracts with open minting, for local and test networks.
    #[default]
    Mock,
    /// Production contracts.
    Production,
}

/// A named deployment target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// The environment identifier. Filled in by the resolver from the map key.
    #[serde(default)]
    pub name: String,
    /// JSON-RPC endpoint of the node.
    pub rpc_url: Url,
    /// Expected network id. `None` accepts any network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<u64>,
    /// Blocks to wait after inclusion before an action counts as done.
    #[serde(default)]
    pub confirmations: u64,
    /// Blocks to wait for a transaction to be mined before giving up.
    #[serde(default = "default_timeout_blocks")]
    pub timeout_blocks: u64,
    /// Gas price in wei. Left to the node when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<u64>,
    /// Sending account. The node's first account when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    /// Mock or production contracts.
    #[serde(default)]
    pub variant: Variant,
    /// Contracts that already exist on this network, by logical name.
    #[serde(default)]
    pub known_addresses: BTreeMap<String, Address>,
    /// Named accounts (fund receivers and the like).
    #[serde(default)]
    pub accounts: BTreeMap<String, Address>,
}

fn default_timeout_blocks() -> u64 {
    100
}

impl Environment {
    /// Create an environment with no known addresses or accounts.
    pub fn new(name: impl Into<String>, rpc_url: Url, variant: Variant) -> Self {
        Self {
            name: name.into(),
            rpc_url,
            network_id: None,
            confirmations: 0,
            timeout_blocks: default_timeout_blocks(),
            gas_price: None,
            from: None,
            variant,
            known_addresses: BTreeMap::new(),
            accounts: BTreeMap::new(),
        }
    }

    /// The concrete artifact to deploy for `spec` in this environment.
    pub fn artifact_for<'a>(&self, spec: &'a ContractSpec) -> &'a str {
        spec.artifact_for(self.variant)
    }

    pub fn known_address(&self, name: &str) -> Option<Address> {
        self.known_addresses.get(name).copied()
    }

    pub fn account(&self, name: &str) -> Option<Address> {
        self.accounts.get(name).copied()
    }

    /// Add addresses to the known-address map, replacing existing entries.
    pub fn with_known_addresses(
        mut self,
        addresses: impl IntoIterator<Item = (String, Address)>,
    ) -> Self {
        self.known_addresses.extend(addresses);
        self
    }
}

/// Compiler settings the contract artifacts were built with.
///
/// These are recorded alongside the run output and never executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerSettings {
    pub solc_version: String,
    pub optimizer_enabled: bool,
    pub optimizer_runs: u64,
    pub evm_version: String,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            solc_version: "0.6.12".to_string(),
            optimizer_enabled: true,
            optimizer_runs: 1_000_000,
            evm_version: "berlin".to_string(),
        }
    }
}

/// Maps environment identifiers to [`Environment`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentResolver {
    environments: BTreeMap<String, Environment>,
}

impl EnvironmentResolver {
    pub fn new(environments: BTreeMap<String, Environment>) -> Self {
        let environments = environments
            .into_iter()
            .map(|(name, mut env)| {
                env.name = name.clone();
                (name, env)
            })
            .collect();
        Self { environments }
    }

    /// The built-in `development`, `testnet` and `mainnet` environments.
    pub fn builtin() -> BTreeMap<String, Environment> {
        let router = || BTreeMap::from([(ROUTER_KEY.to_string(), DEFAULT_ROUTER)]);

        let development = Environment {
            gas_price: Some(15_000_000_000),
            timeout_blocks: 50,
            known_addresses: router(),
            ..Environment::new(
                "development",
                Url::parse("http://127.0.0.1:8545").expect("static url"),
                Variant::Mock,
            )
        };

        let testnet = Environment {
            network_id: Some(0xfa2),
            confirmations: 0,
            timeout_blocks: 100,
            known_addresses: router(),
            ..Environment::new(
                "testnet",
                Url::parse("https://rpc.testnet.fantom.network/").expect("static url"),
                Variant::Mock,
            )
        };

        let mainnet = Environment {
            network_id: Some(250),
            confirmations: 5,
            timeout_blocks: 100,
            known_addresses: router(),
            ..Environment::new(
                "mainnet",
                Url::parse("https://rpc.ftm.tools/").expect("static url"),
                Variant::Production,
            )
        };

        BTreeMap::from([
            (development.name.clone(), development),
            (testnet.name.clone(), testnet),
            (mainnet.name.clone(), mainnet),
        ])
    }

    /// Look up an environment by name.
    pub fn resolve(&self, name: &str) -> Result<Environment, DeployError> {
        self.environments
            .get(name)
            .cloned()
            .ok_or_else(|| DeployError::UnknownEnvironment {
                name: name.to_string(),
                known: self.names(),
            })
    }

    pub fn names(&self) -> Vec<String> {
        self.environments.keys().cloned().collect()
    }

    pub fn environments(&self) -> impl Iterator<Item = &Environment> {
        self.environments.values()
    }
}

impl Default for EnvironmentResolver {
    fn default() -> Self {
        Self::new(Self::builtin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_builtin_environments() {
        let resolver = EnvironmentResolver::default();

        let testnet = resolver.resolve("testnet").unwrap();
        assert_eq!(testnet.name, "testnet");
        assert_eq!(testnet.network_id, Some(4002));
        assert_eq!(testnet.variant, Variant::Mock);

        let mainnet = resolver.resolve("mainnet").unwrap();
        assert_eq!(mainnet.confirmations, 5);
        assert_eq!(mainnet.variant, Variant::Production);
        assert_eq!(mainnet.known_address(ROUTER_KEY), Some(DEFAULT_ROUTER));
    }

    #[test]
    fn test_resolve_unknown_environment() {
        let resolver = EnvironmentResolver::default();
        let err = resolver.resolve("ropsten").unwrap_err();
        match err {
            DeployError::UnknownEnvironment { name, known } => {
                assert_eq!(name, "ropsten");
                assert_eq!(known, vec!["development", "mainnet", "testnet"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_artifact_selection_by_variant() {
        let resolver = EnvironmentResolver::default();
        let spec = ContractSpec::new("Hamster", "Hamster").with_mock("MockedHamster");

        let testnet = resolver.resolve("testnet").unwrap();
        let mainnet = resolver.resolve("mainnet").unwrap();
        assert_eq!(testnet.artifact_for(&spec), "MockedHamster");
        assert_eq!(mainnet.artifact_for(&spec), "Hamster");

        let hbond = ContractSpec::new("HBond", "HBond");
        assert_eq!(testnet.artifact_for(&hbond), "HBond");
    }

    #[test]
    fn test_environment_from_toml_uses_defaults() {
        let env: Environment = toml::from_str(
            r#"
            rpc_url = "http://localhost:8545"
            variant = "production"

            [known_addresses]
            WFTM = "0x21be370D5312f44cB42ce377BC9b8a0cEF1A4C83"
            "#,
        )
        .unwrap();

        assert_eq!(env.timeout_blocks, 100);
        assert_eq!(env.confirmations, 0);
        assert_eq!(env.variant, Variant::Production);
        assert!(env.known_address("WFTM").is_some());
    }
}
