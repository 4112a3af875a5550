//! Registry of contracts resolved during a run.

use std::collections::BTreeMap;

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::{DeployError, plan::FieldRef, transport::ChainTransport, value::Value};

/// How a contract's address was obtained.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Resolution {
    /// Deployed by this run.
    Deployed,
    /// Attached to an address that already existed.
    Bound,
}

/// A contract registered under a logical name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedContract {
    pub name: String,
    /// The artifact whose ABI describes the contract.
    pub artifact: String,
    pub address: Address,
    /// Environment the contract was resolved under.
    pub environment: String,
    pub resolution: Resolution,
}

impl DeployedContract {
    pub fn deployed(
        name: impl Into<String>,
        artifact: impl Into<String>,
        address: Address,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            artifact: artifact.into(),
            address,
            environment: environment.into(),
            resolution: Resolution::Deployed,
        }
    }

    pub fn bound(
        name: impl Into<String>,
        artifact: impl Into<String>,
        address: Address,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            resolution: Resolution::Bound,
            ..Self::deployed(name, artifact, address, environment)
        }
    }
}

/// Logical name to contract mapping.
///
/// Entries are write-once: registering a name twice is an error whether the
/// second registration is a deploy or a bind.
#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    contracts: BTreeMap<String, DeployedContract>,
    /// Registration order, for reporting.
    order: Vec<String>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, contract: DeployedContract) -> Result<(), DeployError> {
        if let Some(existing) = self.contracts.get(&contract.name) {
            return Err(DeployError::DuplicateRegistration {
                name: contract.name,
                existing: Some(existing.address),
            });
        }

        tracing::debug!(
            name = %contract.name,
            address = %contract.address,
            resolution = %contract.resolution,
            "Contract registered"
        );
        self.order.push(contract.name.clone());
        self.contracts.insert(contract.name.clone(), contract);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&DeployedContract, DeployError> {
        self.contracts
            .get(name)
            .ok_or_else(|| DeployError::UnresolvedReference {
                name: name.to_string(),
            })
    }

    /// Read `field` from a registered contract through the transport.
    ///
    /// Fails with [`DeployError::ReferenceResolution`] if the contract is not
    /// registered yet or the read itself fails.
    pub async fn resolve_field<T: ChainTransport>(
        &self,
        field: &FieldRef,
        args: &[Value],
        transport: &mut T,
    ) -> Result<Value, DeployError> {
        let contract =
            self.contracts
                .get(&field.contract)
                .ok_or_else(|| DeployError::ReferenceResolution {
                    contract: field.contract.clone(),
                    field: field.field.clone(),
                    reason: "contract is not registered yet".to_string(),
                })?;

        let value = transport
            .read(contract, &field.field, args)
            .await
            .map_err(|e| DeployError::ReferenceResolution {
                contract: field.contract.clone(),
                field: field.field.clone(),
                reason: format!("{:#}", e),
            })?;

        tracing::debug!(field = %field, value = %value, "Field resolved");
        Ok(value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.contracts.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    /// Contracts in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &DeployedContract> {
        self.order.iter().filter_map(|name| self.contracts.get(name))
    }

    /// Logical name to address mapping of everything registered so far.
    pub fn output(&self) -> BTreeMap<String, Address> {
        self.contracts
            .iter()
            .map(|(name, contract)| (name.clone(), contract.address))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::U256;

    use super::*;
    use crate::transport::SimulatedChain;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ContractRegistry::new();
        registry
            .register(DeployedContract::deployed("Hamster", "MockedHamster", addr(1), "testnet"))
            .unwrap();

        let hamster = registry.resolve("Hamster").unwrap();
        assert_eq!(hamster.address, addr(1));
        assert_eq!(hamster.resolution, Resolution::Deployed);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_unregistered_fails() {
        let registry = ContractRegistry::new();
        let err = registry.resolve("Treasury").unwrap_err();
        assert!(matches!(err, DeployError::UnresolvedReference { ref name } if name == "Treasury"));
    }

    #[test]
    fn test_duplicate_registration_fails_for_deploy_and_bind() {
        let mut registry = ContractRegistry::new();
        registry
            .register(DeployedContract::deployed("Hamster", "Hamster", addr(1), "mainnet"))
            .unwrap();

        for duplicate in [
            DeployedContract::deployed("Hamster", "Hamster", addr(2), "mainnet"),
            DeployedContract::bound("Hamster", "Hamster", addr(3), "mainnet"),
        ] {
            let err = registry.register(duplicate).unwrap_err();
            assert!(matches!(
                err,
                DeployError::DuplicateRegistration { existing: Some(existing), .. } if existing == addr(1)
            ));
        }

        assert_eq!(registry.resolve("Hamster").unwrap().address, addr(1));
    }

    #[test]
    fn test_iter_keeps_registration_order() {
        let mut registry = ContractRegistry::new();
        for (i, name) in ["Zapper", "Alpha", "Middle"].into_iter().enumerate() {
            registry
                .register(DeployedContract::deployed(name, name, addr(i as u8), "testnet"))
                .unwrap();
        }

        let names: Vec<_> = registry.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Zapper", "Alpha", "Middle"]);
    }

    #[tokio::test]
    async fn test_resolve_field_before_registration_fails() {
        let registry = ContractRegistry::new();
        let mut chain = SimulatedChain::new();

        let err = registry
            .resolve_field(&FieldRef::new("Treasury", "PERIOD"), &[], &mut chain)
            .await
            .unwrap_err();

        assert!(matches!(err, DeployError::ReferenceResolution { ref contract, .. } if contract == "Treasury"));
        assert!(chain.transactions().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_field_reads_through_transport() {
        let mut chain = SimulatedChain::new().with_field("Treasury", "PERIOD", U256::from(21600u64));
        let address = chain.deploy("Treasury", &[]).await.unwrap();

        let mut registry = ContractRegistry::new();
        registry
            .register(DeployedContract::deployed("Treasury", "Treasury", address, "testnet"))
            .unwrap();

        let period = registry
            .resolve_field(&FieldRef::new("Treasury", "PERIOD"), &[], &mut chain)
            .await
            .unwrap();
        assert_eq!(period, Value::Uint(U256::from(21600u64)));

        let err = registry
            .resolve_field(&FieldRef::new("Treasury", "epoch"), &[], &mut chain)
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::ReferenceResolution { .. }));
    }
}
