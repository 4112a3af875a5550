//! In-memory chain used for tests and dry runs.

use std::collections::{HashMap, HashSet};

use alloy_core::primitives::{Address, B256, U256, keccak256};
use anyhow::Result;

use super::{BlockInfo, ChainTransport};
use crate::{registry::DeployedContract, value::Value};

/// Default sender of the simulated chain.
const DEFAULT_SENDER: Address = Address::repeat_byte(0x42);

/// Seconds between simulated blocks.
const BLOCK_TIME_SECS: u64 = 2;

/// A transaction recorded by the [`SimulatedChain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    Deploy {
        artifact: String,
        address: Address,
        args: Vec<Value>,
    },
    Call {
        artifact: String,
        address: Address,
        method: String,
        args: Vec<Value>,
    },
}

/// A deterministic in-memory chain.
///
/// Deploys get `CREATE` addresses derived from the sender and its nonce, and
/// every transaction mines one block. Reads are answered from stubs registered
/// per artifact with [`SimulatedChain::with_field`]. In lenient mode, unstubbed
/// reads return a number derived from the request instead of failing, which is
/// enough to rehearse a plan offline.
#[derive(Debug, Clone)]
pub struct SimulatedChain {
    sender: Address,
    nonce: u64,
    block: BlockInfo,
    lenient: bool,
    contracts: HashMap<Address, String>,
    fields: HashMap<(String, String), Value>,
    field_args: HashMap<(String, String, Vec<Value>), Value>,
    failing_deploys: HashSet<String>,
    failing_calls: HashSet<String>,
    transactions: Vec<Transaction>,
    requests: usize,
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedChain {
    pub fn new() -> Self {
        Self {
            sender: DEFAULT_SENDER,
            nonce: 0,
            block: BlockInfo {
                number: 1,
                timestamp: 1_700_000_000,
            },
            lenient: false,
            contracts: HashMap::new(),
            fields: HashMap::new(),
            field_args: HashMap::new(),
            failing_deploys: HashSet::new(),
            failing_calls: HashSet::new(),
            transactions: Vec::new(),
            requests: 0,
        }
    }

    /// Answer unstubbed reads instead of failing them.
    pub fn lenient(mut self) -> Self {
        self.lenient = true;
        self
    }

    pub fn with_sender(mut self, sender: Address) -> Self {
        self.sender = sender;
        self
    }

    pub fn with_block(mut self, block: BlockInfo) -> Self {
        self.block = block;
        self
    }

    /// Stub `artifact.method` for any arguments.
    pub fn with_field(
        mut self,
        artifact: impl Into<String>,
        method: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.fields
            .insert((artifact.into(), method.into()), value.into());
        self
    }

    /// Stub `artifact.method(args)` for exactly these arguments.
    pub fn with_field_args(
        mut self,
        artifact: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
        value: impl Into<Value>,
    ) -> Self {
        self.field_args
            .insert((artifact.into(), method.into(), args), value.into());
        self
    }

    /// Make every deployment of `artifact` fail.
    pub fn fail_deploy(mut self, artifact: impl Into<String>) -> Self {
        self.failing_deploys.insert(artifact.into());
        self
    }

    /// Make every call to `method` fail, on any contract.
    pub fn fail_call(mut self, method: impl Into<String>) -> Self {
        self.failing_calls.insert(method.into());
        self
    }

    /// Transactions mined so far, in order.
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Number of requests served, reads included.
    pub fn request_count(&self) -> usize {
        self.requests
    }

    /// Artifact deployed at `address`, if any.
    pub fn artifact_at(&self, address: &Address) -> Option<&str> {
        self.contracts.get(address).map(String::as_str)
    }

    fn mine(&mut self, transaction: Transaction) -> B256 {
        self.block.number += 1;
        self.block.timestamp += BLOCK_TIME_SECS;
        let hash = keccak256(format!("{:?}/{}", transaction, self.block.number));
        self.transactions.push(transaction);
        hash
    }

    fn lookup(&self, artifact: &str, method: &str, args: &[Value]) -> Option<Value> {
        self.field_args
            .get(&(artifact.to_string(), method.to_string(), args.to_vec()))
            .or_else(|| self.fields.get(&(artifact.to_string(), method.to_string())))
            .cloned()
    }

    /// A stable non-zero 160-bit number for an unstubbed read, so it can be
    /// used both as an amount and as an address.
    fn synthetic_value(artifact: &str, method: &str, args: &[Value]) -> Value {
        let digest = keccak256(format!("{}.{}{:?}", artifact, method, args));
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&digest[12..]);
        word[31] |= 1;
        Value::Uint(U256::from_be_bytes(word))
    }
}

impl ChainTransport for SimulatedChain {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn latest_block(&mut self) -> Result<BlockInfo> {
        self.requests += 1;
        Ok(self.block)
    }

    async fn deploy(&mut self, artifact: &str, args: &[Value]) -> Result<Address> {
        self.requests += 1;
        if self.failing_deploys.contains(artifact) {
            anyhow::bail!("simulated deployment failure for {}", artifact);
        }

        let address = self.sender.create(self.nonce);
        self.nonce += 1;
        self.contracts.insert(address, artifact.to_string());
        self.mine(Transaction::Deploy {
            artifact: artifact.to_string(),
            address,
            args: args.to_vec(),
        });

        tracing::trace!(artifact, address = %address, "Simulated deployment");
        Ok(address)
    }

    async fn call(
        &mut self,
        contract: &DeployedContract,
        method: &str,
        args: &[Value],
    ) -> Result<B256> {
        self.requests += 1;
        if self.failing_calls.contains(method) {
            anyhow::bail!("simulated revert in {}.{}", contract.name, method);
        }

        self.nonce += 1;
        Ok(self.mine(Transaction::Call {
            artifact: contract.artifact.clone(),
            address: contract.address,
            method: method.to_string(),
            args: args.to_vec(),
        }))
    }

    async fn read(
        &mut self,
        contract: &DeployedContract,
        method: &str,
        args: &[Value],
    ) -> Result<Value> {
        self.requests += 1;
        match self.lookup(&contract.artifact, method, args) {
            Some(value) => Ok(value),
            None if self.lenient => {
                tracing::warn!(
                    contract = %contract.name,
                    method,
                    "No stub for simulated read, using a synthetic value"
                );
                Ok(Self::synthetic_value(&contract.artifact, method, args))
            }
            None => anyhow::bail!(
                "{} ({}) does not expose `{}`",
                contract.name,
                contract.artifact,
                method
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deploy_addresses_follow_nonce() {
        let mut chain = SimulatedChain::new();
        let first = chain.deploy("Hamster", &[]).await.unwrap();
        let second = chain.deploy("HShare", &[]).await.unwrap();

        assert_eq!(first, DEFAULT_SENDER.create(0));
        assert_eq!(second, DEFAULT_SENDER.create(1));
        assert_eq!(chain.artifact_at(&first), Some("Hamster"));
        assert_eq!(chain.transactions().len(), 2);
        assert_eq!(chain.latest_block().await.unwrap().number, 3);
    }

    #[tokio::test]
    async fn test_reads_prefer_exact_argument_stubs() {
        let mut chain = SimulatedChain::new()
            .with_field("HamsterRewardPool", "epochTotalRewards", 1u64)
            .with_field_args(
                "HamsterRewardPool",
                "epochTotalRewards",
                vec![Value::from(1u64)],
                2u64,
            );
        let pool = DeployedContract::deployed(
            "HamsterRewardPool",
            "HamsterRewardPool",
            Address::repeat_byte(1),
            "testnet",
        );

        let any = chain.read(&pool, "epochTotalRewards", &[Value::from(0u64)]).await;
        let exact = chain.read(&pool, "epochTotalRewards", &[Value::from(1u64)]).await;
        assert_eq!(any.unwrap(), Value::from(1u64));
        assert_eq!(exact.unwrap(), Value::from(2u64));
    }

    #[tokio::test]
    async fn test_unstubbed_reads_fail_unless_lenient() {
        let pool = DeployedContract::deployed("Pool", "Pool", Address::repeat_byte(1), "testnet");

        let mut strict = SimulatedChain::new();
        assert!(strict.read(&pool, "totalRewards", &[]).await.is_err());

        let mut lenient = SimulatedChain::new().lenient();
        let first = lenient.read(&pool, "totalRewards", &[]).await.unwrap();
        let second = lenient.read(&pool, "totalRewards", &[]).await.unwrap();
        assert_eq!(first, second);
        assert_ne!(first, Value::Uint(U256::ZERO));
        assert!(first.as_uint().unwrap().bit_len() <= 160);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let mut chain = SimulatedChain::new().fail_deploy("B").fail_call("transferOperator");
        assert!(chain.deploy("B", &[]).await.is_err());

        let a = chain.deploy("A", &[]).await.unwrap();
        let a = DeployedContract::deployed("A", "A", a, "testnet");
        assert!(chain.call(&a, "transferOperator", &[]).await.is_err());
        assert!(chain.call(&a, "initialize", &[]).await.is_ok());
        assert_eq!(chain.transactions().len(), 2);
    }
}
