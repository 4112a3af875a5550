//! Chain transports.
//!
//! The orchestrator talks to the chain only through [`ChainTransport`]. Two
//! implementations ship with the crate:
//! - [`RpcTransport`] sends transactions over JSON-RPC from an account the node
//!   manages, encoding arguments with the contract artifacts' ABIs;
//! - [`SimulatedChain`] keeps everything in memory, for tests and dry runs.

mod artifact;
mod rpc;
mod simulated;

use std::future::Future;

use alloy_core::primitives::{Address, B256};
use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use artifact::{Artifact, ArtifactStore};
pub use rpc::RpcTransport;
pub use simulated::{SimulatedChain, Transaction};

use crate::{registry::DeployedContract, value::Value};

/// Metadata of the latest block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub number: u64,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
}

/// Request/response access to a chain.
///
/// Every method blocks the caller until the chain has answered: transactions
/// resolve once included (and confirmed, if the transport waits for
/// confirmations). Nothing is retried here; a submitted transaction is never
/// resubmitted.
pub trait ChainTransport: Send {
    /// Account transactions are sent from.
    fn sender(&self) -> Address;

    /// Latest block number and timestamp.
    fn latest_block(&mut self) -> impl Future<Output = Result<BlockInfo>> + Send;

    /// Deploy `artifact` with constructor arguments, returning its address.
    fn deploy(
        &mut self,
        artifact: &str,
        args: &[Value],
    ) -> impl Future<Output = Result<Address>> + Send;

    /// Send a state-changing call, returning the transaction hash.
    fn call(
        &mut self,
        contract: &DeployedContract,
        method: &str,
        args: &[Value],
    ) -> impl Future<Output = Result<B256>> + Send;

    /// Read a value without sending a transaction.
    fn read(
        &mut self,
        contract: &DeployedContract,
        method: &str,
        args: &[Value],
    ) -> impl Future<Output = Result<Value>> + Send;
}
