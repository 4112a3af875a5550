//! JSON-RPC chain transport.

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;

use super::{ArtifactStore, BlockInfo, ChainTransport};
use crate::{
    environment::Environment,
    registry::DeployedContract,
    rpc::{create_client, deserialize_u64_from_hex, json_rpc_call, to_hex_quantity},
    value::Value,
};

/// Default interval between receipt and confirmation polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct RawBlock {
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    number: u64,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    timestamp: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Receipt {
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    block_number: u64,
    /// Absent on pre-Byzantium chains.
    status: Option<String>,
    contract_address: Option<Address>,
}

/// Sends transactions from a node-managed account with `eth_sendTransaction`.
///
/// Each transaction is awaited until its receipt is mined and the
/// environment's confirmation count is reached. If no receipt shows up within
/// `timeout_blocks` blocks the transaction is considered lost.
#[derive(Debug)]
pub struct RpcTransport {
    client: reqwest::Client,
    url: String,
    sender: Address,
    gas_price: Option<u64>,
    confirmations: u64,
    timeout_blocks: u64,
    poll_interval: Duration,
    artifacts: ArtifactStore,
}

impl RpcTransport {
    /// Connect to the environment's endpoint.
    ///
    /// Checks the network id when the environment pins one, and picks the
    /// sender: the configured `from` account, or the node's first account.
    pub async fn connect(env: &Environment, artifacts: ArtifactStore) -> Result<Self> {
        let client = create_client()?;
        let url = env.rpc_url.to_string();

        if let Some(expected) = env.network_id {
            let version: String = json_rpc_call(&client, &url, "net_version", vec![])
                .await
                .context(format!("Failed to reach {} at {}", env.name, url))?;
            let actual: u64 = version
                .parse()
                .context(format!("Invalid network id {}", version))?;
            if actual != expected {
                anyhow::bail!(
                    "{} expects network id {} but {} reports {}",
                    env.name,
                    expected,
                    url,
                    actual
                );
            }
        }

        let sender = match env.from {
            Some(from) => from,
            None => {
                let accounts: Vec<Address> =
                    json_rpc_call(&client, &url, "eth_accounts", vec![]).await?;
                accounts
                    .first()
                    .copied()
                    .context(format!("{} exposes no unlocked account", url))?
            }
        };

        tracing::info!(
            environment = %env.name,
            url = %url,
            sender = %sender,
            "Connected to chain"
        );

        Ok(Self {
            client,
            url,
            sender,
            gas_price: env.gas_price,
            confirmations: env.confirmations,
            timeout_blocks: env.timeout_blocks,
            poll_interval: DEFAULT_POLL_INTERVAL,
            artifacts,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn block_number(&self) -> Result<u64> {
        let number: String =
            json_rpc_call(&self.client, &self.url, "eth_blockNumber", vec![]).await?;
        crate::rpc::parse_hex_quantity(&number)
    }

    /// Send a transaction and wait until it is mined and confirmed.
    async fn send_transaction(&self, to: Option<Address>, data: Bytes) -> Result<(B256, Receipt)> {
        let start = self.block_number().await?;

        let mut tx = json!({
            "from": self.sender,
            "data": data,
        });
        if let Some(to) = to {
            tx["to"] = json!(to);
        }
        if let Some(gas_price) = self.gas_price {
            tx["gasPrice"] = json!(to_hex_quantity(gas_price));
        }

        let hash: B256 =
            json_rpc_call(&self.client, &self.url, "eth_sendTransaction", vec![tx]).await?;
        tracing::debug!(tx = %hash, "Transaction sent");

        let receipt = loop {
            let receipt: Option<Receipt> = json_rpc_call(
                &self.client,
                &self.url,
                "eth_getTransactionReceipt",
                vec![json!(hash)],
            )
            .await?;
            if let Some(receipt) = receipt {
                break receipt;
            }

            let current = self.block_number().await?;
            if current > start.saturating_add(self.timeout_blocks) {
                anyhow::bail!(
                    "Transaction {} was not mined within {} blocks",
                    hash,
                    self.timeout_blocks
                );
            }
            tokio::time::sleep(self.poll_interval).await;
        };

        if receipt.status.as_deref() == Some("0x0") {
            anyhow::bail!("Transaction {} reverted", hash);
        }

        let target = receipt.block_number.saturating_add(self.confirmations);
        while self.block_number().await? < target {
            tracing::trace!(tx = %hash, target, "Waiting for confirmations");
            tokio::time::sleep(self.poll_interval).await;
        }

        tracing::debug!(tx = %hash, block = receipt.block_number, "Transaction confirmed");
        Ok((hash, receipt))
    }
}

impl ChainTransport for RpcTransport {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn latest_block(&mut self) -> Result<BlockInfo> {
        let block: RawBlock = json_rpc_call(
            &self.client,
            &self.url,
            "eth_getBlockByNumber",
            vec![json!("latest"), json!(false)],
        )
        .await?;

        Ok(BlockInfo {
            number: block.number,
            timestamp: block.timestamp,
        })
    }

    async fn deploy(&mut self, artifact: &str, args: &[Value]) -> Result<Address> {
        let data = self.artifacts.get(artifact)?.deploy_data(args)?;
        let (hash, receipt) = self.send_transaction(None, data).await?;

        let address = receipt
            .contract_address
            .context(format!("Receipt of {} has no contract address", hash))?;
        tracing::debug!(artifact, address = %address, tx = %hash, "Contract created");
        Ok(address)
    }

    async fn call(
        &mut self,
        contract: &DeployedContract,
        method: &str,
        args: &[Value],
    ) -> Result<B256> {
        let data = self
            .artifacts
            .get(&contract.artifact)?
            .call_data(method, args)?;
        let (hash, _) = self.send_transaction(Some(contract.address), data).await?;
        Ok(hash)
    }

    async fn read(
        &mut self,
        contract: &DeployedContract,
        method: &str,
        args: &[Value],
    ) -> Result<Value> {
        let data = self
            .artifacts
            .get(&contract.artifact)?
            .call_data(method, args)?;

        let output: Bytes = json_rpc_call(
            &self.client,
            &self.url,
            "eth_call",
            vec![
                json!({
                    "from": self.sender,
                    "to": contract.address,
                    "data": data,
                }),
                json!("latest"),
            ],
        )
        .await?;

        self.artifacts
            .get(&contract.artifact)?
            .decode_output(method, args.len(), &output)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    };

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };
    use url::Url;

    use super::*;
    use crate::environment::Variant;

    const TX_HASH: B256 = B256::repeat_byte(0xab);

    /// A node answering `eth_blockNumber` with a block that advances on every
    /// request, and `eth_getTransactionReceipt` with a fixed receipt.
    struct Node {
        next_block: AtomicU64,
        receipt: serde_json::Value,
    }

    impl Node {
        fn new(first_block: u64, receipt: serde_json::Value) -> Arc<Self> {
            Arc::new(Self {
                next_block: AtomicU64::new(first_block),
                receipt,
            })
        }

        /// Last block number the node reported.
        fn last_block(&self) -> u64 {
            self.next_block.load(Ordering::SeqCst) - 1
        }

        fn answer(&self, request: &serde_json::Value) -> serde_json::Value {
            let result = match request["method"].as_str() {
                Some("eth_blockNumber") => {
                    json!(to_hex_quantity(self.next_block.fetch_add(1, Ordering::SeqCst)))
                }
                Some("eth_sendTransaction") => json!(TX_HASH),
                Some("eth_getTransactionReceipt") => self.receipt.clone(),
                other => {
                    return json!({
                        "jsonrpc": "2.0",
                        "id": request["id"],
                        "error": { "code": -32601, "message": format!("{:?} not supported", other) }
                    });
                }
            };
            json!({ "jsonrpc": "2.0", "id": request["id"], "result": result })
        }
    }

    async fn read_request(socket: &mut TcpStream) -> serde_json::Value {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            buf.extend_from_slice(&chunk[..n]);

            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let length = headers
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|value| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                let body = end + 4;
                if buf.len() >= body + length {
                    return serde_json::from_slice(&buf[body..body + length]).unwrap();
                }
            }
            assert!(n > 0, "connection closed mid-request");
        }
    }

    /// Serve `node` over HTTP on a local port and return its URL.
    async fn serve(node: Arc<Node>) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let node = node.clone();
                tokio::spawn(async move {
                    let request = read_request(&mut socket).await;
                    let body = node.answer(&request).to_string();
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    socket.write_all(response.as_bytes()).await.unwrap();
                });
            }
        });

        url
    }

    async fn transport(url: Url, confirmations: u64, timeout_blocks: u64) -> RpcTransport {
        let mut env = Environment::new("local", url, Variant::Mock);
        env.from = Some(Address::repeat_byte(0x42));
        env.confirmations = confirmations;
        env.timeout_blocks = timeout_blocks;

        RpcTransport::connect(&env, ArtifactStore::new("build/contracts"))
            .await
            .unwrap()
            .with_poll_interval(Duration::from_millis(1))
    }

    fn receipt(block: &str, status: &str) -> serde_json::Value {
        json!({
            "transactionHash": TX_HASH,
            "blockNumber": block,
            "status": status,
            "contractAddress": "0x4242424242424242424242424242424242424242"
        })
    }

    #[tokio::test]
    async fn test_unmined_transaction_times_out() {
        let node = Node::new(10, serde_json::Value::Null);
        let transport = transport(serve(node.clone()).await, 0, 3).await;

        let err = transport
            .send_transaction(None, Bytes::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("was not mined within 3 blocks"));
        // Started at block 10 and gave up on the first block past 13.
        assert_eq!(node.last_block(), 14);
    }

    #[tokio::test]
    async fn test_reverted_transaction_fails() {
        let node = Node::new(16, receipt("0x10", "0x0"));
        let transport = transport(serve(node).await, 2, 100).await;

        let err = transport
            .send_transaction(None, Bytes::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("reverted"));
    }

    #[tokio::test]
    async fn test_waits_for_confirmations() {
        let node = Node::new(10, receipt("0x10", "0x1"));
        let transport = transport(serve(node.clone()).await, 2, 100).await;

        let (hash, receipt) = transport
            .send_transaction(None, Bytes::new())
            .await
            .unwrap();

        assert_eq!(hash, TX_HASH);
        assert_eq!(receipt.block_number, 16);
        // Mined at 16, so done exactly when the node reports 16 + 2.
        assert_eq!(node.last_block(), 18);
    }

    #[test]
    fn test_receipt_parsing() {
        let receipt: Receipt = serde_json::from_value(json!({
            "blockNumber": "0x1b4",
            "status": "0x1",
            "contractAddress": "0x4242424242424242424242424242424242424242",
            "transactionHash": "0x00"
        }))
        .unwrap();

        assert_eq!(receipt.block_number, 436);
        assert_eq!(receipt.status.as_deref(), Some("0x1"));
        assert_eq!(receipt.contract_address, Some(Address::repeat_byte(0x42)));
    }

    #[test]
    fn test_receipt_without_contract_address() {
        let receipt: Receipt = serde_json::from_value(json!({
            "blockNumber": "0x1",
            "status": "0x0",
            "contractAddress": null
        }))
        .unwrap();

        assert_eq!(receipt.contract_address, None);
    }

    #[test]
    fn test_block_parsing() {
        let block: RawBlock = serde_json::from_value(json!({
            "number": "0x10",
            "timestamp": "0x6553f100",
            "hash": "0xab"
        }))
        .unwrap();

        assert_eq!(block.number, 16);
        assert_eq!(block.timestamp, 1_700_000_000);
    }
}
