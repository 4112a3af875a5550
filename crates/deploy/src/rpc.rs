//! Shared utilities for talking to Ethereum JSON-RPC endpoints.

use std::{fmt, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    /// Revert data and other node-specific details.
    #[serde(default)]
    pub data: Option<Value>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)?;
        if let Some(data) = &self.data {
            write!(f, ": {}", data)?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Vec<Value>,
}

/// Send `method` and deserialize its result.
///
/// Node errors come back as an [`RpcError`] that callers can downcast to.
/// A `null` result is passed to the deserializer as-is, so a caller polling
/// for something that may not exist yet (a receipt) asks for an `Option`.
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, anyhow::Error> {
    let response: Value = client
        .post(url)
        .json(&Request {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        })
        .send()
        .await
        .with_context(|| format!("Failed to send {} request", method))?
        .json()
        .await
        .with_context(|| format!("Failed to parse {} response", method))?;

    parse_response(method, response)
}

fn parse_response<T: DeserializeOwned>(method: &str, response: Value) -> Result<T, anyhow::Error> {
    let Value::Object(mut response) = response else {
        anyhow::bail!("{} response is not a JSON object", method);
    };

    if let Some(error) = response.remove("error").filter(|error| !error.is_null()) {
        let error: RpcError = serde_json::from_value(error)
            .with_context(|| format!("Malformed error in {} response", method))?;
        return Err(anyhow::Error::new(error).context(format!("{} failed", method)));
    }

    let result = response
        .remove("result")
        .with_context(|| format!("No result in {} response", method))?;
    serde_json::from_value(result)
        .with_context(|| format!("Failed to deserialize {} result", method))
}

/// Format a quantity the way JSON-RPC expects it.
pub fn to_hex_quantity(value: u64) -> String {
    format!("{:#x}", value)
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_hex_quantity(quantity: &str) -> Result<u64, anyhow::Error> {
    u64::from_str_radix(quantity.trim_start_matches("0x"), 16)
        .with_context(|| format!("Invalid hex quantity {}", quantity))
}

/// Deserialize a u64 from a hex string (with 0x prefix).
pub fn deserialize_u64_from_hex<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    parse_hex_quantity(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_quantities() {
        assert_eq!(to_hex_quantity(0), "0x0");
        assert_eq!(to_hex_quantity(4002), "0xfa2");
        assert_eq!(parse_hex_quantity("0xfa2").unwrap(), 4002);
        assert!(parse_hex_quantity("0xzz").is_err());
    }

    #[test]
    fn test_node_error_keeps_code() {
        let err = parse_response::<String>(
            "eth_sendTransaction",
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "insufficient funds for gas" }
            }),
        )
        .unwrap_err();

        let rpc = err.downcast_ref::<RpcError>().unwrap();
        assert_eq!(rpc.code, -32000);
        assert_eq!(
            format!("{err:#}"),
            "eth_sendTransaction failed: insufficient funds for gas (code -32000)"
        );
    }

    #[test]
    fn test_null_result_and_missing_result() {
        let receipt: Option<String> = parse_response(
            "eth_getTransactionReceipt",
            serde_json::json!({ "jsonrpc": "2.0", "id": 1, "result": null, "error": null }),
        )
        .unwrap();
        assert_eq!(receipt, None);

        let err = parse_response::<String>("eth_chainId", serde_json::json!({ "id": 1 }))
            .unwrap_err();
        assert!(err.to_string().contains("No result in eth_chainId response"));

        assert!(parse_response::<String>("eth_chainId", serde_json::json!("0x1")).is_err());
    }

    #[test]
    fn test_deserialize_u64_from_hex() {
        #[derive(Deserialize)]
        struct Block {
            #[serde(deserialize_with = "deserialize_u64_from_hex")]
            number: u64,
        }

        let block: Block = serde_json::from_str(r#"{"number":"0x10"}"#).unwrap();
        assert_eq!(block.number, 16);
    }
}
