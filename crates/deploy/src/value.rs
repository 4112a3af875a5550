//! Resolved argument values exchanged with the chain transport.

use std::fmt;

use alloy_core::primitives::{Address, U256};
use serde::{Deserialize, Deserializer, Serialize};

/// A fully resolved argument or read-back value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Uint(U256),
    Bool(bool),
    Text(String),
    Address(Address),
    List(Vec<Value>),
}

impl Value {
    pub fn as_address(&self) -> Option<Address> {
        match self {
            Value::Address(address) => Some(*address),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<U256> {
        match self {
            Value::Uint(value) => Some(*value),
            _ => None,
        }
    }

    /// Short name of the value's shape, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Uint(_) => "uint",
            Value::Bool(_) => "bool",
            Value::Text(_) => "text",
            Value::Address(_) => "address",
            Value::List(_) => "list",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Uint(value) => write!(f, "{}", value),
            Value::Bool(value) => write!(f, "{}", value),
            Value::Text(value) => write!(f, "{:?}", value),
            Value::Address(address) => write!(f, "{}", address),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<Address> for Value {
    fn from(address: Address) -> Self {
        Value::Address(address)
    }
}

impl From<U256> for Value {
    fn from(value: U256) -> Self {
        Value::Uint(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Uint(U256::from(value))
    }
}

/// Parse an unsigned integer literal.
///
/// Accepts decimal (`1000`), hex (`0x3e8`), `_` separators and a decimal
/// exponent suffix (`9000e18`).
pub fn parse_uint(literal: &str) -> anyhow::Result<U256> {
    let cleaned = literal.trim().replace('_', "");
    if cleaned.is_empty() {
        anyhow::bail!("empty integer literal");
    }

    if let Some(hex) = cleaned.strip_prefix("0x") {
        return U256::from_str_radix(hex, 16)
            .map_err(|e| anyhow::anyhow!("invalid hex integer `{}`: {}", literal, e));
    }

    let (mantissa, exponent) = match cleaned.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => {
            let exponent: u64 = exponent
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid exponent in `{}`: {}", literal, e))?;
            (mantissa, exponent)
        }
        None => (cleaned.as_str(), 0),
    };
    if mantissa.is_empty() {
        anyhow::bail!("invalid integer `{}`", literal);
    }

    let mantissa = U256::from_str_radix(mantissa, 10)
        .map_err(|e| anyhow::anyhow!("invalid integer `{}`: {}", literal, e))?;
    let scale = U256::from(10u64)
        .checked_pow(U256::from(exponent))
        .ok_or_else(|| anyhow::anyhow!("integer `{}` overflows uint256", literal))?;

    mantissa
        .checked_mul(scale)
        .ok_or_else(|| anyhow::anyhow!("integer `{}` overflows uint256", literal))
}

/// Deserialize a `U256` from either a TOML/JSON integer or a string literal
/// understood by [`parse_uint`].
pub(crate) fn deserialize_uint<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(value) => Ok(U256::from(value)),
        Raw::Str(literal) => parse_uint(&literal).map_err(serde::de::Error::custom),
    }
}

/// Serialize a `U256` as a decimal string so plans round-trip readably.
pub(crate) fn serialize_uint<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&value.to_string())
}
