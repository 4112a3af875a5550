//! Contract artifacts and ABI conversion.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue, FunctionExt, JsonAbiExt, Specifier},
    json_abi::{Function, JsonAbi, Param},
    primitives::{Address, B256, Bytes, I256, Sign},
};
use anyhow::{Context, Result};
use serde_json::Value as Json;

use crate::value::Value;

/// A compiled contract: its ABI and creation bytecode.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub abi: JsonAbi,
    pub bytecode: Bytes,
}

impl Artifact {
    /// Parse a Truffle, Hardhat or Foundry artifact.
    ///
    /// Truffle and Hardhat store the bytecode as a hex string, Foundry as
    /// `{ "object": "0x..." }`.
    pub fn from_json(name: &str, json: &Json) -> Result<Self> {
        let abi: JsonAbi = serde_json::from_value(
            json.get("abi")
                .cloned()
                .context("Artifact has no `abi` field")?,
        )
        .context("Failed to parse artifact ABI")?;

        let bytecode = match json.get("bytecode") {
            Some(Json::String(hex)) => hex.as_str(),
            Some(Json::Object(object)) => object
                .get("object")
                .and_then(Json::as_str)
                .context("Artifact bytecode object has no `object` field")?,
            _ => anyhow::bail!("Artifact has no `bytecode` field"),
        };
        if bytecode.contains("__") {
            anyhow::bail!("Artifact {} has unlinked library placeholders", name);
        }
        let bytecode = hex::decode(bytecode.trim_start_matches("0x"))
            .context("Artifact bytecode is not valid hex")?;

        Ok(Self {
            name: name.to_string(),
            abi,
            bytecode: bytecode.into(),
        })
    }

    /// Load `<dir>/<name>.json`.
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let path = dir.join(format!("{}.json", name));
        let content = std::fs::read_to_string(&path)
            .context(format!("Failed to read artifact {}", path.display()))?;
        let json: Json = serde_json::from_str(&content)
            .context(format!("Failed to parse artifact {}", path.display()))?;
        Self::from_json(name, &json).context(format!("Invalid artifact {}", path.display()))
    }

    /// Creation bytecode followed by the ABI-encoded constructor arguments.
    pub fn deploy_data(&self, args: &[Value]) -> Result<Bytes> {
        let encoded = match &self.abi.constructor {
            Some(constructor) => {
                let values = encode_params(&constructor.inputs, args)
                    .context(format!("Invalid constructor arguments for {}", self.name))?;
                constructor.abi_encode_input(&values)?
            }
            None if args.is_empty() => Vec::new(),
            None => anyhow::bail!(
                "{} has no constructor but {} arguments were given",
                self.name,
                args.len()
            ),
        };

        let mut data = self.bytecode.to_vec();
        data.extend(encoded);
        Ok(data.into())
    }

    /// The overload of `method` taking `arity` arguments.
    pub fn function(&self, method: &str, arity: usize) -> Result<&Function> {
        self.abi
            .function(method)
            .and_then(|overloads| overloads.iter().find(|f| f.inputs.len() == arity))
            .with_context(|| {
                format!(
                    "{} has no function `{}` taking {} arguments",
                    self.name, method, arity
                )
            })
    }

    /// Selector-prefixed calldata for `method(args)`.
    pub fn call_data(&self, method: &str, args: &[Value]) -> Result<Bytes> {
        let function = self.function(method, args.len())?;
        let values = encode_params(&function.inputs, args)
            .context(format!("Invalid arguments for {}.{}", self.name, method))?;
        Ok(function.abi_encode_input(&values)?.into())
    }

    /// Decode the return data of `method`. Single outputs are unwrapped.
    pub fn decode_output(&self, method: &str, arity: usize, data: &[u8]) -> Result<Value> {
        let function = self.function(method, arity)?;
        let mut outputs = function
            .abi_decode_output(data, true)
            .context(format!("Failed to decode {}.{} output", self.name, method))?;

        Ok(match outputs.len() {
            1 => from_dyn(outputs.remove(0)),
            _ => Value::List(outputs.into_iter().map(from_dyn).collect()),
        })
    }
}

/// Loads artifacts from a directory on first use.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    cache: HashMap<String, Artifact>,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&mut self, name: &str) -> Result<&Artifact> {
        if !self.cache.contains_key(name) {
            let artifact = Artifact::load(&self.dir, name)?;
            tracing::debug!(artifact = name, dir = %self.dir.display(), "Artifact loaded");
            self.cache.insert(name.to_string(), artifact);
        }
        self.cache
            .get(name)
            .context(format!("Artifact {} missing from cache", name))
    }
}

fn encode_params(params: &[Param], args: &[Value]) -> Result<Vec<DynSolValue>> {
    if params.len() != args.len() {
        anyhow::bail!("expected {} arguments, got {}", params.len(), args.len());
    }

    params
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            let ty = param.resolve()?;
            to_dyn(arg, &ty).context(format!("argument `{}`", param.name))
        })
        .collect()
}

/// Convert a resolved value to the ABI type a parameter expects.
pub(crate) fn to_dyn(value: &Value, ty: &DynSolType) -> Result<DynSolValue> {
    Ok(match (value, ty) {
        (Value::Address(address), DynSolType::Address) => DynSolValue::Address(*address),
        (Value::Uint(raw), DynSolType::Address) => {
            if raw.bit_len() > 160 {
                anyhow::bail!("{} does not fit in an address", raw);
            }
            DynSolValue::Address(Address::from_word(B256::from(raw.to_be_bytes::<32>())))
        }
        (Value::Uint(raw), DynSolType::Uint(bits)) => {
            if raw.bit_len() > *bits {
                anyhow::bail!("{} does not fit in uint{}", raw, bits);
            }
            DynSolValue::Uint(*raw, *bits)
        }
        (Value::Uint(raw), DynSolType::Int(bits)) => {
            let signed = I256::checked_from_sign_and_abs(Sign::Positive, *raw)
                .filter(|_| raw.bit_len() < *bits)
                .with_context(|| format!("{} does not fit in int{}", raw, bits))?;
            DynSolValue::Int(signed, *bits)
        }
        (Value::Bool(flag), DynSolType::Bool) => DynSolValue::Bool(*flag),
        (Value::Text(text), _) => ty
            .coerce_str(text)
            .with_context(|| format!("cannot parse {:?} as {}", text, ty.sol_type_name()))?,
        (Value::List(items), DynSolType::Array(inner)) => DynSolValue::Array(
            items
                .iter()
                .map(|item| to_dyn(item, inner))
                .collect::<Result<_>>()?,
        ),
        (Value::List(items), DynSolType::FixedArray(inner, len)) if items.len() == *len => {
            DynSolValue::FixedArray(
                items
                    .iter()
                    .map(|item| to_dyn(item, inner))
                    .collect::<Result<_>>()?,
            )
        }
        (Value::List(items), DynSolType::Tuple(types)) if items.len() == types.len() => {
            DynSolValue::Tuple(
                items
                    .iter()
                    .zip(types)
                    .map(|(item, ty)| to_dyn(item, ty))
                    .collect::<Result<_>>()?,
            )
        }
        _ => anyhow::bail!(
            "cannot pass a {} value as {}",
            value.type_name(),
            ty.sol_type_name()
        ),
    })
}

/// Convert a decoded ABI value back into a [`Value`].
pub(crate) fn from_dyn(value: DynSolValue) -> Value {
    match value {
        DynSolValue::Address(address) => Value::Address(address),
        DynSolValue::Uint(raw, _) => Value::Uint(raw),
        DynSolValue::Int(signed, _) if signed.is_negative() => Value::Text(signed.to_string()),
        DynSolValue::Int(signed, _) => Value::Uint(signed.into_raw()),
        DynSolValue::Bool(flag) => Value::Bool(flag),
        DynSolValue::String(text) => Value::Text(text),
        DynSolValue::Bytes(bytes) => Value::Text(format!("0x{}", hex::encode(bytes))),
        DynSolValue::FixedBytes(word, size) => {
            Value::Text(format!("0x{}", hex::encode(&word[..size])))
        }
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::List(items.into_iter().map(from_dyn).collect())
        }
        other => Value::Text(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::U256;
    use serde_json::json;

    use super::*;

    fn oracle_artifact() -> Json {
        json!({
            "contractName": "Oracle",
            "abi": [
                {
                    "type": "constructor",
                    "stateMutability": "nonpayable",
                    "inputs": [
                        { "name": "_pair", "type": "address", "internalType": "address" },
                        { "name": "_period", "type": "uint256", "internalType": "uint256" },
                        { "name": "_startTime", "type": "uint256", "internalType": "uint256" }
                    ]
                },
                {
                    "type": "function",
                    "name": "update",
                    "stateMutability": "nonpayable",
                    "inputs": [],
                    "outputs": []
                },
                {
                    "type": "function",
                    "name": "PERIOD",
                    "stateMutability": "view",
                    "inputs": [],
                    "outputs": [{ "name": "", "type": "uint256", "internalType": "uint256" }]
                }
            ],
            "bytecode": "0x6080"
        })
    }

    #[test]
    fn test_parse_truffle_and_foundry_bytecode() {
        let truffle = Artifact::from_json("Oracle", &oracle_artifact()).unwrap();
        assert_eq!(truffle.bytecode.to_vec(), vec![0x60, 0x80]);

        let mut foundry = oracle_artifact();
        foundry["bytecode"] = json!({ "object": "0x6080" });
        let foundry = Artifact::from_json("Oracle", &foundry).unwrap();
        assert_eq!(foundry.bytecode, truffle.bytecode);
    }

    #[test]
    fn test_unlinked_bytecode_is_rejected() {
        let mut artifact = oracle_artifact();
        artifact["bytecode"] = json!("0x6080__$lib$__");
        assert!(Artifact::from_json("Oracle", &artifact).is_err());
    }

    #[test]
    fn test_deploy_data_appends_encoded_constructor_args() {
        let artifact = Artifact::from_json("Oracle", &oracle_artifact()).unwrap();
        let pair = Address::repeat_byte(0x11);
        let data = artifact
            .deploy_data(&[
                Value::Address(pair),
                Value::from(21600u64),
                Value::from(0u64),
            ])
            .unwrap();

        assert_eq!(data.len(), 2 + 3 * 32);
        assert_eq!(&data[..2], &[0x60, 0x80]);
        assert_eq!(&data[2 + 12..2 + 32], pair.as_slice());
        assert_eq!(
            U256::from_be_slice(&data[2 + 32..2 + 64]),
            U256::from(21600u64)
        );
    }

    #[test]
    fn test_deploy_data_checks_arity_and_types() {
        let artifact = Artifact::from_json("Oracle", &oracle_artifact()).unwrap();
        assert!(artifact.deploy_data(&[Value::from(1u64)]).is_err());
        assert!(
            artifact
                .deploy_data(&[Value::Bool(true), Value::from(1u64), Value::from(0u64)])
                .is_err()
        );
    }

    #[test]
    fn test_call_data_and_output_decoding() {
        let artifact = Artifact::from_json("Oracle", &oracle_artifact()).unwrap();

        let data = artifact.call_data("update", &[]).unwrap();
        assert_eq!(data.len(), 4);
        assert!(artifact.call_data("update", &[Value::from(1u64)]).is_err());

        let output = U256::from(21600u64).to_be_bytes::<32>();
        let period = artifact.decode_output("PERIOD", 0, &output).unwrap();
        assert_eq!(period, Value::from(21600u64));
    }

    #[test]
    fn test_to_dyn_conversions() {
        let address_from_uint = to_dyn(&Value::from(1u64), &DynSolType::Address).unwrap();
        assert_eq!(
            address_from_uint,
            DynSolValue::Address(Address::with_last_byte(1))
        );

        let list = to_dyn(
            &Value::List(vec![Value::Address(Address::ZERO)]),
            &DynSolType::Array(Box::new(DynSolType::Address)),
        )
        .unwrap();
        assert_eq!(list, DynSolValue::Array(vec![DynSolValue::Address(Address::ZERO)]));

        assert!(to_dyn(&Value::from(256u64), &DynSolType::Uint(8)).is_err());
        assert!(to_dyn(&Value::Text("abc".into()), &DynSolType::Uint(256)).is_err());
    }
}
