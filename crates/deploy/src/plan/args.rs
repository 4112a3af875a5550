//! Argument descriptors for constructors and configuration calls.

use alloy_core::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::value::{deserialize_uint, serialize_uint};

/// Seconds in a day, for `days` literals.
pub const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// A constructor or call argument, either literal or resolved at run time.
///
/// In TOML plans each descriptor is a one-key table, e.g. `{ uint = "1e18" }`,
/// `{ contract = "Treasury" }` or `{ field = "Treasury.PERIOD" }`, except
/// `"sender"` which is a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arg {
    /// Unsigned integer literal.
    Uint(
        #[serde(deserialize_with = "deserialize_uint", serialize_with = "serialize_uint")] U256,
    ),
    /// A duration in days, passed as seconds.
    Days(u64),
    Bool(bool),
    Text(String),
    /// Literal address.
    Address(Address),
    /// Address of a registered contract.
    Contract(String),
    /// Value read from a registered contract.
    Field(FieldRef),
    /// Address from the environment's known-address map.
    Known(String),
    /// Named account of the environment, the sender when unset.
    Account(String),
    /// The sending account.
    Sender,
    /// Latest block timestamp plus an offset in seconds.
    Timestamp(u64),
    /// Sum of unsigned integer arguments.
    Sum(Vec<Arg>),
    /// Array argument.
    List(Vec<Arg>),
}

impl Arg {
    pub fn uint(value: impl Into<U256>) -> Self {
        Arg::Uint(value.into())
    }

    pub fn contract(name: impl Into<String>) -> Self {
        Arg::Contract(name.into())
    }

    pub fn field(contract: impl Into<String>, field: impl Into<String>) -> Self {
        Arg::Field(FieldRef::new(contract, field))
    }

    /// Contract names this argument needs registered before it can resolve.
    pub fn contract_refs(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        self.collect_refs(&mut refs, &mut Vec::new());
        refs
    }

    /// Known-address keys this argument reads from the environment.
    pub fn known_refs(&self) -> Vec<&str> {
        let mut known = Vec::new();
        self.collect_refs(&mut Vec::new(), &mut known);
        known
    }

    fn collect_refs<'a>(&'a self, contracts: &mut Vec<&'a str>, known: &mut Vec<&'a str>) {
        match self {
            Arg::Contract(name) => contracts.push(name),
            Arg::Field(field) => {
                contracts.push(&field.contract);
                for arg in &field.args {
                    arg.collect_refs(contracts, known);
                }
            }
            Arg::Known(name) => known.push(name),
            Arg::Sum(args) | Arg::List(args) => {
                for arg in args {
                    arg.collect_refs(contracts, known);
                }
            }
            Arg::Uint(_)
            | Arg::Days(_)
            | Arg::Bool(_)
            | Arg::Text(_)
            | Arg::Address(_)
            | Arg::Account(_)
            | Arg::Sender
            | Arg::Timestamp(_) => {}
        }
    }
}

/// A read of `contract.field(args...)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawFieldRef")]
pub struct FieldRef {
    pub contract: String,
    pub field: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Arg>,
}

impl FieldRef {
    pub fn new(contract: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            contract: contract.into(),
            field: field.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Arg>) -> Self {
        self.args = args;
        self
    }
}

impl std::fmt::Display for FieldRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.contract, self.field)
    }
}

/// Field references are written either as `"Contract.field"` or as a table
/// with call arguments.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawFieldRef {
    Path(String),
    Full {
        contract: String,
        field: String,
        #[serde(default)]
        args: Vec<Arg>,
    },
}

impl TryFrom<RawFieldRef> for FieldRef {
    type Error = String;

    fn try_from(raw: RawFieldRef) -> Result<Self, Self::Error> {
        match raw {
            RawFieldRef::Path(path) => match path.split_once('.') {
                Some((contract, field)) if !contract.is_empty() && !field.is_empty() => {
                    Ok(FieldRef::new(contract, field))
                }
                _ => Err(format!(
                    "field reference `{}` must look like `Contract.field`",
                    path
                )),
            },
            RawFieldRef::Full {
                contract,
                field,
                args,
            } => Ok(FieldRef {
                contract,
                field,
                args,
            }),
        }
    }
}
