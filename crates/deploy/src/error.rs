//! Errors that can stop a deployment run.

use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

use alloy_core::primitives::Address;

/// Errors raised while resolving, deploying or configuring contracts.
///
/// Every variant is terminal for the current run: blockchain actions are not
/// idempotent, so nothing here is retried.
#[derive(Debug)]
pub enum DeployError {
    /// The requested environment is not configured.
    UnknownEnvironment {
        name: String,
        known: Vec<String>,
    },
    /// A logical name was registered twice in the same run. `existing` is
    /// unknown when the duplicate is found before anything is deployed.
    DuplicateRegistration {
        name: String,
        existing: Option<Address>,
    },
    /// A reference points to a contract that is not registered.
    UnresolvedReference { name: String },
    /// An on-chain value could not be read back from a registered contract.
    ReferenceResolution {
        contract: String,
        field: String,
        reason: String,
    },
    /// The transport failed to deploy a contract.
    DeploymentFailed {
        name: String,
        artifact: String,
        source: anyhow::Error,
    },
    /// The transport failed to execute a configuration call.
    ConfigurationCallFailed {
        target: String,
        method: String,
        source: anyhow::Error,
    },
}

impl DeployError {
    /// Stable, human readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::UnknownEnvironment { .. } => "UnknownEnvironment",
            DeployError::DuplicateRegistration { .. } => "DuplicateRegistration",
            DeployError::UnresolvedReference { .. } => "UnresolvedReference",
            DeployError::ReferenceResolution { .. } => "ReferenceResolutionError",
            DeployError::DeploymentFailed { .. } => "DeploymentFailed",
            DeployError::ConfigurationCallFailed { .. } => "ConfigurationCallFailed",
        }
    }
}

impl Display for DeployError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DeployError::UnknownEnvironment { name, known } => write!(
                f,
                "unknown environment `{}` (known: {})",
                name,
                known.join(", ")
            ),
            DeployError::DuplicateRegistration {
                name,
                existing: Some(existing),
            } => write!(
                f,
                "contract `{}` is already registered at {}",
                name, existing
            ),
            DeployError::DuplicateRegistration {
                name,
                existing: None,
            } => write!(f, "contract `{}` is registered more than once", name),
            DeployError::UnresolvedReference { name } => {
                write!(f, "contract `{}` is not registered", name)
            }
            DeployError::ReferenceResolution {
                contract,
                field,
                reason,
            } => write!(f, "failed to read `{}.{}`: {}", contract, field, reason),
            DeployError::DeploymentFailed {
                name,
                artifact,
                source,
            } => write!(
                f,
                "failed to deploy `{}` ({}): {:#}",
                name, artifact, source
            ),
            DeployError::ConfigurationCallFailed {
                target,
                method,
                source,
            } => write!(f, "call `{}.{}` failed: {:#}", target, method, source),
        }
    }
}

impl Error for DeployError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DeployError::DeploymentFailed { source, .. }
            | DeployError::ConfigurationCallFailed { source, .. } => Some(&**source),
            _ => None,
        }
    }
}

/// Where a run stopped, and why.
#[derive(Debug)]
pub struct RunFailure {
    /// 1-based index of the failing step.
    pub step: usize,
    /// Name of the failing step.
    pub step_name: String,
    /// 0-based index of the failing action within the step. Deploy actions
    /// come first, followed by configuration calls.
    pub action: usize,
    /// The underlying error.
    pub cause: DeployError,
}

impl Display for RunFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step {} ({}) failed at action {}: {}",
            self.step, self.step_name, self.action, self.cause
        )
    }
}

impl Error for RunFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.cause)
    }
}
