//! Execution of a single provisioning step.

use std::{future::Future, pin::Pin};

use alloy_core::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::{
    DeployError, RunFailure,
    environment::Environment,
    plan::{Arg, ConfigurationCall, DeployAction, ProvisioningStep, SECONDS_PER_DAY},
    registry::{ContractRegistry, DeployedContract},
    transport::ChainTransport,
    value::Value,
};

type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, DeployError>> + Send + 'a>>;

/// What a step did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub index: usize,
    pub name: String,
    /// The step's condition did not hold in the environment.
    pub skipped: bool,
    /// Names registered by the step, in order.
    pub registered: Vec<String>,
    /// Transactions sent by the step, deployments included.
    pub transactions: usize,
}

impl StepReport {
    fn new(step: &ProvisioningStep) -> Self {
        Self {
            index: step.index,
            name: step.name.clone(),
            skipped: false,
            registered: Vec::new(),
            transactions: 0,
        }
    }
}

/// Runs the actions of one step against the registry and the transport.
///
/// Actions run strictly in order: deploy actions first, then configuration
/// calls. The first failure stops the step.
pub struct StepExecutor<'a, T> {
    env: &'a Environment,
    registry: &'a mut ContractRegistry,
    transport: &'a mut T,
}

impl<'a, T: ChainTransport> StepExecutor<'a, T> {
    pub fn new(
        env: &'a Environment,
        registry: &'a mut ContractRegistry,
        transport: &'a mut T,
    ) -> Self {
        Self {
            env,
            registry,
            transport,
        }
    }

    /// Execute `step`, or skip it without touching the registry or the
    /// transport when its condition does not hold.
    pub async fn execute(&mut self, step: &ProvisioningStep) -> Result<StepReport, RunFailure> {
        let mut report = StepReport::new(step);
        let fail = |action: usize, cause: DeployError| RunFailure {
            step: step.index,
            step_name: step.name.clone(),
            action,
            cause,
        };

        if !step.enabled(self.env) {
            tracing::info!(
                step = step.index,
                name = %step.name,
                environment = %self.env.name,
                "Step skipped"
            );
            report.skipped = true;
            return Ok(report);
        }

        tracing::info!(step = step.index, name = %step.name, "Running step");

        for (i, action) in step.deploy.iter().enumerate() {
            let deployed = self.run_deploy(action).await.map_err(|e| fail(i, e))?;
            if deployed {
                report.transactions += 1;
            }
            report.registered.push(action.name().to_string());
        }

        for (j, call) in step.calls.iter().enumerate() {
            let sent = self
                .run_call(call)
                .await
                .map_err(|e| fail(step.deploy.len() + j, e))?;
            if sent {
                report.transactions += 1;
            }
        }

        tracing::info!(
            step = step.index,
            name = %step.name,
            registered = report.registered.len(),
            transactions = report.transactions,
            "Step completed"
        );
        Ok(report)
    }

    /// Returns whether a contract was deployed, as opposed to bound.
    async fn run_deploy(&mut self, action: &DeployAction) -> Result<bool, DeployError> {
        let name = action.name();
        self.ensure_unregistered(name)?;

        match action {
            DeployAction::Deploy(spec) => {
                let artifact = self.env.artifact_for(spec);

                if let Some(address) = self.env.known_address(name) {
                    tracing::info!(
                        name,
                        artifact,
                        address = %address,
                        "Using known address instead of deploying"
                    );
                    self.registry.register(DeployedContract::bound(
                        name,
                        artifact,
                        address,
                        &self.env.name,
                    ))?;
                    return Ok(false);
                }

                let args = self.resolve_args(&spec.args).await?;
                tracing::debug!(name, artifact, args = ?args, "Deploying contract");

                let address = self.transport.deploy(artifact, &args).await.map_err(|e| {
                    DeployError::DeploymentFailed {
                        name: name.to_string(),
                        artifact: artifact.to_string(),
                        source: e,
                    }
                })?;

                tracing::info!(name, artifact, address = %address, "Contract deployed");
                self.registry.register(DeployedContract::deployed(
                    name,
                    artifact,
                    address,
                    &self.env.name,
                ))?;
                Ok(true)
            }
            DeployAction::Bind { artifact, at, .. } => {
                let value = self.resolve_arg(at).await?;
                let address = bound_address(name, at, &value)?;

                tracing::info!(name, artifact = %artifact, address = %address, "Contract bound");
                self.registry.register(DeployedContract::bound(
                    name,
                    artifact.as_str(),
                    address,
                    &self.env.name,
                ))?;
                Ok(false)
            }
        }
    }

    /// Returns whether a transaction was sent.
    async fn run_call(&mut self, call: &ConfigurationCall) -> Result<bool, DeployError> {
        let args = self.resolve_args(&call.args).await?;
        let target = self.registry.resolve(&call.target)?.clone();

        let failed = |source: anyhow::Error| DeployError::ConfigurationCallFailed {
            target: call.target.clone(),
            method: call.method.clone(),
            source,
        };

        if call.view {
            let value = self
                .transport
                .read(&target, &call.method, &args)
                .await
                .map_err(failed)?;
            tracing::info!(
                target = %call.target,
                method = %call.method,
                args = ?args,
                value = %value,
                "View call"
            );
            return Ok(false);
        }

        let tx: B256 = self
            .transport
            .call(&target, &call.method, &args)
            .await
            .map_err(failed)?;
        tracing::info!(
            target = %call.target,
            method = %call.method,
            tx = %tx,
            "Configuration call executed"
        );
        Ok(true)
    }

    fn ensure_unregistered(&self, name: &str) -> Result<(), DeployError> {
        match self.registry.resolve(name) {
            Ok(existing) => Err(DeployError::DuplicateRegistration {
                name: name.to_string(),
                existing: Some(existing.address),
            }),
            Err(_) => Ok(()),
        }
    }

    async fn resolve_args(&mut self, args: &[Arg]) -> Result<Vec<Value>, DeployError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.resolve_arg(arg).await?);
        }
        Ok(values)
    }

    /// Turn an argument descriptor into a concrete value.
    fn resolve_arg<'b>(&'b mut self, arg: &'b Arg) -> ResolveFuture<'b> {
        Box::pin(async move {
            Ok(match arg {
                Arg::Uint(value) => Value::Uint(*value),
                Arg::Days(days) => Value::Uint(U256::from(*days) * U256::from(SECONDS_PER_DAY)),
                Arg::Bool(flag) => Value::Bool(*flag),
                Arg::Text(text) => Value::Text(text.clone()),
                Arg::Address(address) => Value::Address(*address),
                Arg::Contract(name) => Value::Address(self.registry.resolve(name)?.address),
                Arg::Known(name) => Value::Address(self.env.known_address(name).ok_or_else(
                    || DeployError::UnresolvedReference {
                        name: name.clone(),
                    },
                )?),
                Arg::Account(name) => Value::Address(
                    self.env
                        .account(name)
                        .unwrap_or_else(|| self.transport.sender()),
                ),
                Arg::Sender => Value::Address(self.transport.sender()),
                Arg::Timestamp(offset) => {
                    let block = self.transport.latest_block().await.map_err(|e| {
                        DeployError::ReferenceResolution {
                            contract: "latest block".to_string(),
                            field: "timestamp".to_string(),
                            reason: format!("{:#}", e),
                        }
                    })?;
                    Value::Uint(U256::from(block.timestamp) + U256::from(*offset))
                }
                Arg::Field(field) => {
                    let args = self.resolve_args(&field.args).await?;
                    self.registry
                        .resolve_field(field, &args, &mut *self.transport)
                        .await?
                }
                Arg::Sum(terms) => {
                    let mut total = U256::ZERO;
                    for term in terms {
                        let value = self.resolve_arg(term).await?;
                        total = value
                            .as_uint()
                            .and_then(|term| total.checked_add(term))
                            .ok_or_else(|| DeployError::ReferenceResolution {
                                contract: "sum".to_string(),
                                field: value.to_string(),
                                reason: format!(
                                    "cannot add a {} value to {}",
                                    value.type_name(),
                                    total
                                ),
                            })?;
                    }
                    Value::Uint(total)
                }
                Arg::List(items) => Value::List(self.resolve_args(items).await?),
            })
        })
    }
}

/// Address a bind attaches to.
///
/// Reads return addresses either typed or as a 160-bit number. The zero
/// address means the lookup found nothing (e.g. a pair that does not exist).
fn bound_address(name: &str, at: &Arg, value: &Value) -> Result<Address, DeployError> {
    let address = match value {
        Value::Address(address) => Some(*address),
        Value::Uint(raw) if raw.bit_len() <= 160 => {
            Some(Address::from_word(B256::from(raw.to_be_bytes::<32>())))
        }
        _ => None,
    };

    let (contract, field) = match at {
        Arg::Field(field) => (field.contract.clone(), field.field.clone()),
        _ => (name.to_string(), "address".to_string()),
    };

    match address {
        Some(address) if address != Address::ZERO => Ok(address),
        Some(_) => Err(DeployError::ReferenceResolution {
            contract,
            field,
            reason: format!("returned the zero address for {}", name),
        }),
        None => Err(DeployError::ReferenceResolution {
            contract,
            field,
            reason: format!("returned {} which is not an address", value),
        }),
    }
}
