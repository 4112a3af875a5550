//! Runs a plan's steps in order against one environment.

use std::fmt;

use derive_more::Deref;
use serde::{Deserialize, Serialize};

use crate::{
    DeployError, RunFailure,
    environment::Environment,
    executor::{StepExecutor, StepReport},
    plan::{DeployAction, DeploymentPlan, ProvisioningStep},
    registry::{ContractRegistry, DeployedContract},
    transport::ChainTransport,
};

/// State of the latest run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunState {
    NotStarted,
    Running {
        step: usize,
    },
    Completed,
    /// Terminal. Nothing is rolled back.
    Failed {
        step: usize,
        action: usize,
        cause: String,
    },
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NotStarted => write!(f, "not started"),
            RunState::Running { step } => write!(f, "running step {}", step),
            RunState::Completed => write!(f, "completed"),
            RunState::Failed {
                step,
                action,
                cause,
            } => write!(f, "failed at step {} action {}: {}", step, action, cause),
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Deref)]
pub struct RunReport {
    pub environment: String,
    pub plan: String,
    /// First step that was executed.
    pub from_step: usize,
    #[deref]
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn transactions(&self) -> usize {
        self.iter().map(|step| step.transactions).sum()
    }

    pub fn skipped(&self) -> impl Iterator<Item = &StepReport> {
        self.iter().filter(|step| step.skipped)
    }
}

/// Owns the transport and the contract registry for one environment.
///
/// The registry outlives individual runs: running a plan a second time on the
/// same orchestrator fails with a duplicate registration instead of
/// redeploying.
pub struct Orchestrator<T> {
    env: Environment,
    transport: T,
    registry: ContractRegistry,
    state: RunState,
}

impl<T: ChainTransport> Orchestrator<T> {
    pub fn new(env: Environment, transport: T) -> Self {
        Self {
            env,
            transport,
            registry: ContractRegistry::new(),
            state: RunState::NotStarted,
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Run every step of `plan`.
    pub async fn run(&mut self, plan: &DeploymentPlan) -> Result<RunReport, RunFailure> {
        self.run_from(plan, 1).await
    }

    /// Run the steps of `plan` starting at the 1-based `from_step`.
    ///
    /// Earlier steps are not executed, but the contracts they would declare in
    /// this environment are registered as bound when the environment knows
    /// their names, so later steps can reference them.
    pub async fn run_from(
        &mut self,
        plan: &DeploymentPlan,
        from_step: usize,
    ) -> Result<RunReport, RunFailure> {
        tracing::info!(
            plan = %plan.name,
            environment = %self.env.name,
            variant = %self.env.variant,
            from_step,
            steps = plan.steps.len(),
            "Starting deployment run"
        );

        let mut report = RunReport {
            environment: self.env.name.clone(),
            plan: plan.name.clone(),
            from_step,
            steps: Vec::new(),
        };

        let resumed: Vec<_> = plan
            .steps
            .iter()
            .filter(|step| step.index < from_step && step.enabled(&self.env))
            .collect();
        for step in resumed {
            if let Err(failure) = self.bind_resumed(step) {
                self.state = RunState::Failed {
                    step: failure.step,
                    action: failure.action,
                    cause: failure.cause.to_string(),
                };
                return Err(failure);
            }
        }

        for step in plan.steps.iter().filter(|step| step.index >= from_step) {
            self.state = RunState::Running { step: step.index };

            let result = StepExecutor::new(&self.env, &mut self.registry, &mut self.transport)
                .execute(step)
                .await;

            match result {
                Ok(step_report) => report.steps.push(step_report),
                Err(failure) => {
                    tracing::error!(
                        step = failure.step,
                        name = %failure.step_name,
                        action = failure.action,
                        kind = failure.cause.kind(),
                        error = %failure.cause,
                        "Deployment run failed"
                    );
                    self.state = RunState::Failed {
                        step: failure.step,
                        action: failure.action,
                        cause: failure.cause.to_string(),
                    };
                    return Err(failure);
                }
            }
        }

        self.state = RunState::Completed;
        tracing::info!(
            environment = %self.env.name,
            contracts = self.registry.len(),
            transactions = report.transactions(),
            "Deployment run completed"
        );
        Ok(report)
    }

    /// Register the known contracts of a step that is not re-run. Names the
    /// registry already holds keep their entry.
    fn bind_resumed(&mut self, step: &ProvisioningStep) -> Result<(), RunFailure> {
        for (i, action) in step.deploy.iter().enumerate() {
            let name = action.name();
            let Some(address) = self.env.known_address(name) else {
                continue;
            };

            let artifact = match action {
                DeployAction::Deploy(spec) => self.env.artifact_for(spec).to_string(),
                DeployAction::Bind { artifact, .. } => artifact.clone(),
            };

            match self.registry.register(DeployedContract::bound(
                name,
                artifact,
                address,
                &self.env.name,
            )) {
                Ok(()) => {
                    tracing::debug!(name, address = %address, "Bound contract from a previous run");
                }
                Err(DeployError::DuplicateRegistration { existing, .. }) => {
                    tracing::debug!(name, existing = ?existing, "Contract already registered");
                }
                Err(cause) => {
                    return Err(RunFailure {
                        step: step.index,
                        step_name: step.name.clone(),
                        action: i,
                        cause,
                    });
                }
            }
        }
        Ok(())
    }
}
