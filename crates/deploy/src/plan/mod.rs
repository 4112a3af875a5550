//! Declarative deployment plans.
//!
//! A plan is an ordered list of [`ProvisioningStep`]s. Each step deploys or
//! binds contracts, then runs configuration calls against registered
//! contracts. Plans are written in TOML:
//!
//! ```toml
//! [[step]]
//! name = "deploy treasury"
//!
//! [[step.deploy]]
//! name = "Treasury"
//! artifact = "Treasury"
//!
//! [[step.deploy]]
//! name = "Oracle"
//! artifact = "Oracle"
//! args = [{ contract = "HamsterPair" }, { field = "Treasury.PERIOD" }, { uint = 0 }]
//!
//! [[step.call]]
//! target = "Oracle"
//! method = "update"
//! ```

mod args;
mod preflight;

use std::{collections::HashSet, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use args::{Arg, FieldRef, SECONDS_PER_DAY};

use crate::environment::{Environment, Variant};

/// The Hamster protocol plan shipped with the crate.
const HAMSTER_PLAN: &str = include_str!("../../plans/hamster.toml");

/// A contract to deploy under a logical name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSpec {
    /// Logical name the contract is registered under.
    pub name: String,
    /// Production artifact.
    pub artifact: String,
    /// Artifact used instead in [`Variant::Mock`] environments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock: Option<String>,
    /// Constructor arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Arg>,
}

impl ContractSpec {
    pub fn new(name: impl Into<String>, artifact: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artifact: artifact.into(),
            mock: None,
            args: Vec::new(),
        }
    }

    pub fn with_mock(mut self, mock: impl Into<String>) -> Self {
        self.mock = Some(mock.into());
        self
    }

    pub fn with_args(mut self, args: Vec<Arg>) -> Self {
        self.args = args;
        self
    }

    /// The artifact to instantiate for a variant.
    pub fn artifact_for(&self, variant: Variant) -> &str {
        match (variant, &self.mock) {
            (Variant::Mock, Some(mock)) => mock,
            _ => &self.artifact,
        }
    }
}

/// How a step obtains a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDeployAction", into = "RawDeployAction")]
pub enum DeployAction {
    /// Deploy a new instance, unless the environment already knows the name.
    Deploy(ContractSpec),
    /// Attach to an existing contract whose address is resolved from `at`.
    Bind {
        name: String,
        artifact: String,
        at: Arg,
    },
}

impl DeployAction {
    pub fn deploy(spec: ContractSpec) -> Self {
        DeployAction::Deploy(spec)
    }

    pub fn bind(name: impl Into<String>, artifact: impl Into<String>, at: Arg) -> Self {
        DeployAction::Bind {
            name: name.into(),
            artifact: artifact.into(),
            at,
        }
    }

    /// Logical name registered by this action.
    pub fn name(&self) -> &str {
        match self {
            DeployAction::Deploy(spec) => &spec.name,
            DeployAction::Bind { name, .. } => name,
        }
    }

    /// Arguments resolved before the action runs.
    pub fn args(&self) -> Vec<&Arg> {
        match self {
            DeployAction::Deploy(spec) => spec.args.iter().collect(),
            DeployAction::Bind { at, .. } => vec![at],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawDeployAction {
    name: String,
    artifact: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mock: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<Arg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    at: Option<Arg>,
}

impl TryFrom<RawDeployAction> for DeployAction {
    type Error = String;

    fn try_from(raw: RawDeployAction) -> Result<Self, Self::Error> {
        match raw.at {
            None => Ok(DeployAction::Deploy(ContractSpec {
                name: raw.name,
                artifact: raw.artifact,
                mock: raw.mock,
                args: raw.args,
            })),
            Some(_) if !raw.args.is_empty() || raw.mock.is_some() => Err(format!(
                "`{}` binds to an existing address and cannot take `args` or `mock`",
                raw.name
            )),
            Some(at) => Ok(DeployAction::Bind {
                name: raw.name,
                artifact: raw.artifact,
                at,
            }),
        }
    }
}

impl From<DeployAction> for RawDeployAction {
    fn from(action: DeployAction) -> Self {
        match action {
            DeployAction::Deploy(spec) => RawDeployAction {
                name: spec.name,
                artifact: spec.artifact,
                mock: spec.mock,
                args: spec.args,
                at: None,
            },
            DeployAction::Bind { name, artifact, at } => RawDeployAction {
                name,
                artifact,
                mock: None,
                args: Vec::new(),
                at: Some(at),
            },
        }
    }
}

/// A state-changing call (or, with `view`, a logged read) against a
/// registered contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationCall {
    pub target: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Arg>,
    /// Read the result and log it instead of sending a transaction.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub view: bool,
}

impl ConfigurationCall {
    pub fn new(target: impl Into<String>, method: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
            args,
            view: false,
        }
    }

    pub fn view(target: impl Into<String>, method: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            view: true,
            ..Self::new(target, method, args)
        }
    }
}

/// Predicate over the active environment deciding whether a step runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Only in the listed environments.
    Network(Vec<String>),
    /// Everywhere except the listed environments.
    Except(Vec<String>),
    /// Only in environments deploying this variant.
    Variant(Variant),
}

impl Condition {
    pub fn holds(&self, env: &Environment) -> bool {
        match self {
            Condition::Network(names) => names.iter().any(|name| *name == env.name),
            Condition::Except(names) => !names.iter().any(|name| *name == env.name),
            Condition::Variant(variant) => *variant == env.variant,
        }
    }
}

/// An ordered unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningStep {
    /// 1-based position in the plan. Assigned when the plan is built.
    #[serde(skip)]
    pub index: usize,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deploy: Vec<DeployAction>,
    #[serde(default, rename = "call", skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<ConfigurationCall>,
}

impl ProvisioningStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            index: 0,
            name: name.into(),
            when: None,
            deploy: Vec::new(),
            calls: Vec::new(),
        }
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.when = Some(condition);
        self
    }

    pub fn deploy(mut self, action: DeployAction) -> Self {
        self.deploy.push(action);
        self
    }

    pub fn call(mut self, call: ConfigurationCall) -> Self {
        self.calls.push(call);
        self
    }

    /// Whether the step runs in `env`.
    pub fn enabled(&self, env: &Environment) -> bool {
        self.when.as_ref().is_none_or(|condition| condition.holds(env))
    }

    pub fn action_count(&self) -> usize {
        self.deploy.len() + self.calls.len()
    }
}

/// An ordered list of provisioning steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "step")]
    pub steps: Vec<ProvisioningStep>,
}

impl DeploymentPlan {
    /// Build a plan from steps, numbering them in order.
    pub fn new(name: impl Into<String>, steps: Vec<ProvisioningStep>) -> Result<Self> {
        let mut plan = Self {
            name: name.into(),
            steps,
        };
        plan.number_steps();
        plan.validate()?;
        Ok(plan)
    }

    /// The Hamster protocol plan.
    pub fn hamster() -> Result<Self> {
        Self::from_toml_str(HAMSTER_PLAN).context("Failed to parse the built-in Hamster plan")
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut plan: Self = toml::from_str(content).context("Failed to parse plan as TOML")?;
        plan.number_steps();
        plan.validate()?;
        Ok(plan)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read plan from {}", path.display()))?;
        let plan = Self::from_toml_str(&content)
            .context(format!("Invalid plan file {}", path.display()))?;
        tracing::info!(path = %path.display(), steps = plan.steps.len(), "Plan loaded");
        Ok(plan)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize plan to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write plan to {}", path.display()))?;
        Ok(())
    }

    /// SHA-256 of the plan's JSON serialization, hex encoded.
    ///
    /// Stored with run outputs so a resumed run can tell whether the plan
    /// changed in between.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).expect("plan serialization should never fail");

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Look up a step by its 1-based index.
    pub fn step(&self, index: usize) -> Option<&ProvisioningStep> {
        index.checked_sub(1).and_then(|i| self.steps.get(i))
    }

    fn number_steps(&mut self) {
        for (i, step) in self.steps.iter_mut().enumerate() {
            step.index = i + 1;
        }
    }

    fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                anyhow::bail!("step {} has an empty name", step.index);
            }
            if !names.insert(step.name.as_str()) {
                anyhow::bail!("step name `{}` is used more than once", step.name);
            }
            if step.action_count() == 0 {
                anyhow::bail!("step {} ({}) has no actions", step.index, step.name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EnvironmentResolver;

    const SAMPLE: &str = r#"
        name = "sample"

        [[step]]
        name = "tokens"

        [[step.deploy]]
        name = "Hamster"
        artifact = "Hamster"
        mock = "MockedHamster"
        args = [{ uint = 0 }, "sender", { uint = "1e18" }]

        [[step]]
        name = "dex"
        when = { network = ["testnet"] }

        [[step.deploy]]
        name = "UniswapRouter"
        artifact = "IUniswapV2Router"
        at = { known = "UniswapRouter" }

        [[step.call]]
        target = "Hamster"
        method = "approve"
        args = [{ contract = "UniswapRouter" }, { uint = 1 }]
    "#;

    #[test]
    fn test_parse_plan_numbers_steps() {
        let plan = DeploymentPlan::from_toml_str(SAMPLE).unwrap();

        assert_eq!(plan.name, "sample");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].index, 1);
        assert_eq!(plan.steps[1].index, 2);
        assert_eq!(plan.step(2).unwrap().name, "dex");
        assert!(plan.step(0).is_none());

        match &plan.steps[1].deploy[0] {
            DeployAction::Bind { name, at, .. } => {
                assert_eq!(name, "UniswapRouter");
                assert_eq!(at, &Arg::Known("UniswapRouter".to_string()));
            }
            other => panic!("expected a bind, got {other:?}"),
        }
    }

    #[test]
    fn test_bind_with_args_is_rejected() {
        let content = r#"
            [[step]]
            name = "bad"

            [[step.deploy]]
            name = "WFTM"
            artifact = "IWFTM"
            args = [{ uint = 1 }]
            at = { known = "WFTM" }
        "#;
        let err = DeploymentPlan::from_toml_str(content).unwrap_err();
        assert!(format!("{err:#}").contains("cannot take `args`"));
    }

    #[test]
    fn test_duplicate_step_names_are_rejected() {
        let step = ProvisioningStep::new("same").call(ConfigurationCall::new("A", "f", vec![]));
        assert!(DeploymentPlan::new("dup", vec![step.clone(), step]).is_err());
    }

    #[test]
    fn test_conditions() {
        let resolver = EnvironmentResolver::default();
        let testnet = resolver.resolve("testnet").unwrap();
        let mainnet = resolver.resolve("mainnet").unwrap();

        let only_testnet = Condition::Network(vec!["testnet".to_string()]);
        assert!(only_testnet.holds(&testnet));
        assert!(!only_testnet.holds(&mainnet));

        let not_testnet = Condition::Except(vec!["testnet".to_string()]);
        assert!(!not_testnet.holds(&testnet));
        assert!(not_testnet.holds(&mainnet));

        assert!(Condition::Variant(Variant::Production).holds(&mainnet));
        assert!(!Condition::Variant(Variant::Production).holds(&testnet));
    }

    #[test]
    fn test_plan_toml_round_trip_keeps_fingerprint() {
        let plan = DeploymentPlan::from_toml_str(SAMPLE).unwrap();
        let serialized = toml::to_string_pretty(&plan).unwrap();
        let reparsed = DeploymentPlan::from_toml_str(&serialized).unwrap();

        assert_eq!(plan, reparsed);
        assert_eq!(plan.fingerprint(), reparsed.fingerprint());
        assert_eq!(plan.fingerprint().len(), 64);
    }

    #[test]
    fn test_builtin_hamster_plan_parses() {
        let plan = DeploymentPlan::hamster().unwrap();

        assert_eq!(plan.name, "hamster");
        assert_eq!(plan.steps.first().unwrap().name, "deploy tokens");
        assert_eq!(plan.steps.last().unwrap().name, "configure system");

        let tokens = &plan.steps[0];
        let DeployAction::Deploy(hamster) = &tokens.deploy[0] else {
            panic!("expected Hamster to be deployed");
        };
        assert_eq!(hamster.artifact_for(Variant::Mock), "MockedHamster");
        assert_eq!(hamster.artifact_for(Variant::Production), "Hamster");
    }
}
