//! hamster-deploy - Deployment orchestrator for the Hamster protocol.
//!
//! This crate provisions a multi-contract protocol step by step: it deploys
//! contracts (or binds already existing ones), feeds their addresses and
//! on-chain values into later constructors, and runs the configuration calls
//! that wire them together. The Hamster plan ships as data; any other plan
//! can be loaded from TOML.

mod error;
pub use error::{DeployError, RunFailure};

pub mod environment;
pub use environment::{CompilerSettings, Environment, EnvironmentResolver, Variant};

mod executor;
pub use executor::{StepExecutor, StepReport};

mod orchestrator;
pub use orchestrator::{Orchestrator, RunReport, RunState};

mod output;
pub use output::{ContractRecord, RunOutput};

pub mod plan;
pub use plan::{
    Arg, Condition, ConfigurationCall, ContractSpec, DeployAction, DeploymentPlan, FieldRef,
    ProvisioningStep,
};

mod registry;
pub use registry::{ContractRegistry, DeployedContract, Resolution};

pub mod rpc;
pub mod transport;
pub use transport::{
    Artifact, ArtifactStore, BlockInfo, ChainTransport, RpcTransport, SimulatedChain, Transaction,
};

mod value;
pub use value::{Value, parse_uint};
