use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::Table;
use hamster_deploy::{
    ArtifactStore, ChainTransport, DeployAction, DeploymentPlan, Environment, Orchestrator,
    RpcTransport, RunOutput, SimulatedChain,
};

use crate::{
    cli::{DeployArgs, Format, NetworksArgs, PlanArgs},
    config::Config,
};

fn load_plan(path: Option<&Path>) -> Result<DeploymentPlan> {
    match path {
        Some(path) => DeploymentPlan::load_from_file(path),
        None => DeploymentPlan::hamster(),
    }
}

/// Resolve `network`, adding the contracts of a previous run to its known
/// addresses.
fn resolve_environment(
    config: &Config,
    network: &str,
    resume: Option<&Path>,
    plan: &DeploymentPlan,
) -> Result<Environment> {
    let env = config.resolver().resolve(network)?;
    let Some(path) = resume else {
        return Ok(env);
    };

    let previous = RunOutput::load_from_file(path)?;
    if previous.environment != env.name {
        anyhow::bail!(
            "{} holds a {} deployment, not {}",
            path.display(),
            previous.environment,
            env.name
        );
    }
    if !previous.matches_plan(plan) {
        tracing::warn!(
            path = %path.display(),
            "The plan changed since the previous run"
        );
    }

    tracing::info!(
        path = %path.display(),
        contracts = previous.contracts.len(),
        state = %previous.state,
        "Resuming from a previous run"
    );
    Ok(env.with_known_addresses(previous.known_addresses()))
}

pub async fn deploy(config: &Config, args: DeployArgs) -> Result<()> {
    let plan = load_plan(args.plan.as_deref())?;
    let env = resolve_environment(config, &args.network, args.resume.as_deref(), &plan)?;
    plan.check(&env, args.from_step)
        .context("Plan preflight check failed")?;

    if args.dry_run {
        let mut chain = SimulatedChain::new().lenient();
        if let Some(from) = env.from {
            chain = chain.with_sender(from);
        }
        let orchestrator = execute(config, &plan, env, chain, args.from_step, None).await?;
        tracing::info!(
            transactions = orchestrator.transport().transactions().len(),
            "Dry run completed"
        );
        return Ok(());
    }

    let artifacts = args
        .artifacts
        .unwrap_or_else(|| config.artifacts.clone());
    let output = args
        .output
        .unwrap_or_else(|| config.output_path(&env.name));

    let transport = RpcTransport::connect(&env, ArtifactStore::new(artifacts)).await?;
    execute(config, &plan, env, transport, args.from_step, Some(output.as_path())).await?;

    Ok(())
}

/// Run the plan and write the output, whether the run completed or not.
async fn execute<T: ChainTransport>(
    config: &Config,
    plan: &DeploymentPlan,
    env: Environment,
    transport: T,
    from_step: usize,
    output: Option<&Path>,
) -> Result<Orchestrator<T>> {
    let mut orchestrator = Orchestrator::new(env, transport);
    let result = orchestrator.run_from(plan, from_step).await;

    let run_output = RunOutput::new(
        orchestrator.environment(),
        plan,
        config.compiler.clone(),
        orchestrator.registry(),
        orchestrator.state().clone(),
    );
    if let Some(path) = output {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create {}", parent.display()))?;
        }
        run_output.save_to_file(path)?;
    }
    println!("{}", contracts_table(&run_output));

    match result {
        Ok(report) => {
            tracing::info!(
                steps = report.len(),
                skipped = report.skipped().count(),
                transactions = report.transactions(),
                "Deployment finished"
            );
            Ok(orchestrator)
        }
        Err(failure) => {
            if let Some(path) = output {
                tracing::warn!(
                    "Resume with --resume {} --from-step {}",
                    path.display(),
                    failure.step
                );
            }
            Err(anyhow::Error::new(failure).context("Deployment run failed"))
        }
    }
}

pub fn plan(config: &Config, args: PlanArgs) -> Result<()> {
    let plan = load_plan(args.plan.as_deref())?;
    let env = resolve_environment(config, &args.network, args.resume.as_deref(), &plan)?;

    match args.format {
        Format::Table => println!("{}", plan_table(&plan, &env, args.from_step)),
        Format::Json => println!(
            "{}",
            serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?
        ),
    }

    plan.check(&env, args.from_step)
        .context("Plan preflight check failed")?;
    tracing::info!(network = %env.name, plan = %plan.name, "Preflight check passed");

    Ok(())
}

pub fn networks(config: &Config, args: NetworksArgs) -> Result<()> {
    let resolver = config.resolver();

    match args.format {
        Format::Table => {
            let mut table = Table::new();
            table.set_header(vec![
                "Network",
                "RPC",
                "Network id",
                "Variant",
                "Confirmations",
                "Known contracts",
            ]);
            for env in resolver.environments() {
                table.add_row(vec![
                    env.name.clone(),
                    env.rpc_url.to_string(),
                    env.network_id
                        .map_or_else(|| "any".to_string(), |id| id.to_string()),
                    env.variant.to_string(),
                    env.confirmations.to_string(),
                    env.known_addresses.keys().cloned().collect::<Vec<_>>().join(", "),
                ]);
            }
            println!("{table}");
        }
        Format::Json => {
            let environments: Vec<_> = resolver.environments().collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&environments)
                    .context("Failed to serialize networks")?
            );
        }
    }

    Ok(())
}

fn plan_table(plan: &DeploymentPlan, env: &Environment, from_step: usize) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["#", "Step", "Runs", "Contracts", "Calls"]);

    for step in &plan.steps {
        let runs = if step.index < from_step {
            "no (before --from-step)"
        } else if step.enabled(env) {
            "yes"
        } else {
            "no (condition)"
        };

        let contracts = step
            .deploy
            .iter()
            .map(|action| match action {
                DeployAction::Deploy(spec) if env.known_address(&spec.name).is_some() => {
                    format!("{} (known)", spec.name)
                }
                DeployAction::Deploy(spec) => {
                    format!("{}: {}", spec.name, env.artifact_for(spec))
                }
                DeployAction::Bind { name, artifact, .. } => {
                    format!("{}: {} (bound)", name, artifact)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        let calls = step
            .calls
            .iter()
            .map(|call| {
                let view = if call.view { " (view)" } else { "" };
                format!("{}.{}{}", call.target, call.method, view)
            })
            .collect::<Vec<_>>()
            .join("\n");

        table.add_row(vec![
            step.index.to_string(),
            step.name.clone(),
            runs.to_string(),
            contracts,
            calls,
        ]);
    }

    table
}

fn contracts_table(output: &RunOutput) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Contract", "Artifact", "Address", "Resolution"]);
    for (name, record) in &output.contracts {
        table.add_row(vec![
            name.clone(),
            record.artifact.clone(),
            record.address.to_string(),
            record.resolution.to_string(),
        ]);
    }
    table
}
