//! Static reference check run before any transaction is sent.

use std::collections::HashSet;

use crate::{DeployError, RunFailure, environment::Environment};

use super::{Arg, DeployAction, DeploymentPlan};

impl DeploymentPlan {
    /// Walk the steps that would run in `env` starting at `from_step` and
    /// report the first reference to a contract that is not registered by then,
    /// the first missing known address, or the first name registered twice.
    ///
    /// Steps before `from_step` only contribute the names the environment
    /// already knows, matching how a resumed run binds them.
    pub fn check(&self, env: &Environment, from_step: usize) -> Result<(), RunFailure> {
        let mut registered: HashSet<&str> = HashSet::new();

        for step in &self.steps {
            let fail = |action: usize, cause: DeployError| RunFailure {
                step: step.index,
                step_name: step.name.clone(),
                action,
                cause,
            };

            if !step.enabled(env) {
                continue;
            }
            if step.index < from_step {
                registered.extend(
                    step.deploy
                        .iter()
                        .map(DeployAction::name)
                        .filter(|name| env.known_address(name).is_some()),
                );
                continue;
            }

            for (i, action) in step.deploy.iter().enumerate() {
                let bound_from_env = matches!(action, DeployAction::Deploy(_))
                    && env.known_address(action.name()).is_some();
                if !bound_from_env {
                    for arg in action.args() {
                        check_arg(arg, &registered, env).map_err(|cause| fail(i, cause))?;
                    }
                }

                if !registered.insert(action.name()) {
                    return Err(fail(
                        i,
                        DeployError::DuplicateRegistration {
                            name: action.name().to_string(),
                            existing: None,
                        },
                    ));
                }
            }

            for (j, call) in step.calls.iter().enumerate() {
                let action = step.deploy.len() + j;
                if !registered.contains(call.target.as_str()) {
                    return Err(fail(
                        action,
                        DeployError::UnresolvedReference {
                            name: call.target.clone(),
                        },
                    ));
                }
                for arg in &call.args {
                    check_arg(arg, &registered, env).map_err(|cause| fail(action, cause))?;
                }
            }
        }

        Ok(())
    }
}

fn check_arg(arg: &Arg, registered: &HashSet<&str>, env: &Environment) -> Result<(), DeployError> {
    if let Some(name) = arg
        .contract_refs()
        .into_iter()
        .find(|name| !registered.contains(name))
    {
        return Err(DeployError::UnresolvedReference {
            name: name.to_string(),
        });
    }

    if let Some(key) = arg
        .known_refs()
        .into_iter()
        .find(|key| env.known_address(key).is_none())
    {
        return Err(DeployError::UnresolvedReference {
            name: key.to_string(),
        });
    }

    Ok(())
}
