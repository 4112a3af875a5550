//! Layered configuration: built-in defaults, then `Hamster.toml`, then
//! `HAMSTER_*` environment variables.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use hamster_deploy::{CompilerSettings, Environment, EnvironmentResolver};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the compiled contract artifacts.
    pub artifacts: PathBuf,
    /// Directory run outputs are written to.
    pub deployments: PathBuf,
    pub compiler: CompilerSettings,
    /// Networks by name. Entries in the file are merged into the built-in ones.
    pub environments: BTreeMap<String, Environment>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            artifacts: PathBuf::from("build/contracts"),
            deployments: PathBuf::from("deployments"),
            compiler: CompilerSettings::default(),
            environments: EnvironmentResolver::builtin(),
        }
    }
}

impl Config {
    /// Load the configuration, with `path` optional.
    ///
    /// Nested keys are set from the environment with `__`, e.g.
    /// `HAMSTER_ENVIRONMENTS__TESTNET__CONFIRMATIONS=2`.
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("HAMSTER_").split("__"))
            .extract()
            .context(format!("Failed to load configuration from {}", path.display()))?;

        tracing::debug!(
            path = %path.display(),
            exists = path.exists(),
            environments = config.environments.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    pub fn resolver(&self) -> EnvironmentResolver {
        EnvironmentResolver::new(self.environments.clone())
    }

    /// Default run output path for `network`.
    pub fn output_path(&self, network: &str) -> PathBuf {
        self.deployments.join(format!("{}.json", network))
    }
}
