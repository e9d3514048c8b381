/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Command implementations and the state they share.

pub mod aes;
pub mod tls;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use keyward::config::{ConfigLoader, KeywardConfig};
use keyward::host::{Host, HostRegistry};
use keyward::instance::{Component, Instance, InstanceId, InstanceRegistry};
use tracing::{debug, error, warn};

/// Configuration and hosts for one invocation.
pub struct Context {
    pub config: KeywardConfig,
    pub hosts: HostRegistry,
}

impl Context {
    pub fn load(config_file: Option<&Path>, root: Option<PathBuf>) -> Result<Self> {
        let loader = ConfigLoader::new();
        let mut config = match loader
            .load_config(config_file)
            .context("Failed to load configuration")?
        {
            Some(config) => config,
            None => {
                debug!(search_paths = ?loader.get_search_paths(), "No configuration file found, using defaults");
                KeywardConfig::with_defaults()
            }
        };
        if let Some(root) = root {
            config.paths.root = root;
        }

        let hosts = HostRegistry::from_config(&config);
        Ok(Self { config, hosts })
    }

    pub fn host(&self, name: &str) -> Result<&Host> {
        self.hosts
            .get(name)
            .with_context(|| format!("Unknown host {:?}", name))
    }

    /// Discovers instances on every host and selects the targets.
    ///
    /// Hosts and instances that cannot be read are left out with a warning.
    pub fn select(&self, targets: &[String]) -> Result<(InstanceRegistry, Vec<InstanceId>)> {
        let (component, names) = split_targets(targets);
        let mut registry = InstanceRegistry::new();
        let discovery = registry.discover(&self.hosts);
        debug!(found = discovery.found, "Discovered instances");
        if !discovery.is_complete() {
            warn!(
                "{} host(s) or instance(s) could not be read and were skipped",
                discovery.failures.len()
            );
        }
        let selected = registry.select(component, &names)?;
        Ok((registry, selected))
    }

    /// Runs `f` on each selected instance in turn.
    ///
    /// A failing instance is reported and the rest still run. The result is
    /// an error naming every instance that failed.
    pub fn for_each_instance<F>(&self, targets: &[String], mut f: F) -> Result<()>
    where
        F: FnMut(&Host, &mut Instance) -> Result<()>,
    {
        let (mut registry, selected) = self.select(targets)?;
        let mut failed = Vec::new();
        for id in selected {
            let Some(instance) = registry.get_mut(&id) else {
                continue;
            };
            if let Err(e) = self.host(&id.host).and_then(|host| f(host, instance)) {
                error!("{}: {:#}", id, e);
                failed.push(id.to_string());
            }
        }
        report_failures("instance", &failed)
    }
}

/// Fails with one error listing everything in `failed`.
pub fn report_failures(what: &str, failed: &[String]) -> Result<()> {
    if !failed.is_empty() {
        bail!("Failed on {} {}(s): {}", failed.len(), what, failed.join(", "));
    }
    Ok(())
}

/// Splits `[TYPE] [NAME...]` arguments. The first argument is a type only if
/// it names one.
pub fn split_targets(targets: &[String]) -> (Option<Component>, Vec<String>) {
    match targets.split_first() {
        Some((first, rest)) => match first.parse::<Component>() {
            Ok(component) => (Some(component), rest.to_vec()),
            Err(_) => (None, targets.to_vec()),
        },
        None => (None, Vec::new()),
    }
}
