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

use std::collections::btree_map::{BTreeMap, Entry};
use std::path::PathBuf;

use tracing::{debug, warn};

use super::{Component, Instance, InstanceId};
use crate::error::{KeywardError, Result};
use crate::host::{Host, HostRegistry};

/// Something discovery could not read. The rest of the fleet is still
/// registered.
#[derive(Debug)]
pub struct DiscoveryFailure {
    pub host: String,
    pub path: PathBuf,
    pub error: KeywardError,
}

/// What [`InstanceRegistry::discover`] found.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Instances registered.
    pub found: usize,
    pub failures: Vec<DiscoveryFailure>,
}

impl Discovery {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The set of instances a command operates on.
///
/// Instances are added explicitly with [`create`](Self::create) or
/// [`load`](Self::load), or in bulk with [`discover`](Self::discover), and
/// removed with [`unload`](Self::unload).
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: BTreeMap<InstanceId, Instance>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new instance home on `host` and registers it.
    pub fn create(
        &mut self,
        host: &Host,
        component: Component,
        name: &str,
    ) -> Result<&mut Instance> {
        let instance = Instance::new(host, component, name)?;
        if host.exists(instance.home()) {
            return Err(KeywardError::InvalidArgument(format!(
                "instance {} already exists",
                instance.id()
            )));
        }
        host.mkdir_all(instance.home())?;
        instance.save(host)?;
        Ok(self.insert(instance))
    }

    /// Loads an existing instance from `host` and registers it.
    pub fn load(&mut self, host: &Host, component: Component, name: &str) -> Result<&mut Instance> {
        let instance = Instance::load(host, component, name)?;
        Ok(self.insert(instance))
    }

    /// Removes an instance from the registry. Nothing is deleted on disk.
    pub fn unload(&mut self, id: &InstanceId) -> Option<Instance> {
        self.instances.remove(id)
    }

    pub fn get(&self, id: &InstanceId) -> Option<&Instance> {
        self.instances.get(id)
    }

    pub fn get_mut(&mut self, id: &InstanceId) -> Option<&mut Instance> {
        self.instances.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    /// Loads every instance found on every host.
    ///
    /// A host whose instance directories cannot be listed is skipped, and an
    /// instance whose settings cannot be loaded is left out. Both are
    /// reported in the returned [`Discovery`].
    pub fn discover(&mut self, hosts: &HostRegistry) -> Discovery {
        let mut discovery = Discovery::default();
        for host in hosts.all() {
            'components: for component in Component::ALL {
                let dir = component.instances_dir(host.root());
                let entries = match host.read_dir(&dir) {
                    Ok(entries) => entries,
                    Err(error) => {
                        warn!(host = %host.name(), path = %dir.display(), error = %error, "Skipping unreadable host");
                        discovery.failures.push(DiscoveryFailure {
                            host: host.name().to_string(),
                            path: dir,
                            error,
                        });
                        break 'components;
                    }
                };

                for entry in entries {
                    if !entry.is_dir || entry.name.starts_with('.') {
                        continue;
                    }
                    match self.load(host, component, &entry.name) {
                        Ok(instance) => {
                            debug!(instance = %instance.id(), "Discovered instance");
                            discovery.found += 1;
                        }
                        Err(error) => {
                            warn!(host = %host.name(), component = %component, name = %entry.name, error = %error, "Skipping instance");
                            discovery.failures.push(DiscoveryFailure {
                                host: host.name().to_string(),
                                path: dir.join(&entry.name),
                                error,
                            });
                        }
                    }
                }
            }
        }
        discovery
    }

    /// Selects instances by optional type and names.
    ///
    /// A name may carry a host suffix, `name@host`. With no names every
    /// instance of the type matches. Names that match nothing are an error.
    pub fn select(
        &self,
        component: Option<Component>,
        names: &[String],
    ) -> Result<Vec<InstanceId>> {
        let candidates = self
            .instances
            .keys()
            .filter(|id| component.map_or(true, |c| id.component == c));

        if names.is_empty() {
            return Ok(candidates.cloned().collect());
        }

        let candidates: Vec<&InstanceId> = candidates.collect();
        let mut selected = Vec::new();
        for wanted in names {
            let (name, host) = match wanted.split_once('@') {
                Some((name, host)) => (name, Some(host)),
                None => (wanted.as_str(), None),
            };
            let before = selected.len();
            for id in &candidates {
                if id.name == name
                    && host.map_or(true, |h| id.host == h)
                    && !selected.contains(*id)
                {
                    selected.push((*id).clone());
                }
            }
            if selected.len() == before {
                return Err(KeywardError::InvalidArgument(format!(
                    "no instance matches {:?}",
                    wanted
                )));
            }
        }
        Ok(selected)
    }

    fn insert(&mut self, instance: Instance) -> &mut Instance {
        match self.instances.entry(instance.id().clone()) {
            Entry::Occupied(mut entry) => {
                entry.insert(instance);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(instance),
        }
    }
}
