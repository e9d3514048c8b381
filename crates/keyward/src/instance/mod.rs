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

//! Managed instances: identity, home directory and persisted settings.
//!
//! An instance lives at `<root>/<type>/<type>s/<name>` on its host. Its
//! settings are a small JSON object in `<home>/<type>.json`, and the keys
//! this crate cares about are the certificate, private key and chain paths
//! plus the `keyfile`/`prevkeyfile` pair used for secret rollover. Other
//! keys in the file are preserved untouched.

mod registry;

pub use registry::{Discovery, DiscoveryFailure, InstanceRegistry};

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{KeywardError, Result};
use crate::host::Host;

/// Permission bits for instance settings files.
const SETTINGS_MODE: u32 = 0o644;

/// The kinds of instance the product manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Gateway,
    Netprobe,
    San,
    Floating,
    Licd,
    Webserver,
    Fileagent,
}

impl Component {
    pub const ALL: [Component; 7] = [
        Component::Gateway,
        Component::Netprobe,
        Component::San,
        Component::Floating,
        Component::Licd,
        Component::Webserver,
        Component::Fileagent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Gateway => "gateway",
            Component::Netprobe => "netprobe",
            Component::San => "san",
            Component::Floating => "floating",
            Component::Licd => "licd",
            Component::Webserver => "webserver",
            Component::Fileagent => "fileagent",
        }
    }

    /// Whether instances of this type store secrets encoded with a keyfile.
    pub fn uses_keyfiles(&self) -> bool {
        matches!(
            self,
            Component::Gateway | Component::Netprobe | Component::San | Component::Floating
        )
    }

    /// Components that keep shared keyfile directories.
    pub fn keyfile_components() -> impl Iterator<Item = Component> {
        Self::ALL.into_iter().filter(|c| c.uses_keyfiles())
    }

    /// `<root>/<type>`
    pub fn dir(&self, root: &Path) -> PathBuf {
        root.join(self.as_str())
    }

    /// `<root>/<type>/<type>s`, the parent of instance homes.
    pub fn instances_dir(&self, root: &Path) -> PathBuf {
        self.dir(root).join(format!("{}s", self.as_str()))
    }

    /// `<root>/<type>/<type>_shared`
    pub fn shared_dir(&self, root: &Path) -> PathBuf {
        self.dir(root).join(format!("{}_shared", self.as_str()))
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Component {
    type Err = KeywardError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == lower)
            .ok_or_else(|| KeywardError::InvalidArgument(format!("unknown component type {:?}", s)))
    }
}

/// Identifies one instance: its type, name and the host it lives on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId {
    pub component: Component,
    pub name: String,
    pub host: String,
}

impl InstanceId {
    pub fn new(component: Component, name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            component,
            name: name.into(),
            host: host.into(),
        }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}@{}", self.component, self.name, self.host)
    }
}

/// Persisted per-instance settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceSettings {
    /// Current keyfile used to encode secrets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyfile: Option<PathBuf>,

    /// Keyfile in use before the last rotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prevkeyfile: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privatekey: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certchain: Option<PathBuf>,

    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// A managed instance and its loaded settings.
#[derive(Debug, Clone)]
pub struct Instance {
    id: InstanceId,
    home: PathBuf,
    settings: InstanceSettings,
}

impl Instance {
    /// An instance named `name` on `host`, with empty settings.
    pub fn new(host: &Host, component: Component, name: &str) -> Result<Self> {
        validate_name(name)?;
        Ok(Self {
            id: InstanceId::new(component, name, host.name()),
            home: component.instances_dir(host.root()).join(name),
            settings: InstanceSettings::default(),
        })
    }

    /// Loads an existing instance from `host`.
    ///
    /// The home directory must exist. A missing settings file loads as
    /// empty settings.
    pub fn load(host: &Host, component: Component, name: &str) -> Result<Self> {
        let mut instance = Self::new(host, component, name)?;
        if !host.exists(&instance.home) {
            return Err(KeywardError::InvalidArgument(format!(
                "instance {} does not exist",
                instance.id
            )));
        }
        if let Some(data) = host.read_optional(&instance.settings_path())? {
            instance.settings = serde_json::from_slice(&data).map_err(|e| {
                KeywardError::UnsupportedFormat(format!(
                    "invalid settings in {}: {}",
                    instance.settings_path().display(),
                    e
                ))
            })?;
        }
        Ok(instance)
    }

    /// Writes the settings file, replacing the previous one in a single
    /// rename.
    pub fn save(&self, host: &Host) -> Result<()> {
        let data = serde_json::to_vec_pretty(&self.settings).map_err(|e| {
            KeywardError::InvalidArgument(format!(
                "cannot serialise settings for {}: {}",
                self.id, e
            ))
        })?;
        host.write_atomic(&self.settings_path(), &data, SETTINGS_MODE)
    }

    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    pub fn component(&self) -> Component {
        self.id.component
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn settings(&self) -> &InstanceSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut InstanceSettings {
        &mut self.settings
    }

    pub fn settings_path(&self) -> PathBuf {
        self.home.join(format!("{}.json", self.id.component))
    }

    /// Configured certificate path, or `<home>/<type>.pem`.
    pub fn certificate_path(&self) -> PathBuf {
        self.resolve(self.settings.certificate.as_deref(), "pem")
    }

    /// Configured private key path, or `<home>/<type>.key`.
    pub fn private_key_path(&self) -> PathBuf {
        self.resolve(self.settings.privatekey.as_deref(), "key")
    }

    fn resolve(&self, configured: Option<&Path>, extension: &str) -> PathBuf {
        match configured {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => self.home.join(path),
            None => self
                .home
                .join(format!("{}.{}", self.id.component, extension)),
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return Err(KeywardError::InvalidArgument(format!(
            "invalid instance name {:?}",
            name
        )));
    }
    Ok(())
}
