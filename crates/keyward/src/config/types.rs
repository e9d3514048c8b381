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

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default product name used as the instance certificate CN prefix.
pub const DEFAULT_PRODUCT: &str = "geneos";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywardConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<HostConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Product root directory on the local host.
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub key_bits: u32,
    pub product: String,
    pub root_cn: String,
    pub signing_cn: String,
    pub instance_days: u32,
    pub chain_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub name: String,
    /// Hostname placed in instance certificate SANs. Defaults to `name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Product root directory on the remote host.
    pub root: PathBuf,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Reached with the system `ssh` client. `target` defaults to the host name.
    Ssh {
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    /// The remote filesystem is mounted locally at `path`.
    Mount { path: PathBuf },
}

impl KeywardConfig {
    /// Create a configuration with defaults rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig { root: root.into() },
            tls: TlsConfig::default(),
            hosts: Vec::new(),
        }
    }

    /// Create a configuration with all defaults.
    pub fn with_defaults() -> Self {
        Self {
            paths: PathsConfig::default(),
            tls: TlsConfig::default(),
            hosts: Vec::new(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let root = dirs::home_dir()
            .map(|home| home.join(DEFAULT_PRODUCT))
            .unwrap_or_else(|| PathBuf::from("/opt").join(DEFAULT_PRODUCT));
        Self { root }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            key_bits: 2048,
            product: DEFAULT_PRODUCT.to_string(),
            root_cn: format!("{} root certificate", DEFAULT_PRODUCT),
            signing_cn: format!("{} intermediate certificate", DEFAULT_PRODUCT),
            instance_days: 365,
            chain_file: "chain.pem".to_string(),
        }
    }
}

impl HostConfig {
    pub fn hostname(&self) -> &str {
        self.hostname.as_deref().unwrap_or(&self.name)
    }
}
