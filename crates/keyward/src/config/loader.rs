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

use crate::config::{ConfigError, KeywardConfig};
use regex::Regex;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV_VAR: &str = "KEYWARD_CONFIG";

pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default search paths
    pub fn new() -> Self {
        let mut search_paths = vec![PathBuf::from("./keyward.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("keyward").join("config.toml"));
        }

        search_paths.push(PathBuf::from("/etc/keyward/config.toml"));

        Self { search_paths }
    }

    /// Create a config loader with custom search paths
    pub fn with_search_paths(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Load configuration from the specified file or auto-discover.
    ///
    /// Returns `Ok(None)` when no file was named and none was found.
    pub fn load_config(
        &self,
        config_file: Option<&Path>,
    ) -> Result<Option<KeywardConfig>, ConfigError> {
        let config_path = if let Some(path) = config_file {
            path.to_path_buf()
        } else if let Ok(env_config) = env::var(CONFIG_ENV_VAR) {
            PathBuf::from(env_config)
        } else {
            match self.find_config_file() {
                Some(path) => path,
                None => return Ok(None),
            }
        };

        self.load_config_from_file(&config_path).map(Some)
    }

    /// Load configuration from a specific file
    pub fn load_config_from_file(&self, path: &Path) -> Result<KeywardConfig, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;

        let substituted_content = self.substitute_env_vars(&content)?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") | None => toml::from_str::<KeywardConfig>(&substituted_content)?,
            Some(ext) => {
                return Err(ConfigError::UnsupportedFormat {
                    extension: ext.to_string(),
                })
            }
        };

        validate(&config)?;
        Ok(config)
    }

    /// Find the first existing configuration file in search paths
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .find(|path| path.is_file())
            .cloned()
    }

    /// Substitute `${VAR}`, `${VAR:-default}` and `${VAR:?message}` references.
    fn substitute_env_vars(&self, content: &str) -> Result<String, ConfigError> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::EnvSubstitutionError(e.to_string()))?;
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let full_match = &cap[0];
            let replacement = self.process_var_expression(&cap[1])?;
            result = result.replace(full_match, &replacement);
        }

        Ok(result)
    }

    fn process_var_expression(&self, expr: &str) -> Result<String, ConfigError> {
        if let Some(default_pos) = expr.find(":-") {
            let var_name = &expr[..default_pos];
            let default_value = &expr[default_pos + 2..];
            Ok(env::var(var_name).unwrap_or_else(|_| default_value.to_string()))
        } else if let Some(error_pos) = expr.find(":?") {
            let var_name = &expr[..error_pos];
            let error_msg = &expr[error_pos + 2..];
            env::var(var_name).map_err(|_| {
                ConfigError::EnvSubstitutionError(format!(
                    "Required environment variable '{}' is not set: {}",
                    var_name, error_msg
                ))
            })
        } else {
            env::var(expr).map_err(|_| {
                ConfigError::EnvSubstitutionError(format!(
                    "Required environment variable '{}' is not set",
                    expr
                ))
            })
        }
    }

    /// Get all search paths for debugging
    pub fn get_search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(config: &KeywardConfig) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if !(1024..=8192).contains(&config.tls.key_bits) {
        errors.push(format!(
            "tls.key_bits {} out of range (1024-8192)",
            config.tls.key_bits
        ));
    }
    if config.tls.instance_days == 0 {
        errors.push("tls.instance_days must be positive".to_string());
    }
    if config.tls.chain_file.contains('/') {
        errors.push(format!(
            "tls.chain_file {:?} must be a file name, not a path",
            config.tls.chain_file
        ));
    }
    for (i, host) in config.hosts.iter().enumerate() {
        if host.name.is_empty() {
            errors.push(format!("hosts[{}] has an empty name", i));
        }
        if config.hosts[..i].iter().any(|h| h.name == host.name) {
            errors.push(format!("duplicate host name {:?}", host.name));
        }
        if !host.root.is_absolute() {
            errors.push(format!("host {:?} root must be absolute", host.name));
        }
    }

    match errors.len() {
        0 => Ok(()),
        1 => Err(ConfigError::Invalid(errors.remove(0))),
        _ => Err(ConfigError::Invalid(errors.join("; "))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn test_env_substitution_with_default() {
        let loader = ConfigLoader::new();
        env::remove_var("KEYWARD_TEST_ROOT_DEFAULT");

        let content = "root = \"${KEYWARD_TEST_ROOT_DEFAULT:-/opt/geneos}\"";
        let result = loader.substitute_env_vars(content).unwrap();
        assert_eq!(result, "root = \"/opt/geneos\"");
    }

    #[test]
    #[serial]
    fn test_env_substitution_with_existing_var() {
        let loader = ConfigLoader::new();
        env::set_var("KEYWARD_TEST_ROOT", "/srv/geneos");

        let content = "root = \"${KEYWARD_TEST_ROOT:-/opt/geneos}\"";
        let result = loader.substitute_env_vars(content).unwrap();
        assert_eq!(result, "root = \"/srv/geneos\"");

        env::remove_var("KEYWARD_TEST_ROOT");
    }

    #[test]
    #[serial]
    fn test_env_substitution_custom_error() {
        let loader = ConfigLoader::new();
        env::remove_var("KEYWARD_REQUIRED_VAR");

        let content = "root = \"${KEYWARD_REQUIRED_VAR:?Product root must be provided}\"";
        let result = loader.substitute_env_vars(content);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Product root must be provided"));
    }

    #[test]
    fn test_load_config_with_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyward.toml");
        std::fs::write(
            &path,
            r#"
[paths]
root = "/opt/geneos"

[tls]
key_bits = 3072

[[hosts]]
name = "remote1"
hostname = "remote1.example.com"
root = "/opt/geneos"
transport = { type = "ssh", target = "geneos@remote1" }

[[hosts]]
name = "mounted"
root = "/opt/geneos"
transport = { type = "mount", path = "/mnt/mounted" }
"#,
        )
        .unwrap();

        let config = ConfigLoader::with_search_paths(vec![])
            .load_config_from_file(&path)
            .unwrap();

        assert_eq!(config.tls.key_bits, 3072);
        assert_eq!(config.tls.product, "geneos");
        assert_eq!(config.hosts.len(), 2);
        assert_eq!(config.hosts[0].hostname(), "remote1.example.com");
        assert_eq!(config.hosts[1].hostname(), "mounted");
        assert_eq!(
            config.hosts[1].transport,
            TransportConfig::Mount {
                path: PathBuf::from("/mnt/mounted")
            }
        );
    }

    #[test]
    fn test_duplicate_hosts_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyward.toml");
        std::fs::write(
            &path,
            r#"
[paths]
root = "/opt/geneos"

[[hosts]]
name = "dup"
root = "/opt/geneos"
transport = { type = "ssh" }

[[hosts]]
name = "dup"
root = "/opt/geneos"
transport = { type = "ssh" }
"#,
        )
        .unwrap();

        let result = ConfigLoader::with_search_paths(vec![]).load_config_from_file(&path);
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("duplicate")));
    }

    #[test]
    #[serial]
    fn test_no_config_found() {
        env::remove_var(CONFIG_ENV_VAR);
        let loader =
            ConfigLoader::with_search_paths(vec![PathBuf::from("/nonexistent/keyward.toml")]);
        assert!(loader.load_config(None).unwrap().is_none());
    }
}
