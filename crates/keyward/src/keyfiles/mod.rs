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

//! Keyfile storage, lookup and rotation.
//!
//! Shared keyfiles live at
//! `<root>/<type>/<type>_shared/keyfiles/<CRC>.aes` on each host, where
//! `<CRC>` is the keyfile's checksum. The name is a content address: a file
//! that already exists under a given checksum is never rewritten.
//!
//! Instances reference keyfiles by path through their `keyfile` and
//! `prevkeyfile` settings. Rotation moves `keyfile` into `prevkeyfile` and
//! never deletes key material, so secrets encoded under the previous key
//! stay decodable.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::audit;
use crate::crypto::{format_checksum, KeyValues};
use crate::error::{KeywardError, Result};
use crate::host::{Host, HostRegistry};
use crate::instance::{Component, Instance};

/// Extension of keyfile names.
pub const KEYFILE_EXTENSION: &str = "aes";

/// Permission bits for keyfiles.
pub const KEYFILE_MODE: u32 = 0o600;

/// Result of saving a keyfile to a shared directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Written(PathBuf),
    /// A keyfile with the same checksum was already present and was left
    /// untouched.
    Existing(PathBuf),
}

impl SaveOutcome {
    pub fn path(&self) -> &Path {
        match self {
            SaveOutcome::Written(path) | SaveOutcome::Existing(path) => path,
        }
    }
}

/// Result of [`KeyfileRegistry::rotate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotateOutcome {
    /// The instance already used this keyfile.
    Unchanged,
    Updated {
        keyfile: PathBuf,
        prevkeyfile: Option<PathBuf>,
    },
}

/// What [`KeyfileRegistry::create`] does when the target already exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExistingKeyfile {
    /// Fail without touching the file.
    Refuse,
    Overwrite,
    /// Rename the file aside, inserting this suffix before the extension:
    /// `keyfile.aes` with `-prev` becomes `keyfile-prev.aes`.
    Backup(String),
}

/// A keyfile found on disk or referenced by an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyfileEntry {
    pub host: String,
    pub component: Option<Component>,
    pub path: PathBuf,
    /// `None` when the file is missing or unreadable.
    pub crc: Option<String>,
    /// True for an instance's `prevkeyfile`.
    pub previous: bool,
}

/// Generates fresh keyfile material.
pub fn new_keyfile() -> KeyValues {
    KeyValues::generate()
}

/// CRC-32 of the keyfile's canonical rendering.
pub fn checksum(kv: &KeyValues) -> u32 {
    kv.checksum()
}

/// Canonicalises a keyfile name written as a checksum.
///
/// `abcd1234`, `ABCD1234.AES` and `dir/abcd1234.aes` become
/// `ABCD1234.aes` (keeping any directory). Anything else is returned
/// unchanged.
pub fn normalise_keyfile_name(path: &Path) -> PathBuf {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return path.to_path_buf();
    };

    let stem = match file_name.rsplit_once('.') {
        Some((stem, ext)) if ext.eq_ignore_ascii_case(KEYFILE_EXTENSION) => stem,
        Some(_) => return path.to_path_buf(),
        None => file_name,
    };
    if stem.len() != 8 || !stem.chars().all(|c| c.is_ascii_hexdigit()) {
        return path.to_path_buf();
    }

    path.with_file_name(format!("{}.{}", stem.to_ascii_uppercase(), KEYFILE_EXTENSION))
}

/// Parses a checksum as typed by an operator (`--crc`), with or without the
/// `.aes` extension.
pub fn parse_crc(crc: &str) -> Result<u32> {
    let normalised = normalise_keyfile_name(Path::new(crc));
    let stem = normalised
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| s.len() == 8 && s.chars().all(|c| c.is_ascii_hexdigit()))
        .ok_or_else(|| invalid_checksum(crc))?;
    u32::from_str_radix(stem, 16).map_err(|_| invalid_checksum(crc))
}

fn invalid_checksum(crc: &str) -> KeywardError {
    KeywardError::InvalidArgument(format!("invalid keyfile checksum {:?}", crc))
}

/// Finds, stores and rotates keyfiles across all hosts.
pub struct KeyfileRegistry<'a> {
    hosts: &'a HostRegistry,
}

impl<'a> KeyfileRegistry<'a> {
    pub fn new(hosts: &'a HostRegistry) -> Self {
        Self { hosts }
    }

    pub fn hosts(&self) -> &HostRegistry {
        self.hosts
    }

    /// `<root>/<type>/<type>_shared/keyfiles` on `host`.
    pub fn shared_dir(host: &Host, component: Component) -> PathBuf {
        component.shared_dir(host.root()).join("keyfiles")
    }

    pub fn shared_path(host: &Host, component: Component, kv: &KeyValues) -> PathBuf {
        Self::shared_dir(host, component).join(format!(
            "{}.{}",
            kv.checksum_string(),
            KEYFILE_EXTENSION
        ))
    }

    /// Writes `kv` to the component's shared keyfile directory on `host`
    /// unless a keyfile with the same checksum is already there.
    pub fn save_to_shared(
        host: &Host,
        component: Component,
        kv: &KeyValues,
    ) -> Result<SaveOutcome> {
        let path = Self::shared_path(host, component, kv);
        if host.exists(&path) {
            debug!(host = %host.name(), path = %path.display(), "Keyfile already present");
            return Ok(SaveOutcome::Existing(path));
        }

        host.write(&path, kv.render().as_bytes(), KEYFILE_MODE)?;
        info!(host = %host.name(), path = %path.display(), "Saved keyfile");
        audit::log_keyfile_saved(host.name(), &path, &kv.checksum_string());
        Ok(SaveOutcome::Written(path))
    }

    /// Writes `kv` to `path` on `host`.
    ///
    /// Returns the backup path when an existing keyfile was renamed aside.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the file exists and `existing` is
    /// [`ExistingKeyfile::Refuse`].
    pub fn create(
        host: &Host,
        path: &Path,
        kv: &KeyValues,
        existing: &ExistingKeyfile,
    ) -> Result<Option<PathBuf>> {
        let mut backup = None;
        if host.exists(path) {
            match existing {
                ExistingKeyfile::Refuse => {
                    return Err(KeywardError::InvalidArgument(format!(
                        "{} already exists, not overwriting",
                        path.display()
                    )));
                }
                ExistingKeyfile::Overwrite => {
                    debug!(host = %host.name(), path = %path.display(), "Overwriting keyfile");
                }
                ExistingKeyfile::Backup(suffix) => {
                    let backup_path = backup_path(path, suffix);
                    host.rename(path, &backup_path)?;
                    info!(host = %host.name(), path = %path.display(), backup = %backup_path.display(), "Backed up keyfile");
                    backup = Some(backup_path);
                }
            }
        }

        host.write_atomic(path, kv.render().as_bytes(), KEYFILE_MODE)?;
        audit::log_keyfile_created(&kv.checksum_string(), Some(path));
        Ok(backup)
    }

    /// Reads and parses a keyfile from `host`.
    pub fn read(host: &Host, path: &Path) -> Result<KeyValues> {
        let data = host.read(path)?;
        let text = String::from_utf8(data).map_err(|_| {
            KeywardError::UnsupportedFormat(format!("keyfile {} is not text", path.display()))
        })?;
        Ok(KeyValues::parse(&text)?)
    }

    /// Points the instance at `new_keyfile`, rolling the current keyfile
    /// into `prevkeyfile` unless `no_roll` is set.
    ///
    /// The new keyfile must be readable on `host`. Both settings are saved
    /// in one write.
    pub fn rotate(
        host: &Host,
        instance: &mut Instance,
        new_keyfile: &Path,
        no_roll: bool,
    ) -> Result<RotateOutcome> {
        let current = instance.settings().keyfile.clone();
        if current.as_deref() == Some(new_keyfile) {
            debug!(instance = %instance.id(), "Keyfile unchanged");
            return Ok(RotateOutcome::Unchanged);
        }

        let kv = Self::read(host, new_keyfile)?;

        let original = instance.settings().clone();
        let settings = instance.settings_mut();
        if !no_roll {
            if let Some(current) = current {
                settings.prevkeyfile = Some(current);
            }
        }
        settings.keyfile = Some(new_keyfile.to_path_buf());
        let prevkeyfile = settings.prevkeyfile.clone();
        if let Err(e) = instance.save(host) {
            *instance.settings_mut() = original;
            return Err(e);
        }

        info!(instance = %instance.id(), keyfile = %new_keyfile.display(), "Rotated keyfile");
        audit::log_keyfile_rotated(
            instance.id(),
            new_keyfile,
            &kv.checksum_string(),
            prevkeyfile.as_deref(),
        );
        Ok(RotateOutcome::Updated {
            keyfile: new_keyfile.to_path_buf(),
            prevkeyfile,
        })
    }

    /// Finds a shared keyfile by checksum on any host.
    ///
    /// # Errors
    ///
    /// `ChecksumMismatch` when no host holds a keyfile with that checksum.
    pub fn locate(&self, crc: u32) -> Result<(&'a Host, PathBuf, KeyValues)> {
        let name = format!("{}.{}", format_checksum(crc), KEYFILE_EXTENSION);
        for host in self.hosts.all() {
            for component in Component::keyfile_components() {
                let path = Self::shared_dir(host, component).join(&name);
                if !host.exists(&path) {
                    continue;
                }
                let kv = Self::read(host, &path)?;
                if kv.checksum() == crc {
                    return Ok((host, path, kv));
                }
            }
        }
        Err(KeywardError::ChecksumMismatch(format_checksum(crc)))
    }

    /// Lists the keyfiles in every shared keyfile directory on every host.
    pub fn list_shared(&self) -> Result<Vec<KeyfileEntry>> {
        let mut entries = Vec::new();
        for host in self.hosts.all() {
            for component in Component::keyfile_components() {
                let dir = Self::shared_dir(host, component);
                for entry in host.read_dir(&dir)? {
                    if entry.is_dir || !entry.name.ends_with(&format!(".{}", KEYFILE_EXTENSION)) {
                        continue;
                    }
                    let path = dir.join(&entry.name);
                    entries.push(KeyfileEntry {
                        host: host.name().to_string(),
                        component: Some(component),
                        crc: entry_crc(host, &path),
                        path,
                        previous: false,
                    });
                }
            }
        }
        Ok(entries)
    }

    /// The keyfiles an instance references.
    pub fn instance_keyfiles(host: &Host, instance: &Instance) -> Vec<KeyfileEntry> {
        let settings = instance.settings();
        [(&settings.keyfile, false), (&settings.prevkeyfile, true)]
            .into_iter()
            .filter_map(|(path, previous)| {
                path.as_ref().map(|path| KeyfileEntry {
                    host: host.name().to_string(),
                    component: Some(instance.component()),
                    crc: entry_crc(host, path),
                    path: path.clone(),
                    previous,
                })
            })
            .collect()
    }
}

/// `dir/name.ext` becomes `dir/name<suffix>.ext`.
fn backup_path(path: &Path, suffix: &str) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}{}", stem, suffix),
    };
    path.with_file_name(name)
}

fn entry_crc(host: &Host, path: &Path) -> Option<String> {
    KeyfileRegistry::read(host, path)
        .ok()
        .map(|kv| kv.checksum_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_keyfile_name() {
        assert_eq!(
            normalise_keyfile_name(Path::new("abcd1234")),
            PathBuf::from("ABCD1234.aes")
        );
        assert_eq!(
            normalise_keyfile_name(Path::new("ABCD1234.AES")),
            PathBuf::from("ABCD1234.aes")
        );
        assert_eq!(
            normalise_keyfile_name(Path::new("dir/abcd1234.aes")),
            PathBuf::from("dir/ABCD1234.aes")
        );
        for unchanged in ["keyfile.aes", "abcd123.aes", "abcd1234.txt", "ghijklmn"] {
            assert_eq!(
                normalise_keyfile_name(Path::new(unchanged)),
                PathBuf::from(unchanged)
            );
        }
    }

    #[test]
    fn test_parse_crc() {
        assert_eq!(parse_crc("0000ABCD").unwrap(), 0xABCD);
        assert_eq!(parse_crc("0000abcd.aes").unwrap(), 0xABCD);
        assert!(parse_crc("xyz").is_err());
        assert!(parse_crc("+1234567").is_err());
        assert!(parse_crc("-1234567.aes").is_err());
    }

    #[test]
    fn test_create_existing_keyfile() {
        let dir = tempfile::tempdir().unwrap();
        let host = Host::local(dir.path());
        let path = dir.path().join("keyfile.aes");
        let first = new_keyfile();
        let second = new_keyfile();

        let refuse = ExistingKeyfile::Refuse;
        assert_eq!(KeyfileRegistry::create(&host, &path, &first, &refuse).unwrap(), None);
        assert!(matches!(
            KeyfileRegistry::create(&host, &path, &second, &refuse),
            Err(KeywardError::InvalidArgument(_))
        ));
        assert_eq!(KeyfileRegistry::read(&host, &path).unwrap(), first);

        let backup_prev = ExistingKeyfile::Backup("-prev".to_string());
        let backup = KeyfileRegistry::create(&host, &path, &second, &backup_prev)
            .unwrap()
            .unwrap();
        assert_eq!(backup, dir.path().join("keyfile-prev.aes"));
        assert_eq!(KeyfileRegistry::read(&host, &backup).unwrap(), first);
        assert_eq!(KeyfileRegistry::read(&host, &path).unwrap(), second);

        let third = new_keyfile();
        let overwrite = ExistingKeyfile::Overwrite;
        assert_eq!(KeyfileRegistry::create(&host, &path, &third, &overwrite).unwrap(), None);
        assert_eq!(KeyfileRegistry::read(&host, &path).unwrap(), third);
    }

    #[test]
    fn test_shared_path() {
        let host = Host::local("/opt/geneos");
        let kv = new_keyfile();
        let path = KeyfileRegistry::shared_path(&host, Component::Gateway, &kv);
        assert_eq!(
            path,
            PathBuf::from(format!(
                "/opt/geneos/gateway/gateway_shared/keyfiles/{}.aes",
                kv.checksum_string()
            ))
        );
    }

    #[test]
    fn test_rotate_noroll_keeps_previous() {
        let dir = tempfile::tempdir().unwrap();
        let host = Host::local(dir.path());
        let mut instance = Instance::new(&host, Component::Gateway, "gw1").unwrap();

        let paths: Vec<PathBuf> = (0..3)
            .map(|_| {
                KeyfileRegistry::save_to_shared(&host, Component::Gateway, &new_keyfile())
                    .unwrap()
                    .path()
                    .to_path_buf()
            })
            .collect();

        KeyfileRegistry::rotate(&host, &mut instance, &paths[0], false).unwrap();
        KeyfileRegistry::rotate(&host, &mut instance, &paths[1], false).unwrap();
        let outcome = KeyfileRegistry::rotate(&host, &mut instance, &paths[2], true).unwrap();

        assert_eq!(
            outcome,
            RotateOutcome::Updated {
                keyfile: paths[2].clone(),
                prevkeyfile: Some(paths[0].clone()),
            }
        );
    }

    #[test]
    fn test_rotate_same_keyfile_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let host = Host::local(dir.path());
        let mut instance = Instance::new(&host, Component::Netprobe, "np1").unwrap();
        let path = KeyfileRegistry::save_to_shared(&host, Component::Netprobe, &new_keyfile())
            .unwrap()
            .path()
            .to_path_buf();

        KeyfileRegistry::rotate(&host, &mut instance, &path, false).unwrap();
        let outcome = KeyfileRegistry::rotate(&host, &mut instance, &path, false).unwrap();
        assert_eq!(outcome, RotateOutcome::Unchanged);
        assert_eq!(instance.settings().prevkeyfile, None);
    }

    #[test]
    fn test_rotate_rejects_unreadable_keyfile() {
        let dir = tempfile::tempdir().unwrap();
        let host = Host::local(dir.path());
        let mut instance = Instance::new(&host, Component::San, "san1").unwrap();

        let missing = dir.path().join("missing.aes");
        let result = KeyfileRegistry::rotate(&host, &mut instance, &missing, false);
        assert!(matches!(result, Err(KeywardError::Io { .. })));
        assert_eq!(instance.settings().keyfile, None);
    }
}
