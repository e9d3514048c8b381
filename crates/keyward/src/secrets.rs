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

//! Encoding and decoding of secrets stored in instance configuration.
//!
//! An encoded secret is `+encs+` followed by the hex ciphertext. The prefix
//! only marks the value as encoded; it is optional on input. The expandable
//! form `${enc:<keyfile>:+encs+<hex>}` also names the keyfile to use.
//!
//! Decoding tries candidate keyfiles in order and returns the first
//! plaintext that decrypts cleanly. When every candidate fails only the
//! number tried is reported.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::audit;
use crate::crypto::{decrypt_secret, encrypt_secret, KeyValues};
use crate::error::{KeywardError, Result};
use crate::host::Host;
use crate::instance::InstanceSettings;
use crate::keyfiles::KeyfileRegistry;

/// Marker prefix on encoded secrets.
pub const ENCODED_PREFIX: &str = "+encs+";

const EXPANDABLE_OPEN: &str = "${enc:";

const USER_KEYFILE: &str = "keyfile.aes";
const USER_PREVKEYFILE: &str = "prevkeyfile.aes";

/// Encodes `plaintext` as `+encs+<hex>`.
pub fn encode(plaintext: &str, kv: &KeyValues) -> Result<String> {
    Ok(format!("{}{}", ENCODED_PREFIX, encrypt_secret(plaintext.as_bytes(), kv)?))
}

/// Encodes `plaintext` as `${enc:<keyfile>:+encs+<hex>}`.
pub fn encode_expandable(plaintext: &str, kv: &KeyValues, keyfile: &Path) -> Result<String> {
    Ok(format!("{}{}:{}}}", EXPANDABLE_OPEN, keyfile.display(), encode(plaintext, kv)?))
}

/// Splits an expandable value into its keyfile path and ciphertext.
pub fn parse_expandable(value: &str) -> Option<(PathBuf, &str)> {
    let inner = value.trim().strip_prefix(EXPANDABLE_OPEN)?.strip_suffix('}')?;
    let (keyfile, ciphertext) = inner.rsplit_once(':')?;
    if keyfile.is_empty() {
        return None;
    }
    Some((PathBuf::from(keyfile), ciphertext))
}

/// Decodes `ciphertext` with the first candidate that accepts it.
///
/// # Errors
///
/// `DecodeFailed` carrying the number of candidates tried.
pub fn decode(ciphertext: &str, candidates: &[KeyValues]) -> Result<String> {
    decode_candidates(ciphertext, candidates.iter().map(|kv| Ok(kv.clone())))
}

/// Decodes `ciphertext` with keyfiles read from `host`, in order.
///
/// An expandable value's own keyfile is tried first. A keyfile that cannot
/// be read counts as a failed candidate.
pub fn decode_with_keyfiles(host: &Host, ciphertext: &str, keyfiles: &[PathBuf]) -> Result<String> {
    let (embedded, ciphertext) = match parse_expandable(ciphertext) {
        Some((keyfile, ciphertext)) => (Some(keyfile), ciphertext),
        None => (None, ciphertext),
    };

    let paths = dedup(embedded.into_iter().chain(keyfiles.iter().cloned()));
    decode_candidates(
        ciphertext,
        paths.iter().map(|path| {
            debug!(keyfile = %path.display(), "Trying keyfile");
            KeyfileRegistry::read(host, path)
        }),
    )
}

/// The conventional decode order: explicitly named keyfiles, then the
/// instance's `keyfile` and `prevkeyfile`, then the user defaults.
pub fn candidate_paths(
    explicit: &[PathBuf],
    instance: Option<&InstanceSettings>,
    defaults: &[PathBuf],
) -> Vec<PathBuf> {
    let instance_paths = instance
        .into_iter()
        .flat_map(|settings| [settings.keyfile.clone(), settings.prevkeyfile.clone()])
        .flatten();

    dedup(
        explicit
            .iter()
            .cloned()
            .chain(instance_paths)
            .chain(defaults.iter().cloned()),
    )
}

/// The user's default keyfiles, `keyfile.aes` then `prevkeyfile.aes` in the
/// `keyward` config directory.
pub fn default_keyfile_paths() -> Vec<PathBuf> {
    user_dir()
        .map(|dir| vec![dir.join(USER_KEYFILE), dir.join(USER_PREVKEYFILE)])
        .unwrap_or_default()
}

/// The user's default keyfile, written by `aes new --user`.
pub fn user_keyfile_path() -> Option<PathBuf> {
    user_dir().map(|dir| dir.join(USER_KEYFILE))
}

fn user_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("keyward"))
}

fn decode_candidates(
    ciphertext: &str,
    candidates: impl IntoIterator<Item = Result<KeyValues>>,
) -> Result<String> {
    let hex = ciphertext.trim();
    let hex = hex.strip_prefix(ENCODED_PREFIX).unwrap_or(hex);

    let mut tried = 0;
    for candidate in candidates {
        tried += 1;
        let Ok(kv) = candidate else {
            continue;
        };
        if let Ok(plaintext) = decrypt_secret(hex, &kv) {
            return Ok(plaintext);
        }
    }

    audit::log_decode_failed(tried);
    Err(KeywardError::DecodeFailed { tried })
}

fn dedup(paths: impl IntoIterator<Item = PathBuf>) -> Vec<PathBuf> {
    let mut unique: Vec<PathBuf> = Vec::new();
    for path in paths {
        if !unique.contains(&path) {
            unique.push(path);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_is_optional_on_decode() {
        let kv = KeyValues::generate();
        let encoded = encode("hunter2", &kv).unwrap();
        assert!(encoded.starts_with(ENCODED_PREFIX));

        let bare = encoded.strip_prefix(ENCODED_PREFIX).unwrap();
        assert_eq!(decode(&encoded, &[kv.clone()]).unwrap(), "hunter2");
        assert_eq!(decode(bare, &[kv]).unwrap(), "hunter2");
    }

    #[test]
    fn test_decode_tries_candidates_in_order() {
        let old = KeyValues::generate();
        let new = KeyValues::generate();
        let encoded = encode("rolled", &old).unwrap();

        assert_eq!(decode(&encoded, &[new.clone(), old]).unwrap(), "rolled");
        assert!(matches!(
            decode(&encoded, &[new]),
            Err(KeywardError::DecodeFailed { tried: 1 })
        ));
        assert!(matches!(
            decode(&encoded, &[]),
            Err(KeywardError::DecodeFailed { tried: 0 })
        ));
    }

    #[test]
    fn test_expandable_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let host = Host::local(dir.path());
        let kv = KeyValues::generate();
        let keyfile = dir.path().join("keyfile.aes");
        host.write(&keyfile, kv.render().as_bytes(), 0o600).unwrap();

        let expandable = encode_expandable("pw", &kv, &keyfile).unwrap();
        let (path, ciphertext) = parse_expandable(&expandable).unwrap();
        assert_eq!(path, keyfile);
        assert!(ciphertext.starts_with(ENCODED_PREFIX));

        assert_eq!(decode_with_keyfiles(&host, &expandable, &[]).unwrap(), "pw");
    }

    #[test]
    fn test_unreadable_keyfiles_count_as_tried() {
        let dir = tempfile::tempdir().unwrap();
        let host = Host::local(dir.path());
        let encoded = encode("pw", &KeyValues::generate()).unwrap();

        let missing = vec![dir.path().join("a.aes"), dir.path().join("b.aes")];
        assert!(matches!(
            decode_with_keyfiles(&host, &encoded, &missing),
            Err(KeywardError::DecodeFailed { tried: 2 })
        ));
    }

    #[test]
    fn test_candidate_order() {
        let settings = InstanceSettings {
            keyfile: Some(PathBuf::from("/k/current.aes")),
            prevkeyfile: Some(PathBuf::from("/k/previous.aes")),
            ..InstanceSettings::default()
        };
        let defaults = vec![PathBuf::from("/home/k.aes"), PathBuf::from("/k/current.aes")];

        let explicit = vec![PathBuf::from("/flag.aes"), PathBuf::from("/flag-prev.aes")];
        let paths = candidate_paths(&explicit, Some(&settings), &defaults);
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/flag.aes"),
                PathBuf::from("/flag-prev.aes"),
                PathBuf::from("/k/current.aes"),
                PathBuf::from("/k/previous.aes"),
                PathBuf::from("/home/k.aes"),
            ]
        );
    }
}
