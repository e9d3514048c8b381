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

//! Symmetric keyfile material and its canonical text form.
//!
//! A keyfile holds an AES-256 key and a CBC initialisation vector. Its
//! canonical rendering is
//!
//! ```text
//! key=<64 uppercase hex digits>
//! iv =<32 uppercase hex digits>
//! ```
//!
//! The space after `iv` matches the output of the OpenSSL tooling that
//! operators use to generate keyfiles by hand. The CRC-32 (IEEE) of this
//! rendering is the keyfile's identity: it names the file in shared
//! directories and is what operators type as `--crc`.

use std::fmt;

use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the CBC initialisation vector in bytes.
pub const IV_SIZE: usize = 16;

/// Errors raised while parsing keyfile text.
#[derive(Debug, Error)]
pub enum KeyfileFormatError {
    #[error("Invalid line (must be key=value): {0:?}")]
    InvalidLine(String),

    #[error("Unknown entry in keyfile: {0:?}")]
    UnknownEntry(String),

    #[error("Invalid hex in keyfile entry {entry:?}: {reason}")]
    InvalidHex { entry: String, reason: String },

    #[error("Invalid keyfile contents: missing key or iv")]
    Incomplete,
}

/// AES key and IV loaded from, or destined for, a keyfile.
///
/// The key bytes are wiped on drop.
#[derive(Clone)]
pub struct KeyValues {
    key: Zeroizing<[u8; KEY_SIZE]>,
    iv: [u8; IV_SIZE],
}

impl KeyValues {
    /// Generates fresh random key material.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        let mut iv = [0u8; IV_SIZE];
        rng.fill_bytes(&mut key[..]);
        rng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    /// Builds key values from raw bytes.
    pub fn from_parts(key: [u8; KEY_SIZE], iv: [u8; IV_SIZE]) -> Self {
        Self {
            key: Zeroizing::new(key),
            iv,
        }
    }

    /// Parses the text form of a keyfile.
    ///
    /// Blank lines, `#` comments and a `salt` entry are ignored. Short hex
    /// values are zero-extended on the right, as the OpenSSL tooling does.
    pub fn parse(text: &str) -> Result<Self, KeyfileFormatError> {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        let mut iv = [0u8; IV_SIZE];
        let mut got_key = false;
        let mut got_iv = false;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (name, value) = line
                .split_once('=')
                .ok_or_else(|| KeyfileFormatError::InvalidLine(line.to_string()))?;
            let name = name.trim();
            let value = value.trim();

            match name {
                "salt" => {}
                "key" => {
                    decode_hex_into(name, value, &mut key[..])?;
                    got_key = true;
                }
                "iv" => {
                    decode_hex_into(name, value, &mut iv)?;
                    got_iv = true;
                }
                other => return Err(KeyfileFormatError::UnknownEntry(other.to_string())),
            }
        }

        if !got_key || !got_iv {
            return Err(KeyfileFormatError::Incomplete);
        }

        Ok(Self { key, iv })
    }

    /// The canonical text rendering, as written to disk.
    pub fn render(&self) -> Zeroizing<String> {
        Zeroizing::new(format!(
            "key={}\niv ={}\n",
            hex::encode_upper(&self.key[..]),
            hex::encode_upper(self.iv)
        ))
    }

    /// CRC-32 (IEEE) of the canonical rendering.
    pub fn checksum(&self) -> u32 {
        crc32fast::hash(self.render().as_bytes())
    }

    /// Checksum as eight uppercase hex digits.
    pub fn checksum_string(&self) -> String {
        format_checksum(self.checksum())
    }

    pub(crate) fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub(crate) fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }
}

impl fmt::Debug for KeyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyValues")
            .field("crc", &self.checksum_string())
            .finish_non_exhaustive()
    }
}

impl PartialEq for KeyValues {
    fn eq(&self, other: &Self) -> bool {
        *self.key == *other.key && self.iv == other.iv
    }
}

impl Eq for KeyValues {}

/// Formats a checksum the way keyfiles are named.
pub fn format_checksum(crc: u32) -> String {
    format!("{:08X}", crc)
}

fn decode_hex_into(entry: &str, value: &str, out: &mut [u8]) -> Result<(), KeyfileFormatError> {
    let bytes = Zeroizing::new(hex::decode(value).map_err(|e| KeyfileFormatError::InvalidHex {
        entry: entry.to_string(),
        reason: e.to_string(),
    })?);
    if bytes.len() > out.len() {
        return Err(KeyfileFormatError::InvalidHex {
            entry: entry.to_string(),
            reason: format!("expected at most {} bytes, got {}", out.len(), bytes.len()),
        });
    }
    out[..bytes.len()].copy_from_slice(&bytes);
    Ok(())
}
