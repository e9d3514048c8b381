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

//! Error types shared by the certificate and keyfile subsystems.
//!
//! Every fallible operation in this crate returns [`KeywardError`]. The
//! variants follow the operator-facing taxonomy: a missing prerequisite
//! (no CA yet), a cryptographic failure, unsupported input material, an
//! I/O failure on some host, a secret that no candidate keyfile could
//! decode, and a checksum that names no known keyfile.
//!
//! Conditions that are *skipped* rather than fatal (an imported certificate
//! with no matching key, a host that already holds identical material) are
//! never represented here; they are reported through the outcome types of
//! the relevant operation.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::crypto::{KeyfileFormatError, SecretError};

/// Result alias used throughout the crate.
pub type Result<T, E = KeywardError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum KeywardError {
    /// A CA the operation depends on has not been initialised.
    #[error("Prerequisite missing: {0}")]
    PrerequisiteMissing(String),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Unknown PEM block types, or material that is not usable for the
    /// requested purpose.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("I/O error on {host} for {path}: {source}")]
    Io {
        host: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No candidate keyfile decoded the ciphertext. Only the number of
    /// candidates is reported.
    #[error("Decode failed: tried {tried} keyfile(s), none matched")]
    DecodeFailed { tried: usize },

    #[error("No keyfile found with checksum {0}")]
    ChecksumMismatch(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Keyfile(#[from] KeyfileFormatError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl KeywardError {
    /// Wraps an I/O error with the host and path it occurred on.
    pub fn io(host: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            host: host.into(),
            path: path.into(),
            source,
        }
    }

    /// True when the error means "not initialised yet" rather than a failure.
    pub fn is_prerequisite_missing(&self) -> bool {
        matches!(self, Self::PrerequisiteMissing(_))
    }
}

impl From<openssl::error::ErrorStack> for KeywardError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Self::Crypto(err.to_string())
    }
}

impl From<SecretError> for KeywardError {
    fn from(err: SecretError) -> Self {
        Self::Crypto(err.to_string())
    }
}

impl From<pem::PemError> for KeywardError {
    fn from(err: pem::PemError) -> Self {
        Self::UnsupportedFormat(format!("invalid PEM data: {}", err))
    }
}
