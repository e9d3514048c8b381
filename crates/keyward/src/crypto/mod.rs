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

//! Cryptographic building blocks for certificates and keyfiles.
//!
//! This module provides:
//! - PEM encoding and decoding of X.509 certificates and PKCS#1 RSA keys
//! - The keyfile text format and its CRC-32 identity
//! - AES-256-CBC secret encryption against a single keyfile
//! - Certificate and public key fingerprints

mod fingerprint;
mod keyfile;
mod pem_codec;
mod secret;

pub use fingerprint::{certificate_fingerprint, public_key_fingerprint};
pub use keyfile::{format_checksum, KeyValues, KeyfileFormatError, IV_SIZE, KEY_SIZE};
pub use pem_codec::{
    decode_all, decode_first_certificate, decode_private_key, encode_certificate,
    encode_certificates, encode_private_key, is_self_issued, key_matches_certificate,
    validate_key, validate_rsa, PemItem, CERTIFICATE_TAG, RSA_PRIVATE_KEY_TAG,
};
pub use secret::{decrypt_secret, encrypt_secret, SecretError};
