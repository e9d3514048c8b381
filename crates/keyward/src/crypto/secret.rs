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

//! AES-256-CBC encryption of short secrets against a single keyfile.
//!
//! Ciphertext is rendered as uppercase hex. The IV comes from the keyfile,
//! so encoding is deterministic for a given key and plaintext.

use openssl::symm::{decrypt, encrypt, Cipher};
use thiserror::Error;

use super::keyfile::KeyValues;

const BLOCK_SIZE: usize = 16;

/// Errors from encrypting or decrypting a secret with one keyfile.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Ciphertext is not valid hex")]
    InvalidHex,

    #[error("Ciphertext length {0} is not a multiple of the block size")]
    InvalidLength(usize),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(#[from] openssl::error::ErrorStack),

    #[error("Decryption failed: wrong key or corrupted ciphertext")]
    DecryptionFailed,

    #[error("Decrypted secret is not valid UTF-8")]
    InvalidUtf8,
}

/// Encrypts `plaintext` with AES-256-CBC and PKCS#7 padding, returning
/// uppercase hex ciphertext.
pub fn encrypt_secret(plaintext: &[u8], kv: &KeyValues) -> Result<String, SecretError> {
    let ciphertext = encrypt(Cipher::aes_256_cbc(), &kv.key()[..], Some(&kv.iv()[..]), plaintext)?;
    Ok(hex::encode_upper(ciphertext))
}

/// Decrypts hex ciphertext produced by [`encrypt_secret`].
///
/// Lowercase hex is accepted.
pub fn decrypt_secret(ciphertext_hex: &str, kv: &KeyValues) -> Result<String, SecretError> {
    let ciphertext = hex::decode(ciphertext_hex.trim()).map_err(|_| SecretError::InvalidHex)?;
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(SecretError::InvalidLength(ciphertext.len()));
    }

    let plaintext = decrypt(Cipher::aes_256_cbc(), &kv.key()[..], Some(&kv.iv()[..]), &ciphertext)
        .map_err(|_| SecretError::DecryptionFailed)?;

    String::from_utf8(plaintext).map_err(|_| SecretError::InvalidUtf8)
}
