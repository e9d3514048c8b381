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

//! SHA-256 fingerprints of certificates and public keys.

use openssl::pkey::{HasPublic, PKeyRef};
use openssl::x509::X509Ref;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Computes the SHA-256 hex fingerprint of a certificate's DER encoding.
///
/// # Returns
///
/// A 64-character lowercase hex string.
pub fn certificate_fingerprint(cert: &X509Ref) -> Result<String> {
    let der = cert.to_der()?;
    Ok(hex::encode(Sha256::digest(&der)))
}

/// Computes the SHA-256 hex fingerprint of a public key's DER encoding.
///
/// Renewal reuses the instance key, so this value stays the same across
/// certificate renewals and is what out-of-band consumers pin.
pub fn public_key_fingerprint<T: HasPublic>(key: &PKeyRef<T>) -> Result<String> {
    let der = key.public_key_to_der()?;
    Ok(hex::encode(Sha256::digest(&der)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::testing::self_signed;

    #[test]
    fn test_fingerprint_format() {
        let (cert, key) = self_signed("fp");
        let fp = certificate_fingerprint(&cert).unwrap();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));

        let cert_key = cert.public_key().unwrap();
        assert_eq!(
            public_key_fingerprint(&cert_key).unwrap(),
            public_key_fingerprint(&key).unwrap()
        );
    }
}
