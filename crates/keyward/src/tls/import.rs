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

//! Installs externally produced CA certificates and keys.
//!
//! Every PEM block from every source is decoded first, so that a bundle
//! containing an unsupported block or an invalid key installs nothing.
//! Certificates are then classified (self-issued means root, anything else
//! means signing) and each is paired with the first unused key whose public
//! half matches. A certificate with no matching key is skipped rather than
//! failing the import, because operators often supply certificates and
//! keys in separate, overlapping files.
//!
//! When several certificates of the same role are paired, the latest one in
//! source order is installed and the earlier ones are reported as
//! superseded.

use std::path::PathBuf;

use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use tracing::{debug, info, warn};

use super::summary::common_name_of;
use super::{CaManager, CaRole, CertificateAuthority, CertificateSummary};
use crate::audit;
use crate::crypto::{decode_all, is_self_issued, key_matches_certificate, validate_key, PemItem};
use crate::error::Result;

/// A certificate and key written to a CA slot.
#[derive(Debug, Clone)]
pub struct ImportedPair {
    pub role: CaRole,
    pub certificate_path: PathBuf,
    pub key_path: PathBuf,
    pub summary: CertificateSummary,
}

/// Why a certificate was not installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No key in any source pairs with the certificate.
    NoMatchingKey,
    /// A later certificate of the same role was installed instead.
    Superseded,
}

#[derive(Debug, Clone)]
pub struct SkippedCertificate {
    pub role: CaRole,
    pub subject: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub imported: Vec<ImportedPair>,
    pub skipped: Vec<SkippedCertificate>,
}

impl ImportReport {
    pub fn installed(&self, role: CaRole) -> bool {
        self.imported.iter().any(|pair| pair.role == role)
    }
}

/// Decodes `sources` and installs any root and signing pairs found.
///
/// # Errors
///
/// `UnsupportedFormat` for a PEM block that is not a certificate or an RSA
/// private key, and `Crypto` for a key that fails validation. In both cases
/// nothing is written.
pub fn import<S: AsRef<[u8]>>(manager: &CaManager<'_>, sources: &[S]) -> Result<ImportReport> {
    let mut certs: Vec<X509> = Vec::new();
    let mut keys: Vec<PKey<Private>> = Vec::new();

    for source in sources {
        for item in decode_all(source.as_ref())? {
            match item {
                PemItem::Certificate(cert) => certs.push(cert),
                PemItem::PrivateKey(key) => {
                    validate_key(&key)?;
                    keys.push(key);
                }
            }
        }
    }
    debug!(certificates = certs.len(), keys = keys.len(), "Decoded import sources");

    let mut report = ImportReport::default();
    let mut root: Option<CertificateAuthority> = None;
    let mut signing: Option<CertificateAuthority> = None;

    for cert in certs {
        let role = if is_self_issued(&cert)? {
            CaRole::Root
        } else {
            CaRole::Signing
        };
        let subject = common_name_of(cert.subject_name());

        let Some(key) = take_matching_key(&mut keys, &cert)? else {
            warn!(role = %role, subject = %subject, "No matching private key, skipping certificate");
            audit::log_import_skipped(&role.to_string(), &subject, "no matching key");
            report.skipped.push(SkippedCertificate {
                role,
                subject,
                reason: SkipReason::NoMatchingKey,
            });
            continue;
        };

        let slot = match role {
            CaRole::Root => &mut root,
            CaRole::Signing => &mut signing,
        };
        if let Some(previous) = slot.take() {
            let previous_subject = common_name_of(previous.certificate.subject_name());
            warn!(role = %role, superseded = %previous_subject, by = %subject, "Later certificate replaces earlier one");
            audit::log_import_skipped(&role.to_string(), &previous_subject, "superseded");
            report.skipped.push(SkippedCertificate {
                role,
                subject: previous_subject,
                reason: SkipReason::Superseded,
            });
        }
        *slot = Some(CertificateAuthority {
            role,
            certificate: cert,
            key,
        });
    }

    for ca in [root, signing].into_iter().flatten() {
        let (certificate_path, key_path) = manager.install(&ca)?;
        let summary = ca.summary()?;
        info!(role = %ca.role, subject = %summary.subject, path = %certificate_path.display(), "Installed imported CA");
        audit::log_import_installed(&ca.role.to_string(), &certificate_path, &summary);
        report.imported.push(ImportedPair {
            role: ca.role,
            certificate_path,
            key_path,
            summary,
        });
    }

    Ok(report)
}

/// Removes and returns the first key in `keys` that pairs with `cert`.
fn take_matching_key(keys: &mut Vec<PKey<Private>>, cert: &X509) -> Result<Option<PKey<Private>>> {
    for index in 0..keys.len() {
        if key_matches_certificate(cert, &keys[index])? {
            return Ok(Some(keys.remove(index)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsConfig;
    use crate::crypto::{encode_certificate, encode_private_key};
    use crate::error::KeywardError;
    use crate::host::Host;
    use crate::tls::testing::self_signed;

    #[test]
    fn test_unknown_block_aborts_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let host = Host::local(dir.path());
        let manager = CaManager::new(&host, &TlsConfig::default());

        let (cert, key) = self_signed("root");
        let mut bundle = encode_certificate(&cert).unwrap();
        bundle.extend(encode_private_key(&key).unwrap());
        let foreign = pem::encode(&pem::Pem::new("PUBLIC KEY", vec![0u8; 4]));

        let result = import(&manager, &[bundle, foreign.into_bytes()]);
        assert!(matches!(result, Err(KeywardError::UnsupportedFormat(_))));
        assert!(!host.exists(&manager.certificate_path(CaRole::Root)));
    }

    #[test]
    fn test_key_pairs_with_one_certificate_only() {
        let dir = tempfile::tempdir().unwrap();
        let host = Host::local(dir.path());
        let manager = CaManager::new(&host, &TlsConfig::default());

        let (cert, key) = self_signed("root");
        let pem_cert = encode_certificate(&cert).unwrap();
        let mut sources = vec![pem_cert.clone(), pem_cert];
        sources.push(encode_private_key(&key).unwrap());

        let report = import(&manager, &sources).unwrap();
        assert_eq!(report.imported.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].reason, SkipReason::NoMatchingKey);
    }

    #[test]
    fn test_latest_root_wins() {
        let dir = tempfile::tempdir().unwrap();
        let host = Host::local(dir.path());
        let manager = CaManager::new(&host, &TlsConfig::default());

        let mut sources = Vec::new();
        for cn in ["first root", "second root"] {
            let (cert, key) = self_signed(cn);
            let mut bundle = encode_certificate(&cert).unwrap();
            bundle.extend(encode_private_key(&key).unwrap());
            sources.push(bundle);
        }

        let report = import(&manager, &sources).unwrap();
        assert_eq!(report.imported.len(), 1);
        assert_eq!(report.imported[0].summary.subject, "second root");
        assert_eq!(report.skipped[0].subject, "first root");
        assert_eq!(report.skipped[0].reason, SkipReason::Superseded);
    }
}
