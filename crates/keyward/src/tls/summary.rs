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

use std::fmt;

use openssl::asn1::Asn1Time;
use openssl::nid::Nid;
use openssl::x509::{X509NameRef, X509Ref};

use crate::crypto::{certificate_fingerprint, public_key_fingerprint};
use crate::error::Result;

/// The operator-facing details of a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSummary {
    pub subject: String,
    pub issuer: String,
    /// Serial number in uppercase hex.
    pub serial: String,
    pub not_before: String,
    pub not_after: String,
    /// Whole days until expiry, negative once expired.
    pub expires_in_days: i32,
    pub expired: bool,
    /// SHA-256 of the certificate DER.
    pub fingerprint: String,
    /// SHA-256 of the public key DER. Stable across renewals that reuse
    /// the key.
    pub key_fingerprint: String,
}

impl CertificateSummary {
    pub fn from_certificate(cert: &X509Ref) -> Result<Self> {
        let serial = cert.serial_number().to_bn()?.to_hex_str()?.to_string();
        let now = Asn1Time::days_from_now(0)?;
        let remaining = now.diff(cert.not_after())?;
        let public_key = cert.public_key()?;

        Ok(Self {
            subject: common_name_of(cert.subject_name()),
            issuer: common_name_of(cert.issuer_name()),
            serial,
            not_before: cert.not_before().to_string(),
            not_after: cert.not_after().to_string(),
            expires_in_days: remaining.days,
            expired: remaining.days < 0 || remaining.secs < 0,
            fingerprint: certificate_fingerprint(cert)?,
            key_fingerprint: public_key_fingerprint(&public_key)?,
        })
    }
}

impl fmt::Display for CertificateSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} issued by {:?}, serial {}, expires {} ({} days)",
            self.subject, self.issuer, self.serial, self.not_after, self.expires_in_days
        )
    }
}

/// The first CN entry, or an empty string when there is none.
pub(crate) fn common_name_of(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().to_string().ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::testing::self_signed;

    #[test]
    fn test_summary_fields() {
        let (cert, _) = self_signed("summary test");
        let summary = CertificateSummary::from_certificate(&cert).unwrap();

        assert_eq!(summary.subject, "summary test");
        assert_eq!(summary.issuer, "summary test");
        assert!(!summary.serial.is_empty());
        assert!(summary.expires_in_days <= 1);
        assert!(!summary.expired);
        assert_eq!(summary.fingerprint.len(), 64);
        assert_ne!(summary.fingerprint, summary.key_fingerprint);
    }
}
