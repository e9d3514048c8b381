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
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
};
use openssl::x509::X509;
use tracing::{debug, info, warn};

use super::{
    common_name, generate_key, generate_serial, not_before, CaManager, CertificateAuthority,
    CertificateSummary, CERT_MODE, KEY_MODE,
};
use crate::audit;
use crate::config::TlsConfig;
use crate::crypto::{
    decode_first_certificate, decode_private_key, encode_certificates, encode_private_key,
    key_matches_certificate,
};
use crate::error::Result;
use crate::host::Host;
use crate::instance::Instance;

/// A renewed certificate, and the key it was issued over when that key is new.
pub struct Renewal {
    pub certificate: X509,
    /// `None` when the instance's existing key was reused.
    pub new_key: Option<PKey<Private>>,
}

/// What was written for an instance.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub summary: CertificateSummary,
    /// False when the existing private key was kept.
    pub key_written: bool,
}

/// Result of [`CertificateIssuer::ensure`].
#[derive(Debug, Clone)]
pub enum IssueOutcome {
    /// The instance already had a usable certificate.
    Existing(CertificateSummary),
    Issued(IssuedCertificate),
}

/// Issues and renews instance certificates signed by the signing CA.
pub struct CertificateIssuer {
    signing: CertificateAuthority,
    config: TlsConfig,
}

impl fmt::Debug for CertificateIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateIssuer")
            .field("signing", &self.signing)
            .field("instance_days", &self.config.instance_days)
            .finish_non_exhaustive()
    }
}

impl CertificateIssuer {
    /// Loads the signing CA from `manager`.
    ///
    /// # Errors
    ///
    /// `PrerequisiteMissing` when the CA has not been initialised.
    pub fn new(manager: &CaManager<'_>, config: &TlsConfig) -> Result<Self> {
        Ok(Self {
            signing: manager.signing()?,
            config: config.clone(),
        })
    }

    pub fn signing_ca(&self) -> &CertificateAuthority {
        &self.signing
    }

    /// Builds a certificate and fresh key for `instance` without writing
    /// anything.
    pub fn issue_certificate(
        &self,
        host: &Host,
        instance: &Instance,
    ) -> Result<(X509, PKey<Private>)> {
        let key = generate_key(self.config.key_bits)?;
        let cert = self.build(host, instance, &key)?;
        Ok((cert, key))
    }

    /// Issues a new certificate and key and writes both to the instance.
    pub fn issue(&self, host: &Host, instance: &mut Instance) -> Result<IssuedCertificate> {
        let (cert, key) = self.issue_certificate(host, instance)?;
        let issued = self.write(host, instance, &cert, Some(&key))?;
        info!(instance = %instance.id(), serial = %issued.summary.serial, "Issued instance certificate");
        audit::log_instance_issued(instance.id(), &issued.summary);
        Ok(issued)
    }

    /// Builds a replacement certificate over the instance's existing key.
    ///
    /// A new key is generated only when the instance has no key file or the
    /// key in it fails validation.
    pub fn renew_certificate(&self, host: &Host, instance: &Instance) -> Result<Renewal> {
        let key_path = instance.private_key_path();
        let existing = match host.read_optional(&key_path)? {
            Some(pem) => match decode_private_key(&pem) {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(path = %key_path.display(), error = %e, "Existing private key unusable, generating a new one");
                    None
                }
            },
            None => None,
        };

        match existing {
            Some(key) => {
                debug!(instance = %instance.id(), "Reusing existing private key");
                Ok(Renewal {
                    certificate: self.build(host, instance, &key)?,
                    new_key: None,
                })
            }
            None => {
                let (certificate, key) = self.issue_certificate(host, instance)?;
                Ok(Renewal {
                    certificate,
                    new_key: Some(key),
                })
            }
        }
    }

    /// Renews the instance certificate, writing the key only if it is new.
    pub fn renew(&self, host: &Host, instance: &mut Instance) -> Result<IssuedCertificate> {
        let renewal = self.renew_certificate(host, instance)?;
        self.complete_renewal(host, instance, renewal)
    }

    /// Renews the instance certificate over a freshly generated key,
    /// replacing the existing one.
    pub fn renew_with_new_key(
        &self,
        host: &Host,
        instance: &mut Instance,
    ) -> Result<IssuedCertificate> {
        let (certificate, key) = self.issue_certificate(host, instance)?;
        let renewal = Renewal {
            certificate,
            new_key: Some(key),
        };
        self.complete_renewal(host, instance, renewal)
    }

    fn complete_renewal(
        &self,
        host: &Host,
        instance: &mut Instance,
        renewal: Renewal,
    ) -> Result<IssuedCertificate> {
        let issued = self.write(host, instance, &renewal.certificate, renewal.new_key.as_ref())?;
        info!(instance = %instance.id(), serial = %issued.summary.serial, key_written = issued.key_written, "Renewed instance certificate");
        audit::log_instance_renewed(instance.id(), &issued.summary, issued.key_written);
        Ok(issued)
    }

    /// Issues a certificate unless the instance already has a valid one.
    ///
    /// Valid means signed by the current signing CA, not expired, and
    /// paired with the instance's private key.
    pub fn ensure(&self, host: &Host, instance: &mut Instance) -> Result<IssueOutcome> {
        if let Some(summary) = self.existing_valid(host, instance)? {
            debug!(instance = %instance.id(), "Instance certificate still valid");
            return Ok(IssueOutcome::Existing(summary));
        }
        Ok(IssueOutcome::Issued(self.issue(host, instance)?))
    }

    fn existing_valid(
        &self,
        host: &Host,
        instance: &Instance,
    ) -> Result<Option<CertificateSummary>> {
        let cert_pem = host.read_optional(&instance.certificate_path())?;
        let key_pem = host.read_optional(&instance.private_key_path())?;
        let (Some(cert_pem), Some(key_pem)) = (cert_pem, key_pem) else {
            return Ok(None);
        };

        let (Ok(cert), Ok(key)) = (
            decode_first_certificate(&cert_pem),
            decode_private_key(&key_pem),
        ) else {
            return Ok(None);
        };
        if !self.signing.issued(&cert)? || !key_matches_certificate(&cert, &key)? {
            return Ok(None);
        }

        let summary = CertificateSummary::from_certificate(&cert)?;
        Ok((!summary.expired).then_some(summary))
    }

    fn build(&self, host: &Host, instance: &Instance, key: &PKey<Private>) -> Result<X509> {
        let cn = format!(
            "{} {} {}",
            self.config.product,
            instance.component(),
            instance.name()
        );
        let subject = common_name(&cn)?;

        let serial = generate_serial()?;
        let valid_from = not_before()?;
        let valid_to = Asn1Time::days_from_now(self.config.instance_days)?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&subject)?;
        builder.set_issuer_name(self.signing.certificate.subject_name())?;
        builder.set_pubkey(key)?;
        builder.set_not_before(&valid_from)?;
        builder.set_not_after(&valid_to)?;

        builder.append_extension(BasicConstraints::new().critical().build()?)?;
        builder.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()?,
        )?;
        builder.append_extension(ExtendedKeyUsage::new().server_auth().client_auth().build()?)?;
        let san = SubjectAlternativeName::new()
            .dns(host.hostname())
            .build(&builder.x509v3_context(Some(&self.signing.certificate), None))?;
        builder.append_extension(san)?;

        builder.sign(&self.signing.key, MessageDigest::sha256())?;
        Ok(builder.build())
    }

    /// Writes the certificate (followed by the signing CA) and, when given,
    /// the key, then records the paths in the instance settings.
    ///
    /// Both files are staged before either is renamed into place, so a
    /// failed write leaves the previous pair untouched.
    fn write(
        &self,
        host: &Host,
        instance: &mut Instance,
        cert: &X509,
        key: Option<&PKey<Private>>,
    ) -> Result<IssuedCertificate> {
        let cert_pem = encode_certificates([cert, &self.signing.certificate])?;
        let key_pem = key.map(encode_private_key).transpose()?;

        let cert_path = instance.certificate_path();
        let key_path = instance.private_key_path();
        let staged_cert = host.stage(&cert_path, &cert_pem, CERT_MODE)?;
        if let Some(key_pem) = &key_pem {
            let staged_key = host.stage(&key_path, key_pem, KEY_MODE)?;
            host.rename(&staged_key, &key_path)?;
        }
        host.rename(&staged_cert, &cert_path)?;

        let settings = instance.settings_mut();
        settings.certificate = Some(cert_path);
        settings.privatekey = Some(key_path);
        settings.certchain = Some(host.tls_dir().join(&self.config.chain_file));
        instance.save(host)?;

        Ok(IssuedCertificate {
            summary: CertificateSummary::from_certificate(cert)?,
            key_written: key_pem.is_some(),
        })
    }
}
