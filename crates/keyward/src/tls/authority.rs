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
use std::path::PathBuf;

use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509NameRef, X509VerifyResult, X509};
use tracing::{debug, info};

use super::{
    common_name, generate_key, generate_serial, not_before, CertificateSummary, CERT_MODE, KEY_MODE,
};
use crate::audit;
use crate::config::TlsConfig;
use crate::crypto::{
    decode_first_certificate, decode_private_key, encode_certificate, encode_certificates,
    encode_private_key, key_matches_certificate,
};
use crate::error::{KeywardError, Result};
use crate::host::Host;

/// CA certificates are valid for ten years.
const CA_VALIDITY_DAYS: u32 = 3652;

/// The two levels of the certificate authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaRole {
    Root,
    Signing,
}

impl CaRole {
    fn file_stem(&self) -> &'static str {
        match self {
            CaRole::Root => "rootCA",
            CaRole::Signing => "signingCA",
        }
    }

    /// `basicConstraints` path length.
    fn path_len(&self) -> u32 {
        match self {
            CaRole::Root => 2,
            CaRole::Signing => 1,
        }
    }
}

impl fmt::Display for CaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaRole::Root => f.write_str("root"),
            CaRole::Signing => f.write_str("signing"),
        }
    }
}

/// Whether an `ensure_*` call found existing material or created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioned<T> {
    Existing(T),
    Created(T),
}

impl<T> Provisioned<T> {
    pub fn is_created(&self) -> bool {
        matches!(self, Provisioned::Created(_))
    }

    pub fn get(&self) -> &T {
        match self {
            Provisioned::Existing(value) | Provisioned::Created(value) => value,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Provisioned::Existing(value) | Provisioned::Created(value) => value,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Provisioned<U> {
        match self {
            Provisioned::Existing(value) => Provisioned::Existing(f(value)),
            Provisioned::Created(value) => Provisioned::Created(f(value)),
        }
    }
}

impl<T, E> Provisioned<std::result::Result<T, E>> {
    pub fn transpose(self) -> std::result::Result<Provisioned<T>, E> {
        Ok(match self {
            Provisioned::Existing(value) => Provisioned::Existing(value?),
            Provisioned::Created(value) => Provisioned::Created(value?),
        })
    }
}

/// A CA certificate and its private key.
pub struct CertificateAuthority {
    pub role: CaRole,
    pub certificate: X509,
    pub key: PKey<Private>,
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("role", &self.role)
            .field("subject", &self.certificate.subject_name())
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    pub fn summary(&self) -> Result<CertificateSummary> {
        CertificateSummary::from_certificate(&self.certificate)
    }

    /// True when this CA issued and signed `cert`.
    pub fn issued(&self, cert: &X509) -> Result<bool> {
        if self.certificate.issued(cert) != X509VerifyResult::OK {
            return Ok(false);
        }
        Ok(cert.verify(&self.key)?)
    }
}

/// Creates and loads the root and signing CAs on one host.
pub struct CaManager<'a> {
    host: &'a Host,
    config: TlsConfig,
}

impl<'a> CaManager<'a> {
    pub fn new(host: &'a Host, config: &TlsConfig) -> Self {
        Self {
            host,
            config: config.clone(),
        }
    }

    pub fn host(&self) -> &Host {
        self.host
    }

    pub fn certificate_path(&self, role: CaRole) -> PathBuf {
        self.host.tls_dir().join(format!("{}.pem", role.file_stem()))
    }

    pub fn key_path(&self, role: CaRole) -> PathBuf {
        self.host.tls_dir().join(format!("{}.key", role.file_stem()))
    }

    /// Returns the root CA, creating it if it does not exist.
    pub fn ensure_root(&self) -> Result<Provisioned<CertificateAuthority>> {
        if self.host.exists(&self.certificate_path(CaRole::Root)) {
            debug!(path = %self.certificate_path(CaRole::Root).display(), "Root CA already exists");
            return Ok(Provisioned::Existing(self.root()?));
        }

        let ca = self.build(CaRole::Root, &self.config.root_cn, None)?;
        self.install(&ca)?;
        info!(subject = %self.config.root_cn, "Created root CA");
        audit::log_root_created(&self.certificate_path(CaRole::Root), &ca.summary()?);
        Ok(Provisioned::Created(ca))
    }

    /// Returns the signing CA, creating it if it does not exist.
    ///
    /// # Errors
    ///
    /// `PrerequisiteMissing` when there is no root CA.
    pub fn ensure_signing(&self) -> Result<Provisioned<CertificateAuthority>> {
        if self.host.exists(&self.certificate_path(CaRole::Signing)) {
            debug!(path = %self.certificate_path(CaRole::Signing).display(), "Signing CA already exists");
            return Ok(Provisioned::Existing(self.signing()?));
        }

        let root = self.root()?;
        let ca = self.build(CaRole::Signing, &self.config.signing_cn, Some(&root))?;
        self.install(&ca)?;
        info!(subject = %self.config.signing_cn, "Created signing CA");
        audit::log_signing_created(&self.certificate_path(CaRole::Signing), &ca.summary()?);
        Ok(Provisioned::Created(ca))
    }

    /// Loads the root CA and checks that it is self-signed and matches its key.
    pub fn root(&self) -> Result<CertificateAuthority> {
        let ca = self.read(CaRole::Root)?;
        if !ca.issued(&ca.certificate)? {
            return Err(KeywardError::UnsupportedFormat(format!(
                "{} is not a self-signed CA certificate",
                self.certificate_path(CaRole::Root).display()
            )));
        }
        Ok(ca)
    }

    /// Loads the signing CA and checks that the root CA issued it.
    pub fn signing(&self) -> Result<CertificateAuthority> {
        let ca = self.read(CaRole::Signing)?;
        let root = self.root()?;
        if !root.issued(&ca.certificate)? {
            return Err(KeywardError::UnsupportedFormat(format!(
                "{} was not issued by the root CA",
                self.certificate_path(CaRole::Signing).display()
            )));
        }
        Ok(ca)
    }

    /// Writes a CA certificate and key to the role's fixed location,
    /// replacing whatever is there.
    pub fn install(&self, ca: &CertificateAuthority) -> Result<(PathBuf, PathBuf)> {
        let cert_pem = encode_certificate(&ca.certificate)?;
        let key_pem = encode_private_key(&ca.key)?;

        let cert_path = self.certificate_path(ca.role);
        let key_path = self.key_path(ca.role);
        self.host.write(&key_path, &key_pem, KEY_MODE)?;
        self.host.write(&cert_path, &cert_pem, CERT_MODE)?;
        Ok((cert_path, key_path))
    }

    /// The chain file contents: signing CA followed by root CA.
    pub fn chain_pem(&self) -> Result<Vec<u8>> {
        let signing = self.signing()?;
        let root = self.root()?;
        encode_certificates([&signing.certificate, &root.certificate])
    }

    fn read(&self, role: CaRole) -> Result<CertificateAuthority> {
        let cert_path = self.certificate_path(role);
        let key_path = self.key_path(role);

        let cert_pem = self.host.read_optional(&cert_path)?;
        let key_pem = self.host.read_optional(&key_path)?;
        let (cert_pem, key_pem) = match (cert_pem, key_pem) {
            (Some(cert), Some(key)) => (cert, key),
            _ => {
                return Err(KeywardError::PrerequisiteMissing(format!(
                    "{} CA not found under {}; run `tls init` first",
                    role,
                    self.host.tls_dir().display()
                )))
            }
        };

        let certificate = decode_first_certificate(&cert_pem)?;
        let key = decode_private_key(&key_pem)?;
        if !key_matches_certificate(&certificate, &key)? {
            return Err(KeywardError::UnsupportedFormat(format!(
                "{} does not match {}",
                key_path.display(),
                cert_path.display()
            )));
        }

        Ok(CertificateAuthority {
            role,
            certificate,
            key,
        })
    }

    fn build(
        &self,
        role: CaRole,
        cn: &str,
        issuer: Option<&CertificateAuthority>,
    ) -> Result<CertificateAuthority> {
        let key = generate_key(self.config.key_bits)?;
        let subject = common_name(cn)?;
        let issuer_name: &X509NameRef = match issuer {
            Some(ca) => ca.certificate.subject_name(),
            None => &subject,
        };

        let serial = generate_serial()?;
        let valid_from = not_before()?;
        let valid_to = Asn1Time::days_from_now(CA_VALIDITY_DAYS)?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&subject)?;
        builder.set_issuer_name(issuer_name)?;
        builder.set_pubkey(&key)?;
        builder.set_not_before(&valid_from)?;
        builder.set_not_after(&valid_to)?;
        builder.append_extension(
            BasicConstraints::new()
                .critical()
                .ca()
                .pathlen(role.path_len())
                .build()?,
        )?;
        builder.append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().build()?)?;

        let signing_key = issuer.map_or(&key, |ca| &ca.key);
        builder.sign(signing_key, MessageDigest::sha256())?;

        Ok(CertificateAuthority {
            role,
            certificate: builder.build(),
            key,
        })
    }
}
