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

//! The two-level certificate authority and the certificates it issues.
//!
//! # Layout
//!
//! The CA lives under `<root>/tls` on the local host:
//!
//! ```text
//! tls/rootCA.pem      tls/rootCA.key
//! tls/signingCA.pem   tls/signingCA.key
//! tls/chain.pem       signing CA followed by root CA, copied to every host
//! ```
//!
//! Instance certificates and keys live in each instance's home directory
//! on its own host.

mod authority;
mod export;
mod import;
mod issuer;
mod summary;

pub use authority::{CaManager, CaRole, CertificateAuthority, Provisioned};
pub use export::export;
pub use import::{import, ImportReport, ImportedPair, SkipReason, SkippedCertificate};
pub use issuer::{CertificateIssuer, IssueOutcome, IssuedCertificate, Renewal};
pub use summary::CertificateSummary;

use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::BigNum;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509Name, X509NameBuilder};

use crate::config::TlsConfig;
use crate::distribute::{Distributor, HostOutcome};
use crate::error::Result;
use crate::host::HostRegistry;

/// Permission bits for certificate files.
pub const CERT_MODE: u32 = 0o644;

/// Permission bits for private key files.
pub const KEY_MODE: u32 = 0o600;

/// Seconds subtracted from "now" for `notBefore`, to tolerate clock skew
/// between hosts.
const CLOCK_SKEW_SECS: i64 = 60;

/// Bits in a certificate serial number.
const SERIAL_BITS: i32 = 64;

/// Result of [`init`].
#[derive(Debug)]
pub struct InitReport {
    pub root: Provisioned<CertificateSummary>,
    pub signing: Provisioned<CertificateSummary>,
    pub chain: Vec<HostOutcome>,
}

/// Creates the root and signing CAs if they do not exist, then copies the
/// chain file to every host.
pub fn init(hosts: &HostRegistry, config: &TlsConfig) -> Result<InitReport> {
    let manager = CaManager::new(hosts.local(), config);
    let root = manager.ensure_root()?.map(|ca| ca.summary());
    let signing = manager.ensure_signing()?.map(|ca| ca.summary());
    let chain = Distributor::new(hosts).sync_chain(&manager.chain_pem()?, &config.chain_file);

    Ok(InitReport {
        root: root.transpose()?,
        signing: signing.transpose()?,
        chain,
    })
}

/// A fresh random prime serial number.
pub(crate) fn generate_serial() -> Result<Asn1Integer> {
    let mut serial = BigNum::new()?;
    serial.generate_prime(SERIAL_BITS, false, None, None)?;
    Ok(serial.to_asn1_integer()?)
}

/// `notBefore` for a certificate issued now.
pub(crate) fn not_before() -> Result<Asn1Time> {
    let now = chrono::Utc::now().timestamp() - CLOCK_SKEW_SECS;
    Ok(Asn1Time::from_unix(now as _)?)
}

pub(crate) fn generate_key(bits: u32) -> Result<PKey<Private>> {
    let rsa = Rsa::generate(bits)?;
    Ok(PKey::from_rsa(rsa)?)
}

pub(crate) fn common_name(cn: &str) -> Result<X509Name> {
    let mut builder = X509NameBuilder::new()?;
    builder.append_entry_by_nid(Nid::COMMONNAME, cn)?;
    Ok(builder.build())
}
