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

//! Exports the signing CA, its key and the root certificate as one PEM
//! bundle, so that another installation can issue certificates under the
//! same chain.

use openssl::x509::X509Ref;

use super::{CaManager, CertificateSummary};
use crate::audit;
use crate::crypto::{encode_certificate, encode_private_key};
use crate::error::Result;

/// The signing key, the signing CA certificate and the root CA certificate,
/// each preceded by a comment block describing it.
///
/// The root private key is never included. Text outside the PEM blocks is
/// ignored by [`import`](super::import).
pub fn export(manager: &CaManager<'_>) -> Result<Vec<u8>> {
    let signing = manager.signing()?;
    let root = manager.root()?;
    let signing_summary = signing.summary()?;

    let mut out = Vec::new();
    out.extend_from_slice(b"# Exported root and signing CA certificates and signing CA key\n#\n");
    out.extend_from_slice(b"# Signing CA private key\n#\n");
    out.extend(encode_private_key(&signing.key)?);
    out.extend(describe("Signing CA certificate", &signing.certificate)?);
    out.extend(encode_certificate(&signing.certificate)?);
    out.extend(describe("Root CA certificate", &root.certificate)?);
    out.extend(encode_certificate(&root.certificate)?);

    audit::log_ca_exported(&signing_summary);
    Ok(out)
}

fn describe(title: &str, cert: &X509Ref) -> Result<Vec<u8>> {
    let summary = CertificateSummary::from_certificate(cert)?;
    let lines = [
        format!("# {}", title),
        "#".to_string(),
        format!("#   Subject: {}", summary.subject),
        format!("#    Issuer: {}", summary.issuer),
        format!("#   Expires: {}", summary.not_after),
        format!("#    Serial: {}", summary.serial),
        format!("#    SHA256: {}", summary.fingerprint),
        "#".to_string(),
    ];
    Ok(format!("{}\n", lines.join("\n")).into_bytes())
}
