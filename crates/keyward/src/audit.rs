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

//! Audit logging for certificate and keyfile operations.
//!
//! Every event that creates, installs or replaces credential material is
//! logged with an `event_type` field and structured details, so that the
//! events can be filtered out of the general log stream. Events are logged
//! using the `tracing` crate at appropriate levels.
//!
//! Key material and plaintext secrets are never logged. Fingerprints,
//! serials and keyfile checksums are.

use std::path::Path;

use crate::instance::InstanceId;
use crate::tls::CertificateSummary;

/// Event types.
pub mod events {
    /// Root CA created event type.
    pub const TLS_ROOT_CREATED: &str = "tls.root.created";
    /// Signing CA created event type.
    pub const TLS_SIGNING_CREATED: &str = "tls.signing.created";
    /// Instance certificate issued event type.
    pub const TLS_INSTANCE_ISSUED: &str = "tls.instance.issued";
    /// Instance certificate renewed event type.
    pub const TLS_INSTANCE_RENEWED: &str = "tls.instance.renewed";
    /// Imported CA installed event type.
    pub const TLS_IMPORT_INSTALLED: &str = "tls.import.installed";
    /// Imported certificate skipped event type.
    pub const TLS_IMPORT_SKIPPED: &str = "tls.import.skipped";
    /// Signing CA and key exported event type.
    pub const TLS_CA_EXPORTED: &str = "tls.ca.exported";

    /// Keyfile generated event type.
    pub const KEYFILE_CREATED: &str = "keyfile.created";
    /// Keyfile saved to a shared directory event type.
    pub const KEYFILE_SAVED: &str = "keyfile.saved";
    /// Instance keyfile rotated event type.
    pub const KEYFILE_ROTATED: &str = "keyfile.rotated";

    /// Secret decode failure event type.
    pub const SECRET_DECODE_FAILED: &str = "secret.decode.failed";

    /// Per-host distribution failure event type.
    pub const SYNC_HOST_FAILED: &str = "sync.host.failed";
}

/// Log creation of the root CA.
pub fn log_root_created(path: &Path, summary: &CertificateSummary) {
    tracing::info!(
        event_type = events::TLS_ROOT_CREATED,
        path = %path.display(),
        subject = %summary.subject,
        serial = %summary.serial,
        fingerprint = %summary.fingerprint,
        not_after = %summary.not_after,
        "Root CA created"
    );
}

/// Log creation of the signing CA.
pub fn log_signing_created(path: &Path, summary: &CertificateSummary) {
    tracing::info!(
        event_type = events::TLS_SIGNING_CREATED,
        path = %path.display(),
        subject = %summary.subject,
        issuer = %summary.issuer,
        serial = %summary.serial,
        fingerprint = %summary.fingerprint,
        not_after = %summary.not_after,
        "Signing CA created"
    );
}

/// Log issuance of an instance certificate.
pub fn log_instance_issued(instance: &InstanceId, summary: &CertificateSummary) {
    tracing::info!(
        event_type = events::TLS_INSTANCE_ISSUED,
        instance = %instance,
        subject = %summary.subject,
        serial = %summary.serial,
        key_fingerprint = %summary.key_fingerprint,
        not_after = %summary.not_after,
        "Instance certificate issued"
    );
}

/// Log renewal of an instance certificate.
pub fn log_instance_renewed(instance: &InstanceId, summary: &CertificateSummary, new_key: bool) {
    tracing::info!(
        event_type = events::TLS_INSTANCE_RENEWED,
        instance = %instance,
        subject = %summary.subject,
        serial = %summary.serial,
        key_fingerprint = %summary.key_fingerprint,
        new_key = new_key,
        not_after = %summary.not_after,
        "Instance certificate renewed"
    );
}

/// Log installation of an imported CA certificate and key.
pub fn log_import_installed(role: &str, path: &Path, summary: &CertificateSummary) {
    tracing::warn!(
        event_type = events::TLS_IMPORT_INSTALLED,
        role = %role,
        path = %path.display(),
        subject = %summary.subject,
        serial = %summary.serial,
        fingerprint = %summary.fingerprint,
        "Imported CA installed"
    );
}

/// Log a certificate left out of an import.
pub fn log_import_skipped(role: &str, subject: &str, reason: &str) {
    tracing::info!(
        event_type = events::TLS_IMPORT_SKIPPED,
        role = %role,
        subject = %subject,
        reason = %reason,
        "Imported certificate skipped"
    );
}

/// Log an export of the signing CA and its private key.
pub fn log_ca_exported(summary: &CertificateSummary) {
    tracing::warn!(
        event_type = events::TLS_CA_EXPORTED,
        subject = %summary.subject,
        serial = %summary.serial,
        fingerprint = %summary.fingerprint,
        "Signing CA exported"
    );
}

/// Log generation of a keyfile.
pub fn log_keyfile_created(crc: &str, path: Option<&Path>) {
    tracing::info!(
        event_type = events::KEYFILE_CREATED,
        crc = %crc,
        path = %path.map(|p| p.display().to_string()).unwrap_or_else(|| "<stdout>".to_string()),
        "Keyfile created"
    );
}

/// Log a keyfile written to a shared directory.
pub fn log_keyfile_saved(host: &str, path: &Path, crc: &str) {
    tracing::info!(
        event_type = events::KEYFILE_SAVED,
        host = %host,
        path = %path.display(),
        crc = %crc,
        "Keyfile saved"
    );
}

/// Log an instance switching keyfile.
pub fn log_keyfile_rotated(
    instance: &InstanceId,
    keyfile: &Path,
    crc: &str,
    prevkeyfile: Option<&Path>,
) {
    tracing::warn!(
        event_type = events::KEYFILE_ROTATED,
        instance = %instance,
        keyfile = %keyfile.display(),
        crc = %crc,
        prevkeyfile = %prevkeyfile
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string()),
        "Instance keyfile rotated"
    );
}

/// Log a secret that no candidate keyfile could decode.
pub fn log_decode_failed(tried: usize) {
    tracing::warn!(
        event_type = events::SECRET_DECODE_FAILED,
        tried = tried,
        "Secret decode failed"
    );
}

/// Log a distribution failure on one host.
pub fn log_sync_host_failed(host: &str, path: &Path, error: &str) {
    tracing::error!(
        event_type = events::SYNC_HOST_FAILED,
        host = %host,
        path = %path.display(),
        error = %error,
        "Distribution to host failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_decode_failure_logs_count_only() {
        log_decode_failed(3);
        assert!(logs_contain(events::SECRET_DECODE_FAILED));
        assert!(logs_contain("tried=3"));
    }

    #[test]
    #[traced_test]
    fn test_sync_failure_names_host() {
        log_sync_host_failed(
            "remote1",
            Path::new("/opt/geneos/tls/chain.pem"),
            "connection refused",
        );
        assert!(logs_contain("remote1"));
        assert!(logs_contain("connection refused"));
    }
}
