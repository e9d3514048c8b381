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

//! Certificate authority, issuance, renewal and import.

use keyward::config::TlsConfig;
use keyward::crypto::{decode_all, key_matches_certificate, PemItem};
use keyward::host::Host;
use keyward::instance::{Component, Instance};
use keyward::tls::{self, CaManager, CaRole, CertificateIssuer, SkipReason};
use openssl::x509::X509VerifyResult;

fn initialised(dir: &std::path::Path) -> (Host, TlsConfig) {
    let host = Host::local(dir);
    let config = TlsConfig::default();
    let manager = CaManager::new(&host, &config);
    manager.ensure_root().unwrap();
    manager.ensure_signing().unwrap();
    (host, config)
}

#[test]
fn test_init_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let hosts = super::fleet(dir.path());
    let config = TlsConfig::default();

    let first = tls::init(&hosts, &config).unwrap();
    assert!(first.root.is_created());
    assert!(first.signing.is_created());
    assert!(first.chain.iter().all(|outcome| outcome.is_ok()));

    let manager = CaManager::new(hosts.local(), &config);
    let files = [CaRole::Root, CaRole::Signing]
        .into_iter()
        .flat_map(|role| [manager.certificate_path(role), manager.key_path(role)])
        .map(|path| hosts.local().read(&path).unwrap())
        .collect::<Vec<_>>();

    let second = tls::init(&hosts, &config).unwrap();
    assert!(!second.root.is_created());
    assert!(!second.signing.is_created());
    assert_eq!(second.root.get().fingerprint, first.root.get().fingerprint);

    let again = [CaRole::Root, CaRole::Signing]
        .into_iter()
        .flat_map(|role| [manager.certificate_path(role), manager.key_path(role)])
        .map(|path| hosts.local().read(&path).unwrap())
        .collect::<Vec<_>>();
    assert_eq!(files, again);
}

#[test]
fn test_chain_verifies_instance_certificate() {
    let dir = tempfile::tempdir().unwrap();
    let (host, config) = initialised(dir.path());
    let manager = CaManager::new(&host, &config);
    let root = manager.root().unwrap();
    let signing = manager.signing().unwrap();

    assert_eq!(root.certificate.issued(&signing.certificate), X509VerifyResult::OK);
    assert!(signing.certificate.verify(&root.key).unwrap());

    let issuer = CertificateIssuer::new(&manager, &config).unwrap();
    let instance = Instance::new(&host, Component::Gateway, "gw1").unwrap();
    let (leaf, _) = issuer.issue_certificate(&host, &instance).unwrap();
    assert_eq!(signing.certificate.issued(&leaf), X509VerifyResult::OK);
    assert!(leaf.verify(&signing.key).unwrap());

    // Chain file is signing CA then root CA
    let chain = decode_all(&manager.chain_pem().unwrap()).unwrap();
    let subjects: Vec<_> = chain
        .iter()
        .map(|item| match item {
            PemItem::Certificate(cert) => cert.subject_name().to_der().unwrap(),
            PemItem::PrivateKey(_) => panic!("chain holds a key"),
        })
        .collect();
    assert_eq!(
        subjects,
        vec![
            signing.certificate.subject_name().to_der().unwrap(),
            root.certificate.subject_name().to_der().unwrap(),
        ]
    );
}

#[test]
fn test_issue_then_renew_keeps_key() {
    let dir = tempfile::tempdir().unwrap();
    let (host, config) = initialised(dir.path());
    let manager = CaManager::new(&host, &config);
    let issuer = CertificateIssuer::new(&manager, &config).unwrap();
    let mut instance = Instance::new(&host, Component::Netprobe, "np1").unwrap();

    let issued = issuer.issue(&host, &mut instance).unwrap();
    assert!(issued.key_written);
    let key_before = host.read(&instance.private_key_path()).unwrap();

    let renewed = issuer.renew(&host, &mut instance).unwrap();
    assert!(!renewed.key_written);
    assert_ne!(renewed.summary.serial, issued.summary.serial);
    assert_eq!(renewed.summary.key_fingerprint, issued.summary.key_fingerprint);
    assert_eq!(renewed.summary.issuer, issued.summary.issuer);
    assert!((363..=365).contains(&renewed.summary.expires_in_days));
    assert_eq!(host.read(&instance.private_key_path()).unwrap(), key_before);

    let cert_pem = host.read(&instance.certificate_path()).unwrap();
    let leaf = keyward::crypto::decode_first_certificate(&cert_pem).unwrap();
    let key = keyward::crypto::decode_private_key(&key_before).unwrap();
    assert!(key_matches_certificate(&leaf, &key).unwrap());
    assert!(issuer.signing_ca().issued(&leaf).unwrap());
}

#[test]
fn test_import_pairs_certificates_with_keys() {
    let source_dir = tempfile::tempdir().unwrap();
    let (source, config) = initialised(source_dir.path());
    let source_manager = CaManager::new(&source, &config);

    let read = |role| {
        let mut pem = source.read(&source_manager.certificate_path(role)).unwrap();
        pem.extend(source.read(&source_manager.key_path(role)).unwrap());
        pem
    };
    let bundle = [read(CaRole::Signing), read(CaRole::Root)];

    let target_dir = tempfile::tempdir().unwrap();
    let target = Host::local(target_dir.path());
    let manager = CaManager::new(&target, &config);

    let report = tls::import(&manager, &bundle).unwrap();
    assert!(report.installed(CaRole::Root));
    assert!(report.installed(CaRole::Signing));
    assert!(report.skipped.is_empty());

    assert_eq!(
        manager.root().unwrap().summary().unwrap().fingerprint,
        source_manager.root().unwrap().summary().unwrap().fingerprint
    );
    assert_eq!(manager.chain_pem().unwrap(), source_manager.chain_pem().unwrap());
}

#[test]
fn test_import_single_bundle_holds_both_pairs() {
    let source_dir = tempfile::tempdir().unwrap();
    let (source, config) = initialised(source_dir.path());
    let source_manager = CaManager::new(&source, &config);

    // One source, keys and certificates interleaved
    let mut bundle = source.read(&source_manager.key_path(CaRole::Root)).unwrap();
    bundle.extend(source.read(&source_manager.certificate_path(CaRole::Signing)).unwrap());
    bundle.extend(source.read(&source_manager.certificate_path(CaRole::Root)).unwrap());
    bundle.extend(source.read(&source_manager.key_path(CaRole::Signing)).unwrap());
    assert_eq!(decode_all(&bundle).unwrap().len(), 4);

    let target_dir = tempfile::tempdir().unwrap();
    let target = Host::local(target_dir.path());
    let manager = CaManager::new(&target, &config);

    let report = tls::import(&manager, &[bundle]).unwrap();
    assert_eq!(report.imported.len(), 2);
    assert!(report.installed(CaRole::Root));
    assert!(report.installed(CaRole::Signing));
    assert!(report.skipped.is_empty());

    let signing = manager.signing().unwrap();
    assert_eq!(
        signing.summary().unwrap().fingerprint,
        source_manager.signing().unwrap().summary().unwrap().fingerprint
    );
    assert_eq!(manager.chain_pem().unwrap(), source_manager.chain_pem().unwrap());
}

#[test]
fn test_exported_bundle_imports_with_root_key() {
    let source_dir = tempfile::tempdir().unwrap();
    let (source, config) = initialised(source_dir.path());
    let source_manager = CaManager::new(&source, &config);

    let exported = tls::export(&source_manager).unwrap();
    let root_key = source.read(&source_manager.key_path(CaRole::Root)).unwrap();

    let target_dir = tempfile::tempdir().unwrap();
    let target = Host::local(target_dir.path());
    let manager = CaManager::new(&target, &config);

    let report = tls::import(&manager, &[exported, root_key]).unwrap();
    assert!(report.installed(CaRole::Root));
    assert!(report.installed(CaRole::Signing));
    assert_eq!(manager.chain_pem().unwrap(), source_manager.chain_pem().unwrap());
}

#[test]
fn test_import_skips_certificate_without_key() {
    let source_dir = tempfile::tempdir().unwrap();
    let (source, config) = initialised(source_dir.path());
    let source_manager = CaManager::new(&source, &config);

    // Signing certificate alone, root with its key
    let mut bundle = source.read(&source_manager.certificate_path(CaRole::Signing)).unwrap();
    bundle.extend(source.read(&source_manager.certificate_path(CaRole::Root)).unwrap());
    bundle.extend(source.read(&source_manager.key_path(CaRole::Root)).unwrap());

    let target_dir = tempfile::tempdir().unwrap();
    let target = Host::local(target_dir.path());
    let manager = CaManager::new(&target, &config);

    let report = tls::import(&manager, &[bundle]).unwrap();
    assert!(report.installed(CaRole::Root));
    assert!(!report.installed(CaRole::Signing));
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].role, CaRole::Signing);
    assert_eq!(report.skipped[0].reason, SkipReason::NoMatchingKey);
    assert!(!target.exists(&manager.certificate_path(CaRole::Signing)));
}

#[test]
fn test_import_rejects_unsupported_block() {
    let dir = tempfile::tempdir().unwrap();
    let host = Host::local(dir.path());
    let config = TlsConfig::default();
    let manager = CaManager::new(&host, &config);

    let bogus = pem::encode(&pem::Pem::new("PUBLIC KEY", vec![1, 2, 3]));
    assert!(tls::import(&manager, &[bogus]).is_err());
    assert!(!host.exists(&manager.certificate_path(CaRole::Root)));
}
