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

//! Keyfile storage, rotation and secret decoding across a rollover.

use keyward::crypto::KeyValues;
use keyward::host::Host;
use keyward::instance::{Component, InstanceRegistry};
use keyward::keyfiles::{self, KeyfileRegistry, RotateOutcome, SaveOutcome};
use keyward::secrets;
use keyward::KeywardError;

#[test]
fn test_checksum_is_stable_across_save_and_read() {
    let dir = tempfile::tempdir().unwrap();
    let host = Host::local(dir.path());
    let kv = keyfiles::new_keyfile();

    let saved = KeyfileRegistry::save_to_shared(&host, Component::Gateway, &kv).unwrap();
    let read = KeyfileRegistry::read(&host, saved.path()).unwrap();
    assert_eq!(read, kv);
    assert_eq!(keyfiles::checksum(&read), keyfiles::checksum(&kv));
    assert_eq!(
        saved.path().file_name().unwrap().to_str().unwrap(),
        format!("{}.aes", kv.checksum_string())
    );
}

#[test]
fn test_save_to_shared_twice_leaves_file_alone() {
    let dir = tempfile::tempdir().unwrap();
    let host = Host::local(dir.path());
    let kv = keyfiles::new_keyfile();

    let first = KeyfileRegistry::save_to_shared(&host, Component::Netprobe, &kv).unwrap();
    assert!(matches!(first, SaveOutcome::Written(_)));
    let before = std::fs::metadata(first.path()).unwrap().modified().unwrap();

    let second = KeyfileRegistry::save_to_shared(&host, Component::Netprobe, &kv).unwrap();
    assert_eq!(second, SaveOutcome::Existing(first.path().to_path_buf()));
    let after = std::fs::metadata(first.path()).unwrap().modified().unwrap();
    assert_eq!(before, after);
}

#[cfg(unix)]
#[test]
fn test_shared_keyfile_is_private() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let host = Host::local(dir.path());
    let saved =
        KeyfileRegistry::save_to_shared(&host, Component::San, &keyfiles::new_keyfile()).unwrap();

    let mode = std::fs::metadata(saved.path()).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn test_secret_survives_rollover() {
    let dir = tempfile::tempdir().unwrap();
    let host = Host::local(dir.path());
    let mut registry = InstanceRegistry::new();
    let instance = registry.create(&host, Component::Gateway, "gw1").unwrap();

    let old = keyfiles::new_keyfile();
    let old_path = KeyfileRegistry::save_to_shared(&host, Component::Gateway, &old)
        .unwrap()
        .path()
        .to_path_buf();
    KeyfileRegistry::rotate(&host, instance, &old_path, false).unwrap();
    let encoded = secrets::encode("hunter2", &old).unwrap();

    let new = keyfiles::new_keyfile();
    let new_path = KeyfileRegistry::save_to_shared(&host, Component::Gateway, &new)
        .unwrap()
        .path()
        .to_path_buf();
    let outcome = KeyfileRegistry::rotate(&host, instance, &new_path, false).unwrap();
    assert_eq!(
        outcome,
        RotateOutcome::Updated {
            keyfile: new_path.clone(),
            prevkeyfile: Some(old_path.clone()),
        }
    );

    // Reloaded from disk, the instance still decodes the old secret
    registry.unload(&instance_id());
    let instance = registry.load(&host, Component::Gateway, "gw1").unwrap();
    let candidates = secrets::candidate_paths(&[], Some(instance.settings()), &[]);
    assert_eq!(candidates, vec![new_path, old_path]);
    assert_eq!(
        secrets::decode_with_keyfiles(&host, &encoded, &candidates).unwrap(),
        "hunter2"
    );

    let fresh = secrets::encode("hunter3", &new).unwrap();
    assert_eq!(secrets::decode(&fresh, &[new, old]).unwrap(), "hunter3");
}

fn instance_id() -> keyward::instance::InstanceId {
    keyward::instance::InstanceId::new(Component::Gateway, "gw1", keyward::host::LOCALHOST)
}

#[test]
fn test_decode_reports_candidates_tried() {
    let encoded = secrets::encode("secret", &keyfiles::new_keyfile()).unwrap();
    let others: Vec<KeyValues> = (0..3).map(|_| keyfiles::new_keyfile()).collect();

    match secrets::decode(&encoded, &others) {
        Err(KeywardError::DecodeFailed { tried }) => assert_eq!(tried, 3),
        other => panic!("expected DecodeFailed, got {:?}", other),
    }
}

#[test]
fn test_expandable_value_uses_embedded_keyfile() {
    let dir = tempfile::tempdir().unwrap();
    let host = Host::local(dir.path());
    let kv = keyfiles::new_keyfile();
    let path = KeyfileRegistry::save_to_shared(&host, Component::Floating, &kv)
        .unwrap()
        .path()
        .to_path_buf();

    let value = secrets::encode_expandable("pa55", &kv, &path).unwrap();
    assert!(value.starts_with("${enc:"));
    assert_eq!(secrets::decode_with_keyfiles(&host, &value, &[]).unwrap(), "pa55");
}

#[test]
fn test_locate_finds_shared_keyfile_by_crc() {
    let dir = tempfile::tempdir().unwrap();
    let hosts = super::fleet(dir.path());
    let kv = keyfiles::new_keyfile();
    let remote = hosts.get("remote").unwrap();
    KeyfileRegistry::save_to_shared(remote, Component::Netprobe, &kv).unwrap();

    let registry = KeyfileRegistry::new(&hosts);
    let (host, path, found) = registry.locate(kv.checksum()).unwrap();
    assert_eq!(host.name(), "remote");
    assert_eq!(path, KeyfileRegistry::shared_path(remote, Component::Netprobe, &kv));
    assert_eq!(found, kv);

    let missing = keyfiles::new_keyfile();
    assert!(matches!(
        registry.locate(missing.checksum()),
        Err(KeywardError::ChecksumMismatch(_))
    ));
}
