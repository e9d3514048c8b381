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

//! Fan-out of keyfiles and the CA chain to every host.

use keyward::config::TlsConfig;
use keyward::distribute::{Distributor, SyncStatus};
use keyward::host::{Host, HostRegistry, MountFs};
use keyward::instance::Component;
use keyward::keyfiles::{self, KeyfileRegistry};
use keyward::tls::{self, CaManager};

#[test]
fn test_keyfile_reaches_every_host_once() {
    let dir = tempfile::tempdir().unwrap();
    let hosts = super::fleet(dir.path());
    let kv = keyfiles::new_keyfile();
    let components = [Component::Gateway, Component::Netprobe];

    let first = Distributor::new(&hosts).sync_keyfile(&components, &kv);
    assert_eq!(first.len(), 4);
    assert!(first
        .iter()
        .all(|outcome| matches!(outcome.result, Ok(SyncStatus::Written))));

    for host in hosts.all() {
        for component in components {
            let path = KeyfileRegistry::shared_path(host, component, &kv);
            assert_eq!(KeyfileRegistry::read(host, &path).unwrap(), kv);
        }
    }

    let second = Distributor::new(&hosts).sync_keyfile(&components, &kv);
    assert!(second
        .iter()
        .all(|outcome| matches!(outcome.result, Ok(SyncStatus::Unchanged))));
}

#[test]
fn test_unreachable_host_does_not_stop_others() {
    let dir = tempfile::tempdir().unwrap();
    // A mount point that is a regular file cannot hold directories
    let blocked = dir.path().join("blocked");
    std::fs::write(&blocked, b"not a directory").unwrap();

    let hosts = HostRegistry::new(
        Host::local(dir.path().join("local")),
        vec![
            Host::new("broken", "broken", "/opt/geneos", Box::new(MountFs::new(&blocked))),
            Host::new(
                "remote",
                "remote",
                "/opt/geneos",
                Box::new(MountFs::new(dir.path().join("remote"))),
            ),
        ],
    );
    let kv = keyfiles::new_keyfile();

    let outcomes = Distributor::new(&hosts).sync_keyfile(&[Component::Gateway], &kv);
    let by_host = |name: &str| outcomes.iter().find(|o| o.host == name).unwrap();
    assert!(by_host("localhost").is_ok());
    assert!(!by_host("broken").is_ok());
    assert!(by_host("remote").is_ok());

    let remote = hosts.get("remote").unwrap();
    assert!(remote.exists(&KeyfileRegistry::shared_path(remote, Component::Gateway, &kv)));
}

#[test]
fn test_init_copies_chain_to_remote() {
    let dir = tempfile::tempdir().unwrap();
    let hosts = super::fleet(dir.path());
    let config = TlsConfig::default();

    let report = tls::init(&hosts, &config).unwrap();
    assert_eq!(report.chain.len(), 2);

    let chain = CaManager::new(hosts.local(), &config).chain_pem().unwrap();
    let remote = hosts.get("remote").unwrap();
    assert_eq!(remote.read(&remote.tls_dir().join("chain.pem")).unwrap(), chain);

    let resync = Distributor::new(&hosts).sync_chain(&chain, &config.chain_file);
    assert!(resync
        .iter()
        .all(|outcome| matches!(outcome.result, Ok(SyncStatus::Unchanged))));
}
