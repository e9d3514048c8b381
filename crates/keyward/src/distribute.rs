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

//! Copies keyfiles and the CA chain to every host.
//!
//! Each host is handled independently: a failure on one host is recorded in
//! that host's [`HostOutcome`] and the remaining hosts are still processed.
//! Hosts that already hold identical material are left alone.

use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::audit;
use crate::crypto::KeyValues;
use crate::error::Result;
use crate::host::{Host, HostRegistry};
use crate::instance::Component;
use crate::keyfiles::{KeyfileRegistry, SaveOutcome};
use crate::tls::CERT_MODE;

/// What happened on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Written,
    /// Identical material was already present.
    Unchanged,
}

/// The outcome of a distribution step on one host.
#[derive(Debug)]
pub struct HostOutcome {
    pub host: String,
    /// Target path on that host. Empty when the failure happened before a
    /// path was known.
    pub path: PathBuf,
    pub result: Result<SyncStatus>,
}

impl HostOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Fans material out to the local host and every remote host in order.
pub struct Distributor<'a> {
    hosts: &'a HostRegistry,
}

impl<'a> Distributor<'a> {
    pub fn new(hosts: &'a HostRegistry) -> Self {
        Self { hosts }
    }

    /// Saves `kv` into the shared keyfile directory of each component on
    /// every host.
    pub fn sync_keyfile(&self, components: &[Component], kv: &KeyValues) -> Vec<HostOutcome> {
        let mut outcomes = Vec::new();
        for host in self.hosts.all() {
            for &component in components {
                let path = KeyfileRegistry::shared_path(host, component, kv);
                let result =
                    KeyfileRegistry::save_to_shared(host, component, kv).map(|saved| match saved {
                        SaveOutcome::Written(_) => SyncStatus::Written,
                        SaveOutcome::Existing(_) => SyncStatus::Unchanged,
                    });
                outcomes.push(record(host, path, result));
            }
        }
        outcomes
    }

    /// Writes the CA chain to `<root>/tls/<chain_file>` on every host.
    pub fn sync_chain(&self, chain: &[u8], chain_file: &str) -> Vec<HostOutcome> {
        self.hosts
            .all()
            .map(|host| {
                let path = host.tls_dir().join(chain_file);
                let result = write_if_changed(host, &path, chain, CERT_MODE);
                record(host, path, result)
            })
            .collect()
    }
}

/// Writes `data` unless the file already holds exactly these bytes.
pub fn write_if_changed(host: &Host, path: &Path, data: &[u8], mode: u32) -> Result<SyncStatus> {
    if host.read_optional(path)?.as_deref() == Some(data) {
        debug!(host = %host.name(), path = %path.display(), "Identical file present");
        return Ok(SyncStatus::Unchanged);
    }
    host.write(path, data, mode)?;
    Ok(SyncStatus::Written)
}

fn record(host: &Host, path: PathBuf, result: Result<SyncStatus>) -> HostOutcome {
    if let Err(e) = &result {
        error!(host = %host.name(), path = %path.display(), error = %e, "Distribution failed");
        audit::log_sync_host_failed(host.name(), &path, &e.to_string());
    }
    HostOutcome {
        host: host.name().to_string(),
        path,
        result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MountFs;

    #[test]
    fn test_chain_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Host::new(
            "remote",
            "remote",
            "/opt/geneos",
            Box::new(MountFs::new(dir.path().join("remote"))),
        );
        let hosts = HostRegistry::new(Host::local(dir.path().join("local")), vec![remote]);
        let distributor = Distributor::new(&hosts);

        let first = distributor.sync_chain(b"chain", "chain.pem");
        assert!(first
            .iter()
            .all(|o| matches!(o.result, Ok(SyncStatus::Written))));

        let second = distributor.sync_chain(b"chain", "chain.pem");
        assert!(second
            .iter()
            .all(|o| matches!(o.result, Ok(SyncStatus::Unchanged))));
        assert!(dir.path().join("remote/opt/geneos/tls/chain.pem").is_file());
    }
}
