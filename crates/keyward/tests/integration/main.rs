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

//! Integration tests for keyward.
//!
//! Each test works in its own temporary product root. Remote hosts are
//! simulated with [`MountFs`] over a second temporary directory.

mod distribution;
mod keyfiles;
mod tls;

use std::path::Path;

use keyward::host::{Host, HostRegistry, MountFs};

/// A local host under `dir/local` and a mounted remote under `dir/remote`.
pub fn fleet(dir: &Path) -> HostRegistry {
    let remote = Host::new(
        "remote",
        "remote.example.com",
        "/opt/geneos",
        Box::new(MountFs::new(dir.join("remote"))),
    );
    HostRegistry::new(Host::local(dir.join("local")), vec![remote])
}
