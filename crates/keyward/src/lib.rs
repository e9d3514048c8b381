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

//! # Keyward
//!
//! Credential and certificate lifecycle management for a fleet of
//! monitoring product instances.
//!
//! Keyward maintains a two-level certificate authority, issues and renews
//! instance certificates signed by it, installs externally supplied CA
//! material, and manages the symmetric keyfiles used to encode passwords
//! stored in instance configuration, including rollover from one keyfile to
//! the next without losing the ability to decode existing secrets.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use keyward::config::KeywardConfig;
//! use keyward::host::HostRegistry;
//! use keyward::instance::{Component, InstanceRegistry};
//! use keyward::tls::{self, CaManager, CertificateIssuer};
//!
//! # fn main() -> keyward::Result<()> {
//! let config = KeywardConfig::with_root("/opt/geneos");
//! let hosts = HostRegistry::from_config(&config);
//!
//! // Create the root and signing CAs and copy the chain to every host
//! tls::init(&hosts, &config.tls)?;
//!
//! let mut instances = InstanceRegistry::new();
//! let gateway = instances.load(hosts.local(), Component::Gateway, "gw1")?;
//!
//! let manager = CaManager::new(hosts.local(), &config.tls);
//! let issuer = CertificateIssuer::new(&manager, &config.tls)?;
//! issuer.renew(hosts.local(), gateway)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`tls`]: the certificate authority, instance certificates and import
//! - [`keyfiles`]: keyfile storage, lookup and rotation
//! - [`secrets`]: encoding and decoding secrets against keyfiles
//! - [`distribute`]: copying material to every host
//! - [`host`]: file access on local and remote hosts
//! - [`instance`]: managed instances and their settings
//! - [`config`]: configuration loading
//! - [`audit`]: structured audit events

pub mod audit;
pub mod config;
pub mod crypto;
pub mod distribute;
pub mod error;
pub mod host;
pub mod instance;
pub mod keyfiles;
pub mod secrets;
pub mod tls;

pub use error::{KeywardError, Result};
