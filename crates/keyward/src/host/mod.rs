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

//! Uniform file access across the local host and remote hosts.
//!
//! Every operation that touches certificate or keyfile material goes
//! through a [`Host`], which pairs a host's identity with a [`HostFs`]
//! implementation. Paths handed to a `HostFs` are absolute paths as seen on
//! that host; the implementation decides how to reach them.

mod local;
mod ssh;

pub use local::{LocalFs, MountFs};
pub use ssh::SshFs;

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{HostConfig, KeywardConfig, TransportConfig};
use crate::error::{KeywardError, Result};

/// Name of the local host in the registry.
pub const LOCALHOST: &str = "localhost";

/// Metadata returned by [`HostFs::stat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub is_dir: bool,
    pub len: u64,
}

/// A directory entry returned by [`HostFs::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// File operations on one host.
pub trait HostFs: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Writes `data` to `path`, replacing any existing file, and sets the
    /// permission bits to `mode`.
    fn write(&self, path: &Path, data: &[u8], mode: u32) -> io::Result<()>;

    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// Creates `path` and any missing parents.
    fn mkdir_all(&self, path: &Path) -> io::Result<()>;

    /// Lists the entries of a directory, sorted by name.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool {
        self.stat(path).is_ok()
    }
}

/// A host that holds product files.
pub struct Host {
    name: String,
    hostname: String,
    root: PathBuf,
    fs: Box<dyn HostFs>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("hostname", &self.hostname)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl Host {
    pub fn new(
        name: impl Into<String>,
        hostname: impl Into<String>,
        root: impl Into<PathBuf>,
        fs: Box<dyn HostFs>,
    ) -> Self {
        Self {
            name: name.into(),
            hostname: hostname.into(),
            root: root.into(),
            fs,
        }
    }

    /// The local host, with the product installed at `root`.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        let hostname = sysinfo::System::host_name().unwrap_or_else(|| LOCALHOST.to_string());
        Self::new(LOCALHOST, hostname, root, Box::new(LocalFs))
    }

    /// Builds a remote host from its configuration entry.
    pub fn from_config(config: &HostConfig) -> Self {
        let fs: Box<dyn HostFs> = match &config.transport {
            TransportConfig::Ssh { target } => Box::new(SshFs::new(
                target.clone().unwrap_or_else(|| config.name.clone()),
            )),
            TransportConfig::Mount { path } => Box::new(MountFs::new(path)),
        };
        Self::new(&config.name, config.hostname(), &config.root, fs)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hostname placed in certificate SANs.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Product root directory on this host.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_local(&self) -> bool {
        self.name == LOCALHOST
    }

    /// `tls` directory under the product root.
    pub fn tls_dir(&self) -> PathBuf {
        self.root.join("tls")
    }

    pub fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.fs.read(path).map_err(|e| self.err(path, e))
    }

    /// Reads a file, returning `None` when it does not exist.
    pub fn read_optional(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match self.fs.read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.err(path, e)),
        }
    }

    /// Writes a file, creating its parent directories first.
    pub fn write(&self, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.mkdir_all(parent)?;
        }
        debug!(host = %self.name, path = %path.display(), "Writing file");
        self.fs.write(path, data, mode).map_err(|e| self.err(path, e))
    }

    /// Writes a file next to its destination then renames it into place.
    pub fn write_atomic(&self, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        let tmp = self.stage(path, data, mode)?;
        self.rename(&tmp, path)
    }

    /// Writes `data` to a hidden temporary file beside `path` and returns
    /// its name. Nothing at `path` changes until the file is renamed.
    pub fn stage(&self, path: &Path, data: &[u8], mode: u32) -> Result<PathBuf> {
        let file_name = path
            .file_name()
            .ok_or_else(|| {
                KeywardError::InvalidArgument(format!("no file name in {}", path.display()))
            })?;
        let mut tmp_name = std::ffi::OsString::from(".");
        tmp_name.push(file_name);
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);

        self.write(&tmp, data, mode)?;
        Ok(tmp)
    }

    pub fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.fs.rename(from, to).map_err(|e| self.err(to, e))
    }

    pub fn stat(&self, path: &Path) -> Result<FileStat> {
        self.fs.stat(path).map_err(|e| self.err(path, e))
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.fs.exists(path)
    }

    pub fn mkdir_all(&self, path: &Path) -> Result<()> {
        self.fs.mkdir_all(path).map_err(|e| self.err(path, e))
    }

    /// Lists a directory. A missing directory is an empty listing.
    pub fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        match self.fs.read_dir(path) {
            Ok(entries) => Ok(entries),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(self.err(path, e)),
        }
    }

    fn err(&self, path: &Path, source: io::Error) -> KeywardError {
        KeywardError::io(&self.name, path, source)
    }
}

/// The local host and every configured remote host.
#[derive(Debug)]
pub struct HostRegistry {
    local: Host,
    remotes: Vec<Host>,
}

impl HostRegistry {
    pub fn new(local: Host, remotes: Vec<Host>) -> Self {
        Self { local, remotes }
    }

    pub fn from_config(config: &KeywardConfig) -> Self {
        let remotes = config.hosts.iter().map(Host::from_config).collect();
        Self::new(Host::local(&config.paths.root), remotes)
    }

    pub fn local(&self) -> &Host {
        &self.local
    }

    pub fn remotes(&self) -> &[Host] {
        &self.remotes
    }

    /// Every host, local first, then remotes in configuration order.
    pub fn all(&self) -> impl Iterator<Item = &Host> {
        std::iter::once(&self.local).chain(self.remotes.iter())
    }

    pub fn get(&self, name: &str) -> Option<&Host> {
        self.all().find(|host| host.name() == name)
    }
}
