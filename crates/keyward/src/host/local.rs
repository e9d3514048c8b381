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

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use super::{DirEntry, FileStat, HostFs};

/// Directory permission bits for created directories.
const DIR_MODE: u32 = 0o775;

/// The local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl HostFs for LocalFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        let mut file = options.open(path)?;
        file.write_all(data)?;
        file.sync_all()?;

        // OpenOptions::mode only applies to newly created files.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        }
        #[cfg(not(unix))]
        let _ = mode;
        Ok(())
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = fs::metadata(path)?;
        Ok(FileStat {
            is_dir: meta.is_dir(),
            len: meta.len(),
        })
    }

    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(DIR_MODE);
        }
        builder.create(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }
}

/// A remote host whose filesystem is mounted locally.
///
/// Absolute paths on the remote host are resolved beneath the mount point.
#[derive(Debug, Clone)]
pub struct MountFs {
    mount: PathBuf,
}

impl MountFs {
    pub fn new(mount: impl Into<PathBuf>) -> Self {
        Self {
            mount: mount.into(),
        }
    }

    fn resolve(&self, path: &Path) -> io::Result<PathBuf> {
        let mut resolved = self.mount.clone();
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::Normal(part) => resolved.push(part),
                Component::ParentDir => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("path escapes mount point: {}", path.display()),
                    ))
                }
            }
        }
        Ok(resolved)
    }
}

impl HostFs for MountFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        LocalFs.read(&self.resolve(path)?)
    }

    fn write(&self, path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
        LocalFs.write(&self.resolve(path)?, data, mode)
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        LocalFs.stat(&self.resolve(path)?)
    }

    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        LocalFs.mkdir_all(&self.resolve(path)?)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        LocalFs.read_dir(&self.resolve(path)?)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        LocalFs.rename(&self.resolve(from)?, &self.resolve(to)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_write_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");
        LocalFs.write(&path, b"x", 0o644).unwrap();
        LocalFs.write(&path, b"y", 0o600).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_mount_resolves_under_mount_point() {
        let dir = tempfile::tempdir().unwrap();
        let mount = MountFs::new(dir.path());

        mount.mkdir_all(Path::new("/opt/geneos/tls")).unwrap();
        mount
            .write(Path::new("/opt/geneos/tls/chain.pem"), b"chain", 0o644)
            .unwrap();

        assert!(dir.path().join("opt/geneos/tls/chain.pem").is_file());
        assert_eq!(
            mount.read(Path::new("/opt/geneos/tls/chain.pem")).unwrap(),
            b"chain"
        );
    }

    #[test]
    fn test_mount_rejects_parent_components() {
        let dir = tempfile::tempdir().unwrap();
        let mount = MountFs::new(dir.path());
        let err = mount.read(Path::new("/opt/../../etc/passwd")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
