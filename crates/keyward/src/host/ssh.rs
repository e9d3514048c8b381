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

use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, Output, Stdio};

use tracing::debug;

use super::{DirEntry, FileStat, HostFs};

/// A remote host reached with the system `ssh` client.
///
/// Each operation runs one remote shell command. Authentication is left to
/// the operator's ssh configuration and agent; `BatchMode` stops ssh from
/// prompting.
#[derive(Debug, Clone)]
pub struct SshFs {
    target: String,
}

impl SshFs {
    /// `target` is anything `ssh` accepts as a destination, e.g. `user@host`.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn command(&self, remote: &str) -> Command {
        debug!(target_host = %self.target, command = %remote, "Running remote command");
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg(&self.target)
            .arg("--")
            .arg(remote);
        cmd
    }

    fn run(&self, remote: &str) -> io::Result<Output> {
        let output = self.command(remote).stdin(Stdio::null()).output()?;
        check(output)
    }
}

impl HostFs for SshFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        Ok(self.run(&format!("cat {}", quote(path)))?.stdout)
    }

    fn write(&self, path: &Path, data: &[u8], mode: u32) -> io::Result<()> {
        let quoted = quote(path);
        let remote = format!(
            "umask 077 && cat > {q} && chmod {mode:o} {q}",
            q = quoted,
            mode = mode
        );
        let mut child = self
            .command(&remote)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(data)?;
        }
        check(child.wait_with_output()?).map(|_| ())
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let output = self.run(&format!("stat -L -c '%F %s' {}", quote(path)))?;
        parse_stat(&String::from_utf8_lossy(&output.stdout))
    }

    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        self.run(&format!("mkdir -p -m 775 {}", quote(path))).map(|_| ())
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let output = self.run(&format!("ls -1Ap {}", quote(path)))?;
        Ok(parse_listing(&String::from_utf8_lossy(&output.stdout)))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.run(&format!("mv -f {} {}", quote(from), quote(to)))
            .map(|_| ())
    }
}

/// Single-quotes a path for the remote shell.
fn quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

fn check(output: Output) -> io::Result<Output> {
    if output.status.success() {
        return Ok(output);
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let kind = if stderr.contains("No such file or directory") {
        io::ErrorKind::NotFound
    } else {
        io::ErrorKind::Other
    };
    Err(io::Error::new(kind, stderr))
}

fn parse_stat(line: &str) -> io::Result<FileStat> {
    let line = line.trim();
    let (kind, size) = line
        .rsplit_once(' ')
        .ok_or_else(|| invalid_data(format!("bad stat output: {line:?}")))?;
    let len = size
        .parse()
        .map_err(|_| invalid_data(format!("bad stat size: {size:?}")))?;
    Ok(FileStat {
        is_dir: kind == "directory",
        len,
    })
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

fn parse_listing(listing: &str) -> Vec<DirEntry> {
    let mut entries: Vec<DirEntry> = listing
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| match line.strip_suffix('/') {
            Some(name) => DirEntry {
                name: name.to_string(),
                is_dir: true,
            },
            None => DirEntry {
                name: line.to_string(),
                is_dir: false,
            },
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}
