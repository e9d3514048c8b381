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

//! Implementation of the `aes` commands.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context as _, Result};
use keyward::audit;
use keyward::crypto::KeyValues;
use keyward::distribute::Distributor;
use keyward::instance::Component;
use keyward::keyfiles::{self, ExistingKeyfile, KeyfileEntry, KeyfileRegistry, RotateOutcome};
use keyward::secrets;
use tracing::{info, warn};

use super::tls::report_sync;
use super::Context;

/// Attempts allowed to enter matching passwords at the prompt.
const PASSWORD_TRIES: usize = 3;

/// Where the keyfile for an encode comes from.
pub enum KeySource {
    Keyfile(PathBuf),
    Crc(String),
    /// The user's default keyfile.
    Default,
}

impl KeySource {
    pub fn from_args(keyfile: Option<PathBuf>, crc: Option<String>) -> Self {
        match (keyfile, crc) {
            (Some(path), _) => KeySource::Keyfile(path),
            (None, Some(crc)) => KeySource::Crc(crc),
            (None, None) => KeySource::Default,
        }
    }
}

/// Where `aes new` writes the keyfile.
pub enum NewTarget {
    Stdout,
    File(PathBuf),
    /// The user's default keyfile.
    User,
}

pub fn new(
    ctx: &Context,
    target: NewTarget,
    existing: ExistingKeyfile,
    shared: bool,
) -> Result<()> {
    let kv = keyfiles::new_keyfile();
    let local = ctx.hosts.local();

    let path = match target {
        NewTarget::Stdout => None,
        NewTarget::File(path) => Some(path),
        NewTarget::User => Some(
            secrets::user_keyfile_path()
                .ok_or_else(|| anyhow!("No user configuration directory for the default keyfile"))?,
        ),
    };

    match &path {
        Some(path) => {
            if let Some(backup) = KeyfileRegistry::create(local, path, &kv, &existing)? {
                info!("Existing keyfile moved to {}", backup.display());
            }
            info!("Wrote keyfile {} with CRC {}", path.display(), kv.checksum_string());
        }
        None => {
            print!("{}", kv.render().as_str());
            audit::log_keyfile_created(&kv.checksum_string(), None);
        }
    }

    if shared {
        let components: Vec<Component> = Component::keyfile_components().collect();
        report_sync(&Distributor::new(&ctx.hosts).sync_keyfile(&components, &kv))?;
    }
    Ok(())
}

pub fn import(ctx: &Context, keyfile: &Path, component: Option<&str>) -> Result<()> {
    let kv = KeyfileRegistry::read(ctx.hosts.local(), keyfile)
        .with_context(|| format!("Failed to read keyfile {}", keyfile.display()))?;

    let components: Vec<Component> = match component {
        Some(name) => {
            let component: Component = name.parse()?;
            if !component.uses_keyfiles() {
                bail!("{} instances do not use keyfiles", component);
            }
            vec![component]
        }
        None => Component::keyfile_components().collect(),
    };

    info!("Importing keyfile with CRC {}", kv.checksum_string());
    report_sync(&Distributor::new(&ctx.hosts).sync_keyfile(&components, &kv))
}

pub fn set(
    ctx: &Context,
    keyfile: Option<&Path>,
    crc: Option<&str>,
    noroll: bool,
    targets: &[String],
) -> Result<()> {
    let kv = match (keyfile, crc) {
        (Some(path), _) => KeyfileRegistry::read(ctx.hosts.local(), path)
            .with_context(|| format!("Failed to read keyfile {}", path.display()))?,
        (None, Some(crc)) => locate(ctx, crc)?,
        (None, None) => {
            let kv = keyfiles::new_keyfile();
            audit::log_keyfile_created(&kv.checksum_string(), None);
            info!("Generated new keyfile with CRC {}", kv.checksum_string());
            kv
        }
    };
    apply(ctx, &kv, noroll, targets)
}

pub fn update(ctx: &Context, crc: &str, noroll: bool, targets: &[String]) -> Result<()> {
    let kv = locate(ctx, crc)?;
    apply(ctx, &kv, noroll, targets)
}

pub fn encode(
    ctx: &Context,
    source: KeySource,
    password: Option<String>,
    password_source: Option<&Path>,
    expandable: bool,
) -> Result<()> {
    let local = ctx.hosts.local();
    let (path, kv) = match source {
        KeySource::Keyfile(path) => {
            let kv = KeyfileRegistry::read(local, &path)
                .with_context(|| format!("Failed to read keyfile {}", path.display()))?;
            (path, kv)
        }
        KeySource::Crc(crc) => {
            let registry = KeyfileRegistry::new(&ctx.hosts);
            let (_, path, kv) = registry.locate(keyfiles::parse_crc(&crc)?)?;
            (path, kv)
        }
        KeySource::Default => secrets::default_keyfile_paths()
            .into_iter()
            .find_map(|path| KeyfileRegistry::read(local, &path).ok().map(|kv| (path, kv)))
            .ok_or_else(|| anyhow!("No default keyfile found; use --keyfile or --crc"))?,
    };

    let plaintext = match (password, password_source) {
        (Some(password), _) => password,
        (None, Some(source)) => read_source(source)?,
        (None, None) => confirm_password(
            |prompt| rpassword::prompt_password(prompt),
            PASSWORD_TRIES,
        )?,
    };

    let encoded = if expandable {
        secrets::encode_expandable(&plaintext, &kv, &path)?
    } else {
        secrets::encode(&plaintext, &kv)?
    };
    println!("{}", encoded);
    Ok(())
}

/// Keyfiles named on the `aes decode` command line.
pub struct DecodeKeyfiles<'a> {
    pub keyfile: Option<&'a Path>,
    pub previous: Option<&'a Path>,
}

pub fn decode(
    ctx: &Context,
    password: Option<String>,
    password_source: Option<&Path>,
    named: DecodeKeyfiles<'_>,
    targets: &[String],
) -> Result<()> {
    let value = match (password, password_source) {
        (Some(value), _) => value,
        (None, Some(source)) => read_source(source)?,
        (None, None) => bail!("Nothing to decode; use --password or --source"),
    };

    let (host, settings) = if targets.is_empty() {
        (ctx.hosts.local(), None)
    } else {
        let (registry, selected) = ctx.select(targets)?;
        let [id] = selected.as_slice() else {
            bail!("Decode needs exactly one instance, {} matched", selected.len());
        };
        let instance = registry
            .get(id)
            .ok_or_else(|| anyhow!("Instance {} not loaded", id))?;
        (ctx.host(&id.host)?, Some(instance.settings().clone()))
    };

    // User defaults only exist on the local host.
    let defaults = if host.is_local() {
        secrets::default_keyfile_paths()
    } else {
        Vec::new()
    };
    let explicit: Vec<PathBuf> = [named.keyfile, named.previous]
        .into_iter()
        .flatten()
        .map(Path::to_path_buf)
        .collect();
    let candidates = secrets::candidate_paths(&explicit, settings.as_ref(), &defaults);

    let plaintext = secrets::decode_with_keyfiles(host, &value, &candidates)?;
    println!("{}", plaintext);
    Ok(())
}

pub fn list(ctx: &Context, targets: &[String]) -> Result<()> {
    let registry = KeyfileRegistry::new(&ctx.hosts);
    for entry in registry.list_shared()? {
        print_entry("shared", &entry);
    }

    let (instances, selected) = ctx.select(targets)?;
    for id in selected.iter().filter(|id| id.component.uses_keyfiles()) {
        let Some(instance) = instances.get(id) else {
            continue;
        };
        for entry in KeyfileRegistry::instance_keyfiles(ctx.host(&id.host)?, instance) {
            print_entry(&id.to_string(), &entry);
        }
    }
    Ok(())
}

fn locate(ctx: &Context, crc: &str) -> Result<KeyValues> {
    let registry = KeyfileRegistry::new(&ctx.hosts);
    let (host, path, kv) = registry.locate(keyfiles::parse_crc(crc)?)?;
    info!("Using keyfile {} on {}", path.display(), host.name());
    Ok(kv)
}

/// Saves `kv` beside each selected instance and points the instance at it.
fn apply(ctx: &Context, kv: &KeyValues, noroll: bool, targets: &[String]) -> Result<()> {
    ctx.for_each_instance(targets, |host, instance| {
        let id = instance.id().clone();
        if !id.component.uses_keyfiles() {
            info!("{}: does not use keyfiles, skipping", id);
            return Ok(());
        }

        let saved = KeyfileRegistry::save_to_shared(host, id.component, kv)
            .context("Failed to save keyfile")?;
        match KeyfileRegistry::rotate(host, instance, saved.path(), noroll)
            .context("Failed to update keyfile")?
        {
            RotateOutcome::Unchanged => info!("{}: same CRC, not updating", id),
            RotateOutcome::Updated { keyfile, prevkeyfile } => info!(
                "{}: keyfile {}{}",
                id,
                keyfile.display(),
                prevkeyfile
                    .map(|p| format!(", prevkeyfile {}", p.display()))
                    .unwrap_or_default()
            ),
        }
        Ok(())
    })
}

/// Reads a secret from a file, or from stdin when `source` is `-`. One
/// trailing newline is removed.
fn read_source(source: &Path) -> Result<String> {
    let text = if source == Path::new("-") {
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read from stdin")?;
        line
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("Failed to read {}", source.display()))?
    };
    Ok(text.trim_end_matches(['\r', '\n']).to_string())
}

/// Prompts for a password twice until both entries match.
///
/// `prompt` shows its argument and reads one line without echo. Gives up
/// after `tries` mismatches. An empty password is refused.
fn confirm_password<F>(mut prompt: F, tries: usize) -> Result<String>
where
    F: FnMut(&str) -> io::Result<String>,
{
    for _ in 0..tries {
        let first = prompt("Password: ").context("Failed to read password")?;
        let second = prompt("Re-enter password: ").context("Failed to read password")?;
        if first != second {
            warn!("Passwords do not match, try again");
            continue;
        }
        if first.is_empty() {
            bail!("Empty password");
        }
        return Ok(first);
    }
    bail!("Passwords did not match after {} attempts", tries)
}

fn print_entry(label: &str, entry: &KeyfileEntry) {
    println!(
        "{} {} {} {}{}",
        label,
        entry.host,
        entry.crc.as_deref().unwrap_or("-"),
        entry.path.display(),
        if entry.previous { " (previous)" } else { "" }
    );
}
