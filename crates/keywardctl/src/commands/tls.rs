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

//! Implementation of the `tls` commands.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _, Result};
use keyward::config::TlsConfig;
use keyward::distribute::{Distributor, HostOutcome, SyncStatus};
use keyward::tls::{
    self, CaManager, CaRole, CertificateIssuer, CertificateSummary, IssueOutcome, Provisioned,
};
use tracing::{info, warn};

use super::{report_failures, Context};

/// Permission bits for an exported bundle, which holds a private key.
const EXPORT_MODE: u32 = 0o600;

pub fn init(ctx: &Context) -> Result<()> {
    let report = tls::init(&ctx.hosts, &ctx.config.tls)
        .context("Failed to initialise certificate authority")?;

    report_ca("root", &report.root);
    report_ca("signing", &report.signing);
    report_sync(&report.chain)
}

pub fn new(ctx: &Context, targets: &[String]) -> Result<()> {
    let issuer = issuer(ctx, &ctx.config.tls)?;
    ctx.for_each_instance(targets, |host, instance| {
        let id = instance.id().clone();
        match issuer
            .ensure(host, instance)
            .context("Failed to issue certificate")?
        {
            IssueOutcome::Existing(summary) => {
                info!("{}: certificate still valid, expires {}", id, summary.not_after)
            }
            IssueOutcome::Issued(issued) => {
                info!("{}: issued certificate, serial {}", id, issued.summary.serial)
            }
        }
        Ok(())
    })
}

/// Reissues certificates for the selected instances.
///
/// `days` overrides the configured validity. With `new_key` every instance
/// gets a fresh private key, otherwise existing keys are kept.
pub fn renew(ctx: &Context, targets: &[String], days: Option<u32>, new_key: bool) -> Result<()> {
    let mut config = ctx.config.tls.clone();
    if let Some(days) = days {
        config.instance_days = days;
    }
    let issuer = issuer(ctx, &config)?;

    ctx.for_each_instance(targets, |host, instance| {
        let issued = if new_key {
            issuer.renew_with_new_key(host, instance)
        } else {
            issuer.renew(host, instance)
        }
        .context("Failed to renew certificate")?;
        info!(
            "{}: renewed certificate, serial {}, expires {}{}",
            instance.id(),
            issued.summary.serial,
            issued.summary.not_after,
            if issued.key_written { ", new private key" } else { "" }
        );
        Ok(())
    })
}

pub fn import(ctx: &Context, files: &[PathBuf]) -> Result<()> {
    let sources = files
        .iter()
        .map(|path| {
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let manager = CaManager::new(ctx.hosts.local(), &ctx.config.tls);
    let report = tls::import(&manager, &sources).context("Import failed")?;

    for pair in &report.imported {
        info!(
            "Installed {} CA {:?} as {}",
            pair.role,
            pair.summary.subject,
            pair.certificate_path.display()
        );
    }
    for skipped in &report.skipped {
        warn!("Skipped {} certificate {:?}: {:?}", skipped.role, skipped.subject, skipped.reason);
    }
    if report.imported.is_empty() {
        bail!("No certificate in the supplied files had a matching private key");
    }

    match manager.chain_pem() {
        Ok(chain) => {
            let outcomes =
                Distributor::new(&ctx.hosts).sync_chain(&chain, &ctx.config.tls.chain_file);
            report_sync(&outcomes)
        }
        Err(e) if e.is_prerequisite_missing() => {
            warn!("Chain not updated: {}", e);
            Ok(())
        }
        Err(e) => Err(e).context("Failed to build certificate chain"),
    }
}

pub fn list(ctx: &Context, targets: &[String]) -> Result<()> {
    let manager = CaManager::new(ctx.hosts.local(), &ctx.config.tls);
    for role in [CaRole::Root, CaRole::Signing] {
        let ca = match role {
            CaRole::Root => manager.root(),
            CaRole::Signing => manager.signing(),
        };
        match ca {
            Ok(ca) => print_summary(&format!("{} CA", role), &ca.summary()?),
            Err(e) if e.is_prerequisite_missing() => println!("{} CA: not initialised", role),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {} CA", role)),
        }
    }

    let (registry, selected) = ctx.select(targets)?;
    for id in selected {
        let host = ctx.host(&id.host)?;
        let Some(instance) = registry.get(&id) else {
            continue;
        };
        match host.read_optional(&instance.certificate_path())? {
            Some(pem) => {
                let cert = keyward::crypto::decode_first_certificate(&pem)
                    .with_context(|| format!("Invalid certificate for {}", id))?;
                print_summary(&id.to_string(), &CertificateSummary::from_certificate(&cert)?);
            }
            None => println!("{}: no certificate", id),
        }
    }
    Ok(())
}

/// Writes the signing CA, its key and the root CA to `output`, or to
/// stdout.
pub fn export(ctx: &Context, output: Option<&Path>) -> Result<()> {
    let manager = CaManager::new(ctx.hosts.local(), &ctx.config.tls);
    let bundle = tls::export(&manager).context("Failed to export certificate authority")?;
    match output {
        Some(path) => {
            ctx.hosts.local().write(path, &bundle, EXPORT_MODE)?;
            info!("Exported signing CA and key to {}", path.display());
        }
        None => print!("{}", String::from_utf8_lossy(&bundle)),
    }
    Ok(())
}

pub fn sync(ctx: &Context) -> Result<()> {
    let manager = CaManager::new(ctx.hosts.local(), &ctx.config.tls);
    let chain = manager.chain_pem().context("Failed to build certificate chain")?;
    report_sync(&Distributor::new(&ctx.hosts).sync_chain(&chain, &ctx.config.tls.chain_file))
}

fn issuer(ctx: &Context, config: &TlsConfig) -> Result<CertificateIssuer> {
    let manager = CaManager::new(ctx.hosts.local(), config);
    CertificateIssuer::new(&manager, config).context("Signing CA unavailable, run `tls init` first")
}

fn report_ca(label: &str, ca: &Provisioned<CertificateSummary>) {
    match ca {
        Provisioned::Created(summary) => info!("Created {} CA {:?}", label, summary.subject),
        Provisioned::Existing(summary) => {
            info!("{} CA {:?} already exists", label, summary.subject)
        }
    }
}

/// Logs each host's outcome and fails if any host failed.
pub(super) fn report_sync(outcomes: &[HostOutcome]) -> Result<()> {
    let mut failed = Vec::new();
    for outcome in outcomes {
        let path = outcome.path.display();
        match &outcome.result {
            Ok(SyncStatus::Written) => info!("{}: wrote {}", outcome.host, path),
            Ok(SyncStatus::Unchanged) => info!("{}: {} unchanged", outcome.host, path),
            Err(_) => failed.push(outcome.host.clone()),
        }
    }
    report_failures("host", &failed)
}

fn print_summary(label: &str, summary: &CertificateSummary) {
    println!(
        "{}: {:?} issuer {:?} serial {} expires {}{} sha256 {}",
        label,
        summary.subject,
        summary.issuer,
        summary.serial,
        summary.not_after,
        if summary.expired { " (EXPIRED)" } else { "" },
        summary.fingerprint
    );
}
