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

//! Keyward CLI - certificate and keyfile management for product instances.

use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgGroup, Parser, Subcommand};
use keyward::keyfiles::ExistingKeyfile;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

/// Keyward - certificate authority and keyfile management
#[derive(Parser)]
#[command(name = "keywardctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (can also be set via KEYWARD_CONFIG environment variable)
    #[arg(long, env = "KEYWARD_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Product root directory, overriding the configuration file
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Certificate authority and instance certificate commands
    Tls {
        #[command(subcommand)]
        command: TlsCommands,
    },
    /// Keyfile and secret encoding commands
    Aes {
        #[command(subcommand)]
        command: AesCommands,
    },
}

#[derive(Subcommand)]
enum TlsCommands {
    /// Create the root and signing CAs and copy the chain to every host
    Init,

    /// Issue certificates for instances that do not have a valid one
    New {
        /// Optional instance type followed by instance names (name or name@host)
        targets: Vec<String>,
    },

    /// Reissue certificates, keeping each instance's existing private key
    Renew {
        /// Certificate validity in days, overriding the configuration
        #[arg(short = 'D', long, value_parser = clap::value_parser!(u32).range(1..))]
        days: Option<u32>,

        /// Generate a new private key instead of reusing the existing one
        #[arg(short = 'n', long)]
        new_key: bool,

        /// Optional instance type followed by instance names (name or name@host)
        targets: Vec<String>,
    },

    /// Install root and signing CA certificates and keys from PEM files
    Import {
        /// PEM files holding certificates and RSA private keys
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show CA and instance certificates
    Ls {
        /// Optional instance type followed by instance names (name or name@host)
        targets: Vec<String>,
    },

    /// Write the signing CA certificate and key and the root CA certificate
    Export {
        /// Output file, written with mode 0600. Defaults to stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Copy the certificate chain to every host
    Sync,
}

#[derive(Subcommand)]
enum AesCommands {
    /// Generate a new keyfile
    New {
        /// Write the keyfile here instead of printing it
        #[arg(short, long, conflicts_with = "user")]
        keyfile: Option<PathBuf>,

        /// Write the user's default keyfile
        #[arg(long)]
        user: bool,

        /// Overwrite an existing keyfile
        #[arg(short = 'F', long, conflicts_with = "backup")]
        force: bool,

        /// Move an existing keyfile aside, adding this suffix before the extension
        #[arg(short, long, num_args = 0..=1, default_missing_value = "-prev")]
        backup: Option<String>,

        /// Also save the keyfile to the shared keyfile directories on every host
        #[arg(short = 'S', long)]
        shared: bool,
    },

    /// Save an existing keyfile to the shared keyfile directories on every host
    Import {
        /// Keyfile to import
        #[arg(short, long)]
        keyfile: PathBuf,

        /// Only import for this instance type
        component: Option<String>,
    },

    /// Set the keyfile for instances, rolling the current one to prevkeyfile
    Set {
        /// Keyfile to use. A new one is generated when neither this nor --crc is given
        #[arg(short, long, conflicts_with = "crc")]
        keyfile: Option<PathBuf>,

        /// Checksum of a shared keyfile to use
        #[arg(short, long)]
        crc: Option<String>,

        /// Replace the current keyfile without moving it to prevkeyfile
        #[arg(short = 'N', long)]
        noroll: bool,

        /// Optional instance type followed by instance names (name or name@host)
        targets: Vec<String>,
    },

    /// Switch instances to a shared keyfile identified by checksum
    Update {
        /// Checksum of the shared keyfile
        #[arg(short, long)]
        crc: String,

        /// Replace the current keyfile without moving it to prevkeyfile
        #[arg(short = 'N', long)]
        noroll: bool,

        /// Optional instance type followed by instance names (name or name@host)
        targets: Vec<String>,
    },

    /// Encode a password
    Encode {
        /// Keyfile to encode with
        #[arg(short, long, conflicts_with = "crc")]
        keyfile: Option<PathBuf>,

        /// Checksum of a shared keyfile to encode with
        #[arg(short, long)]
        crc: Option<String>,

        /// Password to encode. Prompted for when neither this nor --source is given
        #[arg(short, long, conflicts_with = "source")]
        password: Option<String>,

        /// Read the password from this file, or from stdin when '-'
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Output the ${enc:keyfile:+encs+...} form
        #[arg(short = 'e', long)]
        expandable: bool,
    },

    /// Decode an encoded password
    #[command(group(ArgGroup::new("input").required(true).args(["password", "source"])))]
    Decode {
        /// The encoded value, with or without the +encs+ prefix, or in ${enc:...} form
        #[arg(short, long)]
        password: Option<String>,

        /// Read the encoded value from this file, or from stdin when '-'
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Keyfile to try first
        #[arg(short, long)]
        keyfile: Option<PathBuf>,

        /// Keyfile to try after --keyfile
        #[arg(long)]
        previous: Option<PathBuf>,

        /// Optional instance type followed by an instance name whose keyfiles to try
        targets: Vec<String>,
    },

    /// List shared keyfiles and the keyfiles instances use
    Ls {
        /// Optional instance type followed by instance names (name or name@host)
        targets: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let ctx = commands::Context::load(cli.config.as_deref(), cli.root)?;

    match cli.command {
        Commands::Tls { command } => match command {
            TlsCommands::Init => commands::tls::init(&ctx),
            TlsCommands::New { targets } => commands::tls::new(&ctx, &targets),
            TlsCommands::Renew {
                days,
                new_key,
                targets,
            } => commands::tls::renew(&ctx, &targets, days, new_key),
            TlsCommands::Import { files } => commands::tls::import(&ctx, &files),
            TlsCommands::Ls { targets } => commands::tls::list(&ctx, &targets),
            TlsCommands::Export { output } => commands::tls::export(&ctx, output.as_deref()),
            TlsCommands::Sync => commands::tls::sync(&ctx),
        },
        Commands::Aes { command } => match command {
            AesCommands::New {
                keyfile,
                user,
                force,
                backup,
                shared,
            } => {
                let target = match (keyfile, user) {
                    (Some(path), _) => commands::aes::NewTarget::File(path),
                    (None, true) => commands::aes::NewTarget::User,
                    (None, false) => commands::aes::NewTarget::Stdout,
                };
                let existing = match (force, backup) {
                    (true, _) => ExistingKeyfile::Overwrite,
                    (false, Some(suffix)) => ExistingKeyfile::Backup(suffix),
                    (false, None) => ExistingKeyfile::Refuse,
                };
                commands::aes::new(&ctx, target, existing, shared)
            }
            AesCommands::Import { keyfile, component } => {
                commands::aes::import(&ctx, &keyfile, component.as_deref())
            }
            AesCommands::Set {
                keyfile,
                crc,
                noroll,
                targets,
            } => commands::aes::set(&ctx, keyfile.as_deref(), crc.as_deref(), noroll, &targets),
            AesCommands::Update {
                crc,
                noroll,
                targets,
            } => commands::aes::update(&ctx, &crc, noroll, &targets),
            AesCommands::Encode {
                keyfile,
                crc,
                password,
                source,
                expandable,
            } => commands::aes::encode(
                &ctx,
                commands::aes::KeySource::from_args(keyfile, crc),
                password,
                source.as_deref(),
                expandable,
            ),
            AesCommands::Decode {
                password,
                source,
                keyfile,
                previous,
                targets,
            } => commands::aes::decode(
                &ctx,
                password,
                source.as_deref(),
                commands::aes::DecodeKeyfiles {
                    keyfile: keyfile.as_deref(),
                    previous: previous.as_deref(),
                },
                &targets,
            ),
            AesCommands::Ls { targets } => commands::aes::list(&ctx, &targets),
        },
    }
}
