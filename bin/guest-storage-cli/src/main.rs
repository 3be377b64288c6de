// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use guest_storage_config::{Reconciler, Surface};
use guest_storage_types::StorageConfiguration;
use slog::{o, Drain, Level, Logger};

#[derive(Debug, Parser)]
#[clap(about, version)]
/// Decode and render guest storage configuration
struct Opt {
    /// Enable debugging
    #[clap(short, long, action)]
    debug: bool,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Decode a TOML storage document and print the resulting configuration
    /// as JSON
    Decode {
        /// Path to the TOML document
        #[clap(action)]
        file: PathBuf,
    },

    /// Render a JSON storage configuration as a TOML document
    Encode {
        /// Path to the JSON configuration
        #[clap(action)]
        file: PathBuf,

        /// Syntax to render: "list" or "expanded"
        #[clap(long, short, default_value = "list")]
        surface: Surface,
    },

    /// Print the JSON schema of a storage configuration
    Schema,
}

fn parse_json_file<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> anyhow::Result<T> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| e.into())
}

fn create_logger(opt: &Opt) -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let level = if opt.debug { Level::Debug } else { Level::Info };
    let drain = slog::LevelFilter(drain, level).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    Logger::root(drain, o!())
}

fn decode(reconciler: &Reconciler, path: &Path) -> anyhow::Result<()> {
    let input = guest_storage_config::parse(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let decoded = reconciler.decode(&input);
    if decoded.diagnostics.has_errors() {
        bail!(
            "{} contains {} invalid slot(s)",
            path.display(),
            decoded.diagnostics.errors().count()
        );
    }

    println!("{}", serde_json::to_string_pretty(&decoded.config)?);
    Ok(())
}

fn encode(
    reconciler: &Reconciler,
    log: &Logger,
    path: &Path,
    surface: Surface,
) -> anyhow::Result<()> {
    let config: StorageConfiguration = parse_json_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let encoded = reconciler.encode(surface, &config);
    if encoded.cloud_init_present {
        slog::info!(log, "configuration includes a cloud-init disk");
    }

    print!("{}", toml::to_string(&encoded.output)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();
    let log = create_logger(&opt);
    let reconciler = Reconciler::new(log.new(o!()));

    match opt.cmd {
        Command::Decode { file } => decode(&reconciler, &file)?,
        Command::Encode { file, surface } => {
            encode(&reconciler, &log, &file, surface)?
        }
        Command::Schema => {
            let schema = schemars::schema_for!(StorageConfiguration);
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
    }
    Ok(())
}
