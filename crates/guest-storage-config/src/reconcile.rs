// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The entry point tying both syntaxes to the canonical configuration.

use std::fmt::Display;
use std::str::FromStr;

use guest_storage_types::StorageConfiguration;
use slog::{o, Logger};
use thiserror::Error;

use crate::diagnostics::Diagnostics;
use crate::expanded::{self, ExpandedDisks};
use crate::list;
use crate::StorageInput;

/// The syntax a document is written in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Surface {
    /// The flat `disk` list.
    List,
    /// The per-slot `disks` map.
    Expanded,
}

#[derive(Debug, Error)]
#[error("unknown surface {0:?}, expected \"list\" or \"expanded\"")]
pub struct UnknownSurface(String);

impl FromStr for Surface {
    type Err = UnknownSurface;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "list" => Ok(Surface::List),
            "expanded" => Ok(Surface::Expanded),
            _ => Err(UnknownSurface(s.to_owned())),
        }
    }
}

impl Display for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Surface::List => "list",
            Surface::Expanded => "expanded",
        })
    }
}

/// The result of decoding a document.
#[derive(Debug)]
pub struct Decoded {
    pub surface: Surface,
    pub config: StorageConfiguration,
    pub diagnostics: Diagnostics,
}

/// The result of encoding a configuration.
#[derive(Debug)]
pub struct Encoded {
    pub output: StorageInput,

    /// True if the configuration holds a cloud-init disk, which the caller
    /// must generate contents for.
    pub cloud_init_present: bool,
}

pub struct Reconciler {
    log: Logger,
}

impl Reconciler {
    pub fn new(log: Logger) -> Self {
        Self { log }
    }

    /// The `disk` list is used if it has any entries; otherwise the `disks`
    /// map is, even if it is absent.
    pub fn select_surface(input: &StorageInput) -> Surface {
        if input.disk.is_empty() {
            Surface::Expanded
        } else {
            Surface::List
        }
    }

    /// Builds a configuration covering every slot from `input`.
    ///
    /// The configuration is rebuilt from nothing on every call; slots the
    /// document does not mention hold `Delete`. Callers must not apply the
    /// result if the returned diagnostics contain any error.
    pub fn decode(&self, input: &StorageInput) -> Decoded {
        let surface = Self::select_surface(input);
        let log = self.log.new(o!("surface" => surface.to_string()));

        let (config, diagnostics) = match surface {
            Surface::List => list::decode(&input.disk, &log),
            Surface::Expanded => match &input.disks {
                Some(disks) => expanded::decode(disks, &log),
                None => expanded::decode(&ExpandedDisks::default(), &log),
            },
        };

        diagnostics.log(&log);
        slog::info!(log, "decoded storage configuration";
            "devices" => config.devices().count(),
            "errors" => diagnostics.errors().count(),
            "warnings" => diagnostics.warnings().count());

        Decoded { surface, config, diagnostics }
    }

    /// Renders `config` in the syntax `surface` names.
    pub fn encode(
        &self,
        surface: Surface,
        config: &StorageConfiguration,
    ) -> Encoded {
        let output = match surface {
            Surface::List => {
                StorageInput { disk: list::encode(config), disks: None }
            }
            Surface::Expanded => StorageInput {
                disk: Vec::new(),
                disks: Some(expanded::encode(config)),
            },
        };
        let cloud_init_present = config.has_cloud_init();

        slog::debug!(self.log, "encoded storage configuration";
            "surface" => %surface,
            "cloud_init" => cloud_init_present);

        Encoded { output, cloud_init_present }
    }
}
