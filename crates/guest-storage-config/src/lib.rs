// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! User-facing storage configuration documents and the engine that turns
//! them into a [`StorageConfiguration`].
//!
//! A document uses exactly one of two syntaxes: the flat `disk` list
//! ([`list`]) or the expanded per-slot `disks` map ([`expanded`]). The
//! [`Reconciler`] picks the one in use, builds a configuration covering
//! every slot, and reports what it found along the way as [`Diagnostics`].
//!
//! [`StorageConfiguration`]: guest_storage_types::StorageConfiguration

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod builder;
pub mod diagnostics;
pub mod expanded;
pub mod fields;
pub mod list;
pub mod reconcile;
pub mod validate;

pub use builder::StorageBuilder;
pub use diagnostics::{
    Diagnostic, DiagnosticKind, Diagnostics, DiskError, DiskWarning,
    ErrorClass,
};
pub use expanded::ExpandedDisks;
pub use list::DiskEntry;
pub use reconcile::{Decoded, Encoded, Reconciler, Surface, UnknownSurface};

/// A storage configuration document.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct StorageInput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disk: Vec<DiskEntry>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disks: Option<ExpandedDisks>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Cannot parse toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("disk and disks cannot both be given")]
    ConflictingRoots,
}

/// Parses a document from TOML text.
pub fn parse_str(contents: &str) -> Result<StorageInput, ParseError> {
    let input = toml::from_str::<StorageInput>(contents)?;
    if !input.disk.is_empty() && input.disks.is_some() {
        return Err(ParseError::ConflictingRoots);
    }
    Ok(input)
}

/// Parses a document from a TOML file.
pub fn parse<P: AsRef<Path>>(path: P) -> Result<StorageInput, ParseError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_str(&contents)
}
