// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The flat `disk` list syntax.
//!
//! Each entry names its own slot and device type:
//!
//! ```toml
//! [[disk]]
//! slot = "scsi0"
//! type = "disk"
//! storage = "local-lvm"
//! size = "32G"
//! ```
//!
//! Slots that no entry mentions are deleted. When rendering, entries are
//! emitted in address-space order, one per slot that holds a device.

use std::collections::BTreeMap;

use guest_storage_types::{
    classify, CdRomMedia, DiskVariant, StorageConfiguration,
};
use serde::{Deserialize, Serialize};
use slog::Logger;

use crate::builder::{DeviceKind, DeviceRequest, StorageBuilder};
use crate::diagnostics::{DiskError, DiskWarning, Diagnostics};
use crate::fields::{is_false, DiskFields, SharedOptions};

/// One entry of the `disk` list.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct DiskEntry {
    pub slot: String,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub passthrough: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub storage: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub size: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iso: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub disk_file: String,

    #[serde(flatten)]
    pub options: SharedOptions,

    /// Keys this syntax does not define.
    #[serde(flatten, default)]
    pub unknown: BTreeMap<String, toml::Value>,
}

impl DiskEntry {
    fn fields(&self) -> DiskFields {
        DiskFields {
            storage: self.storage.clone(),
            size: self.size.clone(),
            format: self.format.clone(),
            iso: self.iso.clone(),
            disk_file: self.disk_file.clone(),
            options: self.options.clone(),
        }
    }
}

/// Decodes a `disk` list into a full configuration.
///
/// Entries are processed in order. An entry whose slot or type cannot be
/// parsed is dropped with a diagnostic; every other problem is reported and
/// processing continues with the next entry.
pub fn decode(
    entries: &[DiskEntry],
    log: &Logger,
) -> (StorageConfiguration, Diagnostics) {
    let mut builder = StorageBuilder::new();

    for (position, entry) in entries.iter().enumerate() {
        let slot = match classify(&entry.slot) {
            Ok(slot) => slot,
            Err(source) => {
                builder.report_error(
                    format!("disk[{position}]"),
                    DiskError::UnknownSlot { name: entry.slot.clone(), source },
                );
                continue;
            }
        };

        for key in entry.unknown.keys() {
            builder
                .report_warning(slot, DiskWarning::UnknownField(key.clone()));
        }

        let kind = match entry.kind.parse::<DeviceKind>() {
            Ok(kind) => kind,
            Err(e) => {
                builder.reject(slot, e);
                continue;
            }
        };

        let accepted = builder.add_device(&DeviceRequest {
            slot,
            kind,
            passthrough: entry.passthrough,
            fields: &entry.fields(),
        });
        slog::debug!(log, "decoded list entry";
            "slot" => %slot,
            "type" => %kind,
            "accepted" => accepted);
    }

    builder.finish()
}

/// Renders the entry for one slot, or `None` if the slot holds no device.
fn entry_for(slot: String, variant: &DiskVariant) -> Option<DiskEntry> {
    let (kind, passthrough, fields) = match variant {
        DiskVariant::Disk(disk) => {
            (DeviceKind::Disk, false, DiskFields::from(disk))
        }
        DiskVariant::Passthrough(disk) => {
            (DeviceKind::Disk, true, DiskFields::from(disk))
        }
        DiskVariant::CdRom(cdrom) => (
            DeviceKind::CdRom,
            cdrom.media == CdRomMedia::Passthrough,
            DiskFields::from(&cdrom.media),
        ),
        DiskVariant::CloudInit(ci) => (
            DeviceKind::CloudInit,
            false,
            DiskFields { storage: ci.storage.clone(), ..Default::default() },
        ),
        DiskVariant::Delete | DiskVariant::Unchanged => return None,
    };

    let DiskFields { storage, size, format, iso, disk_file, options } = fields;
    Some(DiskEntry {
        slot,
        kind: kind.to_string(),
        passthrough,
        storage,
        size,
        format,
        iso,
        disk_file,
        options,
        unknown: BTreeMap::new(),
    })
}

/// Encodes a configuration as a `disk` list in address-space order.
///
/// `Unchanged` cannot be expressed in this syntax and is omitted like
/// `Delete`.
pub fn encode(config: &StorageConfiguration) -> Vec<DiskEntry> {
    config
        .iter()
        .filter_map(|(slot, variant)| entry_for(slot.to_string(), variant))
        .collect()
}
