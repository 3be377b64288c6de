// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The raw, surface-independent field bag for one slot.
//!
//! Both surface syntaxes lower their per-slot input into a [`DiskFields`]
//! before handing it to the [`crate::builder`], and both build their output
//! from one. Fields hold the user's raw text; validation happens in the
//! builder. An empty string, `false`, or zero means "not supplied".

use guest_storage_types::bandwidth::is_zero;
use guest_storage_types::{
    size, CdRomMedia, DiskOptions, FlatBandwidth, NormalDisk, PassthroughDisk,
};
use serde::{Deserialize, Serialize};

pub(crate) fn is_false(v: &bool) -> bool {
    !*v
}

/// Settings shared by managed and passthrough disks, under their
/// user-facing keys.
///
/// This struct is flattened into several surface types next to a catch-all
/// map of unknown keys, so it must not contain flattened fields itself: the
/// throttle keys of [`FlatBandwidth`] are repeated inline. They are read
/// wider than the canonical limits so that an out-of-range value becomes a
/// diagnostic for its slot instead of a document parse error.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SharedOptions {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cache: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub asyncio: String,

    #[serde(skip_serializing_if = "is_false")]
    pub discard: bool,

    #[serde(skip_serializing_if = "is_false")]
    pub replicate: bool,

    /// Defaults to true when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<bool>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub serial: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub wwn: String,

    #[serde(skip_serializing_if = "is_false")]
    pub emulatessd: bool,

    #[serde(skip_serializing_if = "is_false")]
    pub iothread: bool,

    #[serde(skip_serializing_if = "is_false")]
    pub readonly: bool,

    #[serde(skip_serializing_if = "is_zero")]
    pub mbps_r_burst: f64,
    #[serde(skip_serializing_if = "is_zero")]
    pub mbps_r_concurrent: f64,
    #[serde(skip_serializing_if = "is_zero")]
    pub mbps_wr_burst: f64,
    #[serde(skip_serializing_if = "is_zero")]
    pub mbps_wr_concurrent: f64,
    #[serde(skip_serializing_if = "is_zero")]
    pub iops_r_burst: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub iops_r_burst_length: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub iops_r_concurrent: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub iops_wr_burst: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub iops_wr_burst_length: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub iops_wr_concurrent: i64,
}

impl SharedOptions {
    /// The throughput keys and their values.
    pub fn mbps_fields(&self) -> [(&'static str, f64); 4] {
        [
            ("mbps_r_burst", self.mbps_r_burst),
            ("mbps_r_concurrent", self.mbps_r_concurrent),
            ("mbps_wr_burst", self.mbps_wr_burst),
            ("mbps_wr_concurrent", self.mbps_wr_concurrent),
        ]
    }

    /// The operation-rate keys and their values.
    pub fn iops_fields(&self) -> [(&'static str, i64); 6] {
        [
            ("iops_r_burst", self.iops_r_burst),
            ("iops_r_burst_length", self.iops_r_burst_length),
            ("iops_r_concurrent", self.iops_r_concurrent),
            ("iops_wr_burst", self.iops_wr_burst),
            ("iops_wr_burst_length", self.iops_wr_burst_length),
            ("iops_wr_concurrent", self.iops_wr_concurrent),
        ]
    }

    pub fn set_bandwidth(&mut self, flat: FlatBandwidth) {
        self.mbps_r_burst = flat.mbps_r_burst;
        self.mbps_r_concurrent = flat.mbps_r_concurrent;
        self.mbps_wr_burst = flat.mbps_wr_burst;
        self.mbps_wr_concurrent = flat.mbps_wr_concurrent;
        self.iops_r_burst = flat.iops_r_burst.into();
        self.iops_r_burst_length = flat.iops_r_burst_length.into();
        self.iops_r_concurrent = flat.iops_r_concurrent.into();
        self.iops_wr_burst = flat.iops_wr_burst.into();
        self.iops_wr_burst_length = flat.iops_wr_burst_length.into();
        self.iops_wr_concurrent = flat.iops_wr_concurrent.into();
    }

    /// Keys of every field the user supplied.
    pub fn populated(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        let strings = [
            ("cache", &self.cache),
            ("asyncio", &self.asyncio),
            ("serial", &self.serial),
            ("wwn", &self.wwn),
        ];
        keys.extend(
            strings.iter().filter(|(_, v)| !v.is_empty()).map(|(k, _)| *k),
        );

        let flags = [
            ("discard", self.discard),
            ("replicate", self.replicate),
            ("backup", self.backup.is_some()),
            ("emulatessd", self.emulatessd),
            ("iothread", self.iothread),
            ("readonly", self.readonly),
        ];
        keys.extend(flags.iter().filter(|(_, v)| *v).map(|(k, _)| *k));

        keys.extend(
            self.mbps_fields()
                .iter()
                .filter(|(_, v)| *v != 0.0)
                .map(|(k, _)| *k),
        );
        keys.extend(
            self.iops_fields().iter().filter(|(_, v)| *v != 0).map(|(k, _)| *k),
        );
        keys
    }
}

impl From<&DiskOptions> for SharedOptions {
    fn from(options: &DiskOptions) -> Self {
        let mut shared = Self {
            cache: options.cache.map(|c| c.to_string()).unwrap_or_default(),
            asyncio: options
                .async_io
                .map(|a| a.to_string())
                .unwrap_or_default(),
            discard: options.discard,
            replicate: options.replicate,
            backup: (!options.backup).then_some(false),
            serial: options.serial.clone().unwrap_or_default(),
            wwn: options.wwn.clone().unwrap_or_default(),
            emulatessd: options.emulate_ssd,
            iothread: options.io_thread,
            readonly: options.read_only,
            ..Default::default()
        };
        shared.set_bandwidth(FlatBandwidth::from(&options.bandwidth));
        shared
    }
}

/// Every field a slot can carry, regardless of which device it describes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DiskFields {
    pub storage: String,
    pub size: String,
    pub format: String,

    /// CD-ROM image reference, `<storage>:<path>`.
    pub iso: String,

    /// Host path for passthrough disks.
    pub disk_file: String,

    pub options: SharedOptions,
}

impl DiskFields {
    /// Keys of the top-level (non-shared) fields the user supplied.
    pub fn populated(&self) -> Vec<&'static str> {
        [
            ("storage", &self.storage),
            ("size", &self.size),
            ("format", &self.format),
            ("iso", &self.iso),
            ("disk_file", &self.disk_file),
        ]
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, _)| *k)
        .collect()
    }
}

impl From<&NormalDisk> for DiskFields {
    fn from(disk: &NormalDisk) -> Self {
        Self {
            storage: disk.storage.clone(),
            size: size::format(disk.size.kib()),
            format: disk.format.to_string(),
            options: SharedOptions::from(&disk.options),
            ..Default::default()
        }
    }
}

impl From<&PassthroughDisk> for DiskFields {
    fn from(disk: &PassthroughDisk) -> Self {
        Self {
            disk_file: disk.file.clone(),
            options: SharedOptions::from(&disk.options),
            ..Default::default()
        }
    }
}

impl From<&CdRomMedia> for DiskFields {
    fn from(media: &CdRomMedia) -> Self {
        match media {
            CdRomMedia::Iso { storage, file } => {
                Self { iso: format!("{storage}:{file}"), ..Default::default() }
            }
            CdRomMedia::None | CdRomMedia::Passthrough => Self::default(),
        }
    }
}
