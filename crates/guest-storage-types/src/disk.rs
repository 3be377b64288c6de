// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The devices that can occupy a storage slot.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::bandwidth::BandwidthLimits;
use crate::size::DiskSize;

/// On-disk image format of a managed disk.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Debug,
    Default,
    Deserialize,
    Serialize,
    JsonSchema,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DiskFormat {
    #[default]
    Raw,
    Cow,
    Qcow,
    Qed,
    Qcow2,
    Vmdk,
    Cloop,
}

/// Host page-cache mode for a disk.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Debug,
    Deserialize,
    Serialize,
    JsonSchema,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CacheMode {
    None,
    DirectSync,
    Unsafe,
    WriteBack,
    WriteThrough,
}

/// Asynchronous I/O engine used by the host for a disk.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Debug,
    Deserialize,
    Serialize,
    JsonSchema,
    strum::EnumString,
    strum::IntoStaticStr,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AsyncIo {
    Native,
    Threads,
    IoUring,
}

/// Settings shared by managed and passthrough disks.
///
/// `emulate_ssd`, `io_thread` and `read_only` are only ever true when the
/// slot's bus supports them (see [`crate::BusCapabilities`]).
///
/// Absent fields take their [`Default`] values when deserializing.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct DiskOptions {
    pub cache: Option<CacheMode>,
    pub async_io: Option<AsyncIo>,
    pub discard: bool,
    pub replicate: bool,

    /// Include this disk in backups.
    pub backup: bool,

    pub serial: Option<String>,

    /// World wide name, `0x` followed by 16 hex digits.
    pub wwn: Option<String>,

    pub emulate_ssd: bool,
    pub io_thread: bool,
    pub read_only: bool,
    pub bandwidth: BandwidthLimits,
}

impl Default for DiskOptions {
    fn default() -> Self {
        Self {
            cache: None,
            async_io: None,
            discard: false,
            replicate: false,
            backup: true,
            serial: None,
            wwn: None,
            emulate_ssd: false,
            io_thread: false,
            read_only: false,
            bandwidth: BandwidthLimits::default(),
        }
    }
}

/// A disk whose backing volume is allocated from a storage pool.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize, JsonSchema)]
pub struct NormalDisk {
    /// Name of the storage pool the volume lives in.
    pub storage: String,
    pub size: DiskSize,
    #[serde(default)]
    pub format: DiskFormat,
    #[serde(flatten)]
    pub options: DiskOptions,
}

/// A host file or block device handed directly to the guest.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize, JsonSchema)]
pub struct PassthroughDisk {
    /// Path of the file or device on the host.
    pub file: String,
    #[serde(flatten)]
    pub options: DiskOptions,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CdRomMedia {
    /// An empty drive.
    None,

    /// An ISO image stored on a storage pool, e.g. `local:iso/ubuntu.iso`.
    Iso { storage: String, file: String },

    /// The host's physical optical drive.
    Passthrough,
}

#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize, JsonSchema)]
pub struct CdRom {
    pub media: CdRomMedia,
}

/// A drive carrying generated cloud-init data.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize, JsonSchema)]
pub struct CloudInitDisk {
    pub storage: String,
}

/// The contents of one storage slot.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiskVariant {
    Disk(NormalDisk),
    Passthrough(PassthroughDisk),
    #[serde(rename = "cdrom")]
    CdRom(CdRom),
    #[serde(rename = "cloudinit")]
    CloudInit(CloudInitDisk),

    /// Remove whatever device is attached at this slot.
    Delete,

    /// Leave this slot's current state alone.
    Unchanged,
}

impl DiskVariant {
    /// True for the two markers that carry no device.
    pub fn is_empty(&self) -> bool {
        matches!(self, DiskVariant::Delete | DiskVariant::Unchanged)
    }

    /// A short human-readable name for the variant.
    pub fn name(&self) -> &'static str {
        match self {
            DiskVariant::Disk(_) => "disk",
            DiskVariant::Passthrough(_) => "passthrough disk",
            DiskVariant::CdRom(_) => "cdrom",
            DiskVariant::CloudInit(_) => "cloudinit",
            DiskVariant::Delete => "delete",
            DiskVariant::Unchanged => "unchanged",
        }
    }
}
