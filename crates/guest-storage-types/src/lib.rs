// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Canonical types describing a guest's storage configuration.
//!
//! This crate defines the slot address space (which buses exist and how many
//! attachment points each one has), the disk variants that may occupy a slot,
//! and the [`StorageConfiguration`] that maps every slot to exactly one
//! variant. The surface syntaxes that users write and the API client that
//! talks to the hypervisor both convert to and from these types.

use std::fmt::Display;
use std::str::FromStr;

use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub mod bandwidth;
pub mod config;
pub mod disk;
pub mod size;

pub use bandwidth::{BandwidthLimits, FlatBandwidth};
pub use config::StorageConfiguration;
pub use disk::{
    AsyncIo, CacheMode, CdRom, CdRomMedia, CloudInitDisk, DiskFormat,
    DiskOptions, DiskVariant, NormalDisk, PassthroughDisk,
};
pub use size::DiskSize;

/// Total number of slots across every bus.
pub const SLOT_COUNT: usize = 4 + 6 + 31 + 16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlotError {
    #[error("{0:?} does not start with a known bus prefix")]
    UnknownBus(String),

    #[error("{0:?} does not end in a slot index")]
    InvalidIndex(String),

    #[error(
        "slot index {index} outside range of 0-{} on bus {bus}",
        .bus.slot_count() - 1
    )]
    IndexOutOfRange { bus: Bus, index: u8 },

    #[error("slot {slot} does not belong to bus {bus}")]
    WrongBus { slot: SlotId, bus: Bus },
}

/// A hardware interface category that guest disks attach to.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Deserialize,
    Serialize,
    JsonSchema,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Bus {
    Ide,
    Sata,
    Scsi,
    Virtio,
}

/// The optional features a bus supports.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BusCapabilities {
    /// Disks may advertise themselves to the guest as solid-state drives.
    pub emulate_ssd: bool,

    /// Disks may be serviced by a dedicated I/O thread.
    pub io_thread: bool,

    /// Disks may be attached read-only.
    pub read_only: bool,

    /// A cloud-init drive may be attached.
    pub cloud_init: bool,
}

impl Bus {
    /// Every bus, in address-space order.
    pub const ALL: [Bus; 4] = [Bus::Ide, Bus::Sata, Bus::Scsi, Bus::Virtio];

    /// The prefix used to build slot names on this bus.
    pub fn prefix(self) -> &'static str {
        self.into()
    }

    /// The number of slots this bus provides. Valid indices are
    /// `0..slot_count()`.
    pub const fn slot_count(self) -> u8 {
        match self {
            Bus::Ide => 4,
            Bus::Sata => 6,
            Bus::Scsi => 31,
            Bus::Virtio => 16,
        }
    }

    pub const fn capabilities(self) -> BusCapabilities {
        match self {
            Bus::Ide | Bus::Sata => BusCapabilities {
                emulate_ssd: true,
                io_thread: false,
                read_only: false,
                cloud_init: true,
            },
            Bus::Scsi => BusCapabilities {
                emulate_ssd: true,
                io_thread: true,
                read_only: true,
                cloud_init: true,
            },
            Bus::Virtio => BusCapabilities {
                emulate_ssd: false,
                io_thread: true,
                read_only: true,
                cloud_init: false,
            },
        }
    }

    /// Position of this bus's first slot in the flattened address space.
    const fn first_ordinal(self) -> usize {
        match self {
            Bus::Ide => 0,
            Bus::Sata => Bus::Ide.slot_count() as usize,
            Bus::Scsi => {
                Bus::Sata.first_ordinal() + Bus::Sata.slot_count() as usize
            }
            Bus::Virtio => {
                Bus::Scsi.first_ordinal() + Bus::Scsi.slot_count() as usize
            }
        }
    }

    /// Yields this bus's slots in ascending index order.
    pub fn slots(self) -> impl DoubleEndedIterator<Item = SlotId> {
        (0..self.slot_count()).map(move |index| SlotId { bus: self, index })
    }
}

impl Display for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// An attachment point on a bus, e.g. `scsi13`.
///
/// Slots order by bus (IDE, SATA, SCSI, VirtIO) and then by index, which is
/// the order used whenever a configuration is rendered back out.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SlotId {
    bus: Bus,
    index: u8,
}

impl SlotId {
    pub fn new(bus: Bus, index: u8) -> Result<Self, SlotError> {
        if index >= bus.slot_count() {
            return Err(SlotError::IndexOutOfRange { bus, index });
        }

        Ok(Self { bus, index })
    }

    #[inline]
    pub fn bus(&self) -> Bus {
        self.bus
    }

    #[inline]
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Position of this slot in [`all_slots`].
    pub fn ordinal(&self) -> usize {
        self.bus.first_ordinal() + self.index as usize
    }

    /// Inverse of [`SlotId::ordinal`].
    ///
    /// # Panics
    ///
    /// Panics if `ordinal` is not less than [`SLOT_COUNT`].
    pub fn from_ordinal(ordinal: usize) -> Self {
        Bus::ALL
            .iter()
            .rev()
            .find(|bus| bus.first_ordinal() <= ordinal)
            .and_then(|&bus| {
                let index = u8::try_from(ordinal - bus.first_ordinal()).ok()?;
                SlotId::new(bus, index).ok()
            })
            .unwrap_or_else(|| panic!("slot ordinal {ordinal} out of range"))
    }
}

/// Yields every slot in the address space: IDE ascending, then SATA, then
/// SCSI, then VirtIO.
pub fn all_slots() -> impl DoubleEndedIterator<Item = SlotId> {
    Bus::ALL.into_iter().flat_map(Bus::slots)
}

/// Resolves a slot name such as `sata2` to its [`SlotId`].
///
/// The bus is chosen by the longest matching prefix; the remainder must be a
/// decimal index without leading zeros that lies inside the bus's range.
pub fn classify(name: &str) -> Result<SlotId, SlotError> {
    let bus = Bus::ALL
        .iter()
        .filter(|bus| name.starts_with(bus.prefix()))
        .max_by_key(|bus| bus.prefix().len())
        .copied()
        .ok_or_else(|| SlotError::UnknownBus(name.to_owned()))?;

    let digits = &name[bus.prefix().len()..];
    if digits.is_empty()
        || !digits.bytes().all(|b| b.is_ascii_digit())
        || (digits.len() > 1 && digits.starts_with('0'))
    {
        return Err(SlotError::InvalidIndex(name.to_owned()));
    }

    let index = u8::from_str(digits)
        .map_err(|_| SlotError::InvalidIndex(name.to_owned()))?;
    SlotId::new(bus, index)
}

impl FromStr for SlotId {
    type Err = SlotError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        classify(s)
    }
}

impl Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.bus.prefix(), self.index)
    }
}

impl Serialize for SlotId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'d> Deserialize<'d> for SlotId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'d>,
    {
        let s = String::deserialize(deserializer)?;
        FromStr::from_str(&s).map_err(de::Error::custom)
    }
}

impl JsonSchema for SlotId {
    fn schema_name() -> String {
        "SlotId".to_owned()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        String::json_schema(gen)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_test::{assert_tokens, Token};

    const TEST_CASES: &[(&str, Result<(Bus, u8), ()>)] = &[
        ("ide0", Ok((Bus::Ide, 0))),
        ("ide3", Ok((Bus::Ide, 3))),
        ("sata5", Ok((Bus::Sata, 5))),
        ("scsi13", Ok((Bus::Scsi, 13))),
        ("scsi30", Ok((Bus::Scsi, 30))),
        ("virtio15", Ok((Bus::Virtio, 15))),
        ("ide4", Err(())),
        ("sata6", Err(())),
        ("scsi31", Err(())),
        ("virtio16", Err(())),
        ("scsi01", Err(())),
        ("scsi+1", Err(())),
        ("scsi", Err(())),
        ("nvme0", Err(())),
        ("virtio300", Err(())),
        ("", Err(())),
    ];

    #[test]
    fn slot_from_str() {
        for (input, expected) in TEST_CASES {
            match classify(input) {
                Ok(slot) => {
                    let (bus, index) = expected.unwrap();
                    assert_eq!((slot.bus(), slot.index()), (bus, index));
                }
                Err(_) => assert!(
                    expected.is_err(),
                    "Expected error parsing slot {}",
                    input
                ),
            }
        }
    }

    #[test]
    fn slot_serialization() {
        for (input, expected) in TEST_CASES {
            if let Ok((bus, index)) = expected {
                let slot = SlotId::new(*bus, *index).unwrap();
                assert_tokens(&slot, &[Token::Str(input)]);
            } else {
                let tokens = [Token::Str(input)];
                let mut de = serde_test::Deserializer::new(&tokens);
                assert!(SlotId::deserialize(&mut de).is_err());
            }
        }
    }

    #[test]
    fn address_space_is_ordered_and_complete() {
        let slots: Vec<SlotId> = all_slots().collect();
        assert_eq!(slots.len(), SLOT_COUNT);
        assert!(slots.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(slots.first().unwrap().to_string(), "ide0");
        assert_eq!(slots.last().unwrap().to_string(), "virtio15");

        for (ordinal, slot) in slots.iter().enumerate() {
            assert_eq!(slot.ordinal(), ordinal);
            assert_eq!(SlotId::from_ordinal(ordinal), *slot);
        }
    }

    #[test]
    fn cloud_init_unsupported_on_virtio_only() {
        for bus in Bus::ALL {
            assert_eq!(bus.capabilities().cloud_init, bus != Bus::Virtio);
        }
    }

    #[test]
    fn slot_error_messages() {
        assert_eq!(
            classify("scsi31").unwrap_err().to_string(),
            "slot index 31 outside range of 0-30 on bus scsi"
        );
        let slot = classify("sata0").unwrap();
        assert_eq!(
            SlotError::WrongBus { slot, bus: Bus::Ide }.to_string(),
            "slot sata0 does not belong to bus ide"
        );
    }

    #[test]
    #[should_panic]
    fn ordinal_past_end_panics() {
        let _ = SlotId::from_ordinal(SLOT_COUNT);
    }
}
