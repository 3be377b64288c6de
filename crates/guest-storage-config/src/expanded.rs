// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The expanded `disks` map syntax.
//!
//! Every slot has its own table, grouped by bus, holding at most one device
//! sub-table:
//!
//! ```toml
//! [disks.scsi.scsi0.disk]
//! storage = "local-lvm"
//! size = "32G"
//!
//! [disks.ide.ide2.cdrom]
//! iso = "local:iso/debian.iso"
//!
//! [disks.sata.sata0]
//! ignore = true
//! ```
//!
//! A missing or empty slot table deletes the slot. `ignore = true` leaves
//! whatever the slot currently holds alone, which the `disk` list cannot
//! express.

use std::collections::BTreeMap;

use guest_storage_types::{
    classify, Bus, CdRomMedia, DiskVariant, SlotError, SlotId,
    StorageConfiguration,
};
use serde::{Deserialize, Serialize};
use slog::Logger;

use crate::builder::{DeviceKind, DeviceRequest, StorageBuilder};
use crate::diagnostics::{DiskError, DiskWarning, Diagnostics};
use crate::fields::{is_false, DiskFields, SharedOptions};

/// Per-bus slot tables, keyed by slot name.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExpandedDisks {
    pub ide: BTreeMap<String, SlotBlock>,
    pub sata: BTreeMap<String, SlotBlock>,
    pub scsi: BTreeMap<String, SlotBlock>,
    pub virtio: BTreeMap<String, SlotBlock>,
}

impl ExpandedDisks {
    pub fn bus(&self, bus: Bus) -> &BTreeMap<String, SlotBlock> {
        match bus {
            Bus::Ide => &self.ide,
            Bus::Sata => &self.sata,
            Bus::Scsi => &self.scsi,
            Bus::Virtio => &self.virtio,
        }
    }

    pub fn bus_mut(&mut self, bus: Bus) -> &mut BTreeMap<String, SlotBlock> {
        match bus {
            Bus::Ide => &mut self.ide,
            Bus::Sata => &mut self.sata,
            Bus::Scsi => &mut self.scsi,
            Bus::Virtio => &mut self.virtio,
        }
    }
}

/// The table for a single slot.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct SlotBlock {
    #[serde(default, skip_serializing_if = "is_false")]
    pub ignore: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskBlock>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passthrough: Option<PassthroughBlock>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdrom: Option<CdRomBlock>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloudinit: Option<CloudInitBlock>,

    #[serde(flatten, default)]
    pub unknown: BTreeMap<String, toml::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct DiskBlock {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub storage: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub size: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,

    #[serde(flatten)]
    pub options: SharedOptions,

    #[serde(flatten, default)]
    pub unknown: BTreeMap<String, toml::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PassthroughBlock {
    /// Host path of the device or file handed to the guest.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file: String,

    #[serde(flatten)]
    pub options: SharedOptions,

    #[serde(flatten, default)]
    pub unknown: BTreeMap<String, toml::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct CdRomBlock {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iso: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub passthrough: bool,

    #[serde(flatten, default)]
    pub unknown: BTreeMap<String, toml::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct CloudInitBlock {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub storage: String,

    #[serde(flatten, default)]
    pub unknown: BTreeMap<String, toml::Value>,
}

/// One populated device sub-table, lowered to builder input.
struct Lowered<'a> {
    block: &'static str,
    kind: DeviceKind,
    passthrough: bool,
    fields: DiskFields,
    unknown: &'a BTreeMap<String, toml::Value>,
}

impl SlotBlock {
    fn lowered(&self) -> Vec<Lowered<'_>> {
        let mut out = Vec::new();
        if let Some(disk) = &self.disk {
            out.push(Lowered {
                block: "disk",
                kind: DeviceKind::Disk,
                passthrough: false,
                fields: DiskFields {
                    storage: disk.storage.clone(),
                    size: disk.size.clone(),
                    format: disk.format.clone(),
                    options: disk.options.clone(),
                    ..Default::default()
                },
                unknown: &disk.unknown,
            });
        }
        if let Some(pt) = &self.passthrough {
            out.push(Lowered {
                block: "passthrough",
                kind: DeviceKind::Disk,
                passthrough: true,
                fields: DiskFields {
                    disk_file: pt.file.clone(),
                    options: pt.options.clone(),
                    ..Default::default()
                },
                unknown: &pt.unknown,
            });
        }
        if let Some(cdrom) = &self.cdrom {
            out.push(Lowered {
                block: "cdrom",
                kind: DeviceKind::CdRom,
                passthrough: cdrom.passthrough,
                fields: DiskFields {
                    iso: cdrom.iso.clone(),
                    ..Default::default()
                },
                unknown: &cdrom.unknown,
            });
        }
        if let Some(ci) = &self.cloudinit {
            out.push(Lowered {
                block: "cloudinit",
                kind: DeviceKind::CloudInit,
                passthrough: false,
                fields: DiskFields {
                    storage: ci.storage.clone(),
                    ..Default::default()
                },
                unknown: &ci.unknown,
            });
        }
        out
    }
}

/// Resolves a slot table's key, which must name a slot on the bus whose
/// table it appears in.
fn slot_on_bus(bus: Bus, key: &str) -> Result<SlotId, SlotError> {
    let slot = classify(key)?;
    if slot.bus() != bus {
        return Err(SlotError::WrongBus { slot, bus });
    }
    Ok(slot)
}

fn decode_slot(
    builder: &mut StorageBuilder,
    slot: SlotId,
    block: &SlotBlock,
) -> &'static str {
    for key in block.unknown.keys() {
        builder.report_warning(slot, DiskWarning::UnknownField(key.clone()));
    }

    let mut lowered = block.lowered();
    if lowered.len() > 1 || (block.ignore && !lowered.is_empty()) {
        builder.reject(slot, DiskError::ConflictingBlocks);
        return "rejected";
    }

    let Some(device) = lowered.pop() else {
        if block.ignore {
            builder.leave_unchanged(slot);
            return "unchanged";
        }
        return "delete";
    };

    for key in device.unknown.keys() {
        builder.report_warning(
            slot,
            DiskWarning::UnknownField(format!("{}.{key}", device.block)),
        );
    }
    let accepted = builder.add_device(&DeviceRequest {
        slot,
        kind: device.kind,
        passthrough: device.passthrough,
        fields: &device.fields,
    });
    if accepted {
        device.block
    } else {
        "rejected"
    }
}

/// Decodes a `disks` map into a full configuration.
///
/// Slot tables are processed in address-space order. A key that does not
/// name a slot of its bus is dropped with an `UnknownSlot` diagnostic located
/// at `disks.<bus>.<key>`.
pub fn decode(
    disks: &ExpandedDisks,
    log: &Logger,
) -> (StorageConfiguration, Diagnostics) {
    let mut builder = StorageBuilder::new();

    let mut blocks = BTreeMap::new();
    for bus in Bus::ALL {
        for (key, block) in disks.bus(bus) {
            match slot_on_bus(bus, key) {
                Ok(slot) => {
                    blocks.insert(slot, block);
                }
                Err(source) => builder.report_error(
                    format!("disks.{bus}.{key}"),
                    DiskError::UnknownSlot { name: key.clone(), source },
                ),
            }
        }
    }

    for (slot, block) in blocks {
        let outcome = decode_slot(&mut builder, slot, block);
        slog::debug!(log, "decoded slot table";
            "slot" => %slot,
            "outcome" => outcome);
    }

    builder.finish()
}

fn block_for(variant: &DiskVariant) -> SlotBlock {
    match variant {
        DiskVariant::Disk(disk) => {
            let DiskFields { storage, size, format, options, .. } =
                DiskFields::from(disk);
            SlotBlock {
                disk: Some(DiskBlock {
                    storage,
                    size,
                    format,
                    options,
                    unknown: BTreeMap::new(),
                }),
                ..Default::default()
            }
        }
        DiskVariant::Passthrough(disk) => SlotBlock {
            passthrough: Some(PassthroughBlock {
                file: disk.file.clone(),
                options: SharedOptions::from(&disk.options),
                unknown: BTreeMap::new(),
            }),
            ..Default::default()
        },
        DiskVariant::CdRom(cdrom) => SlotBlock {
            cdrom: Some(CdRomBlock {
                iso: DiskFields::from(&cdrom.media).iso,
                passthrough: cdrom.media == CdRomMedia::Passthrough,
                unknown: BTreeMap::new(),
            }),
            ..Default::default()
        },
        DiskVariant::CloudInit(ci) => SlotBlock {
            cloudinit: Some(CloudInitBlock {
                storage: ci.storage.clone(),
                unknown: BTreeMap::new(),
            }),
            ..Default::default()
        },
        DiskVariant::Delete | DiskVariant::Unchanged => SlotBlock::default(),
    }
}

/// Encodes a configuration as a `disks` map with a table for every slot.
///
/// `Delete` and `Unchanged` both render as an empty table.
pub fn encode(config: &StorageConfiguration) -> ExpandedDisks {
    let mut disks = ExpandedDisks::default();
    for (slot, variant) in config.iter() {
        disks
            .bus_mut(slot.bus())
            .insert(slot.to_string(), block_for(variant));
    }
    disks
}

#[cfg(test)]
mod test {
    use guest_storage_types::{all_slots, DiskSize, SLOT_COUNT};

    use super::*;
    use crate::diagnostics::DiagnosticKind;

    fn logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn disks(raw: &str) -> ExpandedDisks {
        #[derive(Deserialize)]
        struct Doc {
            disks: ExpandedDisks,
        }
        toml::from_str::<Doc>(raw).unwrap().disks
    }

    fn slot(name: &str) -> SlotId {
        name.parse().unwrap()
    }

    #[test]
    fn missing_and_empty_tables_delete() {
        let input = disks(
            r#"
[disks.scsi.scsi0.disk]
storage = "local-lvm"
size = "32G"

[disks.scsi.scsi1]
"#,
        );
        let (config, diags) = decode(&input, &logger());
        assert!(diags.is_empty(), "{diags:?}");

        let DiskVariant::Disk(disk) = config.get(slot("scsi0")) else {
            panic!("scsi0 should hold a disk");
        };
        assert_eq!(disk.size, DiskSize::from_kib(33554432));
        assert_eq!(config.get(slot("scsi1")), &DiskVariant::Delete);
        assert_eq!(config.get(slot("scsi3")), &DiskVariant::Delete);
        assert_eq!(config.devices().count(), 1);
    }

    #[test]
    fn ignore_leaves_slot_unchanged() {
        let input = disks(
            r#"
[disks.sata.sata0]
ignore = true

[disks.sata.sata1]
ignore = false
"#,
        );
        let (config, diags) = decode(&input, &logger());
        assert!(diags.is_empty(), "{diags:?}");
        assert_eq!(config.get(slot("sata0")), &DiskVariant::Unchanged);
        assert_eq!(config.get(slot("sata1")), &DiskVariant::Delete);
    }

    #[test]
    fn device_tables() {
        let input = disks(
            r#"
[disks.ide.ide2.cdrom]
iso = "local:iso/debian.iso"

[disks.ide.ide3.cloudinit]
storage = "local"

[disks.virtio.virtio4.passthrough]
file = "/dev/disk/by-id/ata-ST1000"
readonly = true
"#,
        );
        let (config, diags) = decode(&input, &logger());
        assert!(diags.is_empty(), "{diags:?}");

        let DiskVariant::CdRom(cdrom) = config.get(slot("ide2")) else {
            panic!("ide2 should hold a cdrom");
        };
        assert_eq!(
            cdrom.media,
            CdRomMedia::Iso {
                storage: "local".to_owned(),
                file: "iso/debian.iso".to_owned()
            }
        );
        assert!(matches!(config.get(slot("ide3")), DiskVariant::CloudInit(_)));
        let DiskVariant::Passthrough(pt) = config.get(slot("virtio4")) else {
            panic!("virtio4 should hold a passthrough disk");
        };
        assert_eq!(pt.file, "/dev/disk/by-id/ata-ST1000");
        assert!(pt.options.read_only);
    }

    #[test]
    fn conflicting_blocks_leave_slot_deleted() {
        let input = disks(
            r#"
[disks.scsi.scsi2.disk]
storage = "local-lvm"
size = "8G"

[disks.scsi.scsi2.cdrom]

[disks.scsi.scsi5]
ignore = true

[disks.scsi.scsi5.cloudinit]
storage = "local"
"#,
        );
        let (config, diags) = decode(&input, &logger());
        let errors: Vec<(&str, &DiskError)> = diags.errors().collect();
        assert_eq!(
            errors,
            vec![
                ("scsi2", &DiskError::ConflictingBlocks),
                ("scsi5", &DiskError::ConflictingBlocks),
            ]
        );
        assert_eq!(config.get(slot("scsi2")), &DiskVariant::Delete);
        assert_eq!(config.get(slot("scsi5")), &DiskVariant::Delete);
    }

    #[test]
    fn keys_outside_the_bus_are_dropped() {
        let input = disks(
            r#"
[disks.ide.sata0.cdrom]

[disks.ide.ide4.cdrom]

[disks.virtio.virtio0.cdrom]
"#,
        );
        let (config, diags) = decode(&input, &logger());
        let errors: Vec<(&str, &DiskError)> = diags.errors().collect();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].0, "disks.ide.ide4");
        assert!(matches!(
            errors[0].1,
            DiskError::UnknownSlot {
                source: SlotError::IndexOutOfRange { bus: Bus::Ide, index: 4 },
                ..
            }
        ));
        assert_eq!(errors[1].0, "disks.ide.sata0");
        assert!(matches!(
            errors[1].1,
            DiskError::UnknownSlot { source: SlotError::WrongBus { .. }, .. }
        ));
        assert_eq!(config.get(slot("sata0")), &DiskVariant::Delete);
        assert!(matches!(config.get(slot("virtio0")), DiskVariant::CdRom(_)));
    }

    #[test]
    fn unknown_keys_warn() {
        let input = disks(
            r#"
[disks.scsi.scsi0]
bogus = 1

[disks.scsi.scsi0.disk]
storage = "local-lvm"
size = "1G"
sise = "2G"
"#,
        );
        let (config, diags) = decode(&input, &logger());
        let kinds: Vec<&DiagnosticKind> =
            diags.iter().map(|d| &d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                &DiagnosticKind::Warning(DiskWarning::UnknownField(
                    "bogus".to_owned()
                )),
                &DiagnosticKind::Warning(DiskWarning::UnknownField(
                    "disk.sise".to_owned()
                )),
            ]
        );
        assert!(matches!(config.get(slot("scsi0")), DiskVariant::Disk(_)));
    }

    #[test]
    fn encode_declares_every_slot() {
        let input = disks(
            r#"
[disks.sata.sata1.disk]
storage = "local-lvm"
size = "2048M"
format = "qcow2"
mbps_r_burst = 10

[disks.scsi.scsi30.passthrough]
file = "/dev/sdc"

[disks.ide.ide0.cdrom]
passthrough = true

[disks.virtio.virtio15]
ignore = true
"#,
        );
        let (config, diags) = decode(&input, &logger());
        assert!(diags.is_empty(), "{diags:?}");

        let encoded = encode(&config);
        let total: usize =
            Bus::ALL.iter().map(|bus| encoded.bus(*bus).len()).sum();
        assert_eq!(total, SLOT_COUNT);
        for slot in all_slots() {
            assert!(encoded.bus(slot.bus()).contains_key(&slot.to_string()));
        }

        let sata1 = encoded.sata["sata1"].disk.as_ref().unwrap();
        assert_eq!(sata1.size, "2G");
        assert_eq!(sata1.format, "qcow2");
        assert_eq!(sata1.options.mbps_r_burst, 10.0);
        assert!(encoded.ide["ide0"].cdrom.as_ref().unwrap().passthrough);
        assert_eq!(encoded.virtio["virtio15"], SlotBlock::default());

        let (again, diags) = decode(&encoded, &logger());
        assert!(diags.is_empty(), "{diags:?}");
        for (slot, variant) in config.iter() {
            let expected = match variant {
                DiskVariant::Unchanged => &DiskVariant::Delete,
                other => other,
            };
            assert_eq!(again.get(slot), expected, "{slot}");
        }
    }
}
