// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A builder for storage configurations.
//!
//! The builder turns one slot's raw [`DiskFields`] into the [`DiskVariant`]
//! its discriminator asks for, validating every field the variant uses and
//! warning about every field it does not. Problems are recorded in the
//! builder's [`Diagnostics`] rather than returned early, so one bad slot
//! never hides problems in the others.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;

use guest_storage_types::{
    Bus, CdRom, CdRomMedia, CloudInitDisk, DiskOptions, DiskVariant,
    NormalDisk, PassthroughDisk, SlotId, StorageConfiguration,
};

use crate::diagnostics::{DiskError, DiskWarning, Diagnostics};
use crate::fields::{DiskFields, SharedOptions};
use crate::validate;

/// The device type a user asked for in a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Disk,
    CdRom,
    CloudInit,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Disk => "disk",
            DeviceKind::CdRom => "cdrom",
            DeviceKind::CloudInit => "cloudinit",
        }
    }
}

impl FromStr for DeviceKind {
    type Err = DiskError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disk" => Ok(DeviceKind::Disk),
            "cdrom" => Ok(DeviceKind::CdRom),
            "cloudinit" => Ok(DeviceKind::CloudInit),
            _ => Err(DiskError::invalid(
                "type",
                s,
                "expected one of disk, cdrom, cloudinit",
            )),
        }
    }
}

impl Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One slot's worth of input, as lowered from either surface.
#[derive(Clone, Copy, Debug)]
pub struct DeviceRequest<'a> {
    pub slot: SlotId,
    pub kind: DeviceKind,
    pub passthrough: bool,
    pub fields: &'a DiskFields,
}

/// Collects the diagnostics for a single slot while its variant is built.
struct SlotContext<'a> {
    slot: SlotId,
    variant: &'static str,
    diagnostics: &'a mut Diagnostics,
    failed: bool,
}

impl<'a> SlotContext<'a> {
    fn error(&mut self, error: DiskError) {
        self.failed = true;
        self.diagnostics.push_error(self.slot, error);
    }

    fn check<T>(&mut self, result: Result<T, DiskError>) -> Option<T> {
        result.map_err(|e| self.error(e)).ok()
    }

    fn require<'f>(
        &mut self,
        field: &'static str,
        value: &'f str,
    ) -> Option<&'f str> {
        if value.is_empty() {
            self.error(DiskError::MissingField(field));
            None
        } else {
            Some(value)
        }
    }

    fn ignore(&mut self, fields: impl IntoIterator<Item = &'static str>) {
        for field in fields {
            self.diagnostics.push_warning(
                self.slot,
                DiskWarning::FieldIgnored { field, variant: self.variant },
            );
        }
    }

    /// Drops a bus-specific flag the slot's bus cannot honor.
    fn bus_flag(
        &mut self,
        field: &'static str,
        set: bool,
        supported: bool,
    ) -> bool {
        if set && !supported {
            self.diagnostics.push_warning(
                self.slot,
                DiskWarning::UnsupportedOnBus { field, bus: self.slot.bus() },
            );
            return false;
        }
        set
    }

    fn options(&mut self, raw: &SharedOptions) -> DiskOptions {
        let caps = self.slot.bus().capabilities();
        DiskOptions {
            cache: self.check(validate::cache(&raw.cache)).flatten(),
            async_io: self.check(validate::async_io(&raw.asyncio)).flatten(),
            discard: raw.discard,
            replicate: raw.replicate,
            backup: raw.backup.unwrap_or(true),
            serial: self.check(validate::serial(&raw.serial)).flatten(),
            wwn: self.check(validate::wwn(&raw.wwn)).flatten(),
            emulate_ssd: self.bus_flag(
                "emulatessd",
                raw.emulatessd,
                caps.emulate_ssd,
            ),
            io_thread: self.bus_flag("iothread", raw.iothread, caps.io_thread),
            read_only: self.bus_flag("readonly", raw.readonly, caps.read_only),
            bandwidth: self
                .check(validate::bandwidth(raw))
                .unwrap_or_default(),
        }
    }

    /// Yields `variant` unless an error was recorded for this slot.
    fn finish(self, variant: DiskVariant) -> Option<DiskVariant> {
        (!self.failed).then_some(variant)
    }
}

/// Builds the variant described by `request`, recording any errors and
/// warnings in `diagnostics`. Returns `None` if any blocking error was
/// recorded.
pub fn build_variant(
    request: &DeviceRequest<'_>,
    diagnostics: &mut Diagnostics,
) -> Option<DiskVariant> {
    let variant = match (request.kind, request.passthrough) {
        (DeviceKind::Disk, false) => "disk",
        (DeviceKind::Disk, true) => "passthrough disk",
        (DeviceKind::CdRom, _) => "cdrom",
        (DeviceKind::CloudInit, _) => "cloudinit",
    };
    let mut cx =
        SlotContext { slot: request.slot, variant, diagnostics, failed: false };
    let fields = request.fields;

    match (request.kind, request.passthrough) {
        (DeviceKind::Disk, false) => {
            cx.ignore(
                fields
                    .populated()
                    .into_iter()
                    .filter(|f| matches!(*f, "iso" | "disk_file")),
            );
            let storage = cx.require("storage", &fields.storage);
            let size = cx
                .require("size", &fields.size)
                .and_then(|s| cx.check(validate::size(s)));
            let format = cx.check(validate::format(&fields.format));
            let options = cx.options(&fields.options);

            match (storage, size, format) {
                (Some(storage), Some(size), Some(format)) => {
                    cx.finish(DiskVariant::Disk(NormalDisk {
                        storage: storage.to_owned(),
                        size,
                        format,
                        options,
                    }))
                }
                _ => None,
            }
        }
        (DeviceKind::Disk, true) => {
            cx.ignore(
                fields
                    .populated()
                    .into_iter()
                    .filter(|f| *f != "disk_file"),
            );
            let file = cx.require("disk_file", &fields.disk_file);
            let options = cx.options(&fields.options);

            file.and_then(|file| {
                cx.finish(DiskVariant::Passthrough(PassthroughDisk {
                    file: file.to_owned(),
                    options,
                }))
            })
        }
        (DeviceKind::CdRom, passthrough) => {
            cx.ignore(
                fields.populated().into_iter().filter(|f| *f != "iso"),
            );
            cx.ignore(fields.options.populated());

            let media = match (fields.iso.is_empty(), passthrough) {
                (true, false) => Some(CdRomMedia::None),
                (true, true) => Some(CdRomMedia::Passthrough),
                (false, false) => cx
                    .check(validate::iso(&fields.iso))
                    .map(|(storage, file)| CdRomMedia::Iso { storage, file }),
                (false, true) => {
                    cx.error(DiskError::ConflictingFields(
                        "iso",
                        "passthrough",
                    ));
                    None
                }
            };

            media.and_then(|media| {
                cx.finish(DiskVariant::CdRom(CdRom { media }))
            })
        }
        (DeviceKind::CloudInit, passthrough) => {
            let bus = request.slot.bus();
            if !bus_accepts(bus, request.kind) {
                cx.error(DiskError::UnsupportedOnBus {
                    device: DeviceKind::CloudInit.as_str(),
                    bus,
                });
            }

            cx.ignore(
                fields.populated().into_iter().filter(|f| *f != "storage"),
            );
            if passthrough {
                cx.ignore(["passthrough"]);
            }
            cx.ignore(fields.options.populated());

            cx.require("storage", &fields.storage).and_then(|storage| {
                cx.finish(DiskVariant::CloudInit(CloudInitDisk {
                    storage: storage.to_owned(),
                }))
            })
        }
    }
}

/// Accumulates slot assignments into a [`StorageConfiguration`].
///
/// Every slot starts out as [`DiskVariant::Delete`]. Each slot may be claimed
/// once per build; later claims on the same slot are reported as
/// [`DiskError::DuplicateSlot`] and leave the first claim in place.
#[derive(Debug, Default)]
pub struct StorageBuilder {
    config: StorageConfiguration,
    claimed: BTreeSet<SlotId>,
    diagnostics: Diagnostics,
}

impl StorageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `slot` as claimed. If it was already claimed, records a
    /// duplicate-slot error and returns false.
    fn claim(&mut self, slot: SlotId) -> bool {
        if self.claimed.insert(slot) {
            true
        } else {
            self.diagnostics
                .push_error(slot, DiskError::DuplicateSlot(slot.to_string()));
            false
        }
    }

    /// Builds and stores the device described by `request`.
    ///
    /// Returns true if the slot now holds the requested device.
    pub fn add_device(&mut self, request: &DeviceRequest<'_>) -> bool {
        if !self.claim(request.slot) {
            return false;
        }

        match build_variant(request, &mut self.diagnostics) {
            Some(variant) => {
                let _old = self.config.set(request.slot, variant);
                assert!(_old.is_empty());
                true
            }
            None => false,
        }
    }

    /// Marks `slot` as one whose current state must be left alone.
    pub fn leave_unchanged(&mut self, slot: SlotId) -> bool {
        if !self.claim(slot) {
            return false;
        }
        self.config.set(slot, DiskVariant::Unchanged);
        true
    }

    /// Claims `slot` without storing a device, leaving it as `Delete`.
    /// Used when a slot's input was rejected before a variant could be
    /// chosen.
    pub fn reject(&mut self, slot: SlotId, error: DiskError) {
        if self.claim(slot) {
            self.diagnostics.push_error(slot, error);
        }
    }

    /// Records an error for input that could not be tied to a slot.
    pub fn report_error(&mut self, location: impl Display, error: DiskError) {
        self.diagnostics.push_error(location, error);
    }

    pub fn report_warning(
        &mut self,
        location: impl Display,
        warning: DiskWarning,
    ) {
        self.diagnostics.push_warning(location, warning);
    }

    pub fn get(&self, slot: SlotId) -> &DiskVariant {
        self.config.get(slot)
    }

    /// Yields the completed configuration and its diagnostics.
    pub fn finish(self) -> (StorageConfiguration, Diagnostics) {
        (self.config, self.diagnostics)
    }
}

/// True if `bus` can host devices of `kind`.
pub fn bus_accepts(bus: Bus, kind: DeviceKind) -> bool {
    match kind {
        DeviceKind::CloudInit => bus.capabilities().cloud_init,
        DeviceKind::Disk | DeviceKind::CdRom => true,
    }
}

#[cfg(test)]
mod test {
    use guest_storage_types::{CacheMode, DiskFormat, DiskSize};

    use super::*;
    use crate::diagnostics::DiagnosticKind;

    fn slot(name: &str) -> SlotId {
        name.parse().unwrap()
    }

    fn build(
        name: &str,
        kind: DeviceKind,
        passthrough: bool,
        fields: &DiskFields,
    ) -> (Option<DiskVariant>, Diagnostics) {
        let mut diags = Diagnostics::new();
        let request =
            DeviceRequest { slot: slot(name), kind, passthrough, fields };
        (build_variant(&request, &mut diags), diags)
    }

    fn ignored(diags: &Diagnostics) -> Vec<&'static str> {
        diags
            .warnings()
            .filter_map(|(_, w)| match w {
                DiskWarning::FieldIgnored { field, .. } => Some(*field),
                _ => None,
            })
            .collect()
    }

    fn disk_fields(storage: &str, size: &str) -> DiskFields {
        DiskFields {
            storage: storage.to_owned(),
            size: size.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn normal_disk() {
        let mut fields = disk_fields("local-lvm", "32G");
        fields.format = "qcow2".to_owned();
        fields.options.cache = "writeback".to_owned();
        fields.options.iops_wr_concurrent = 400;

        let (variant, diags) = build("scsi0", DeviceKind::Disk, false, &fields);
        assert!(diags.is_empty());
        let Some(DiskVariant::Disk(disk)) = variant else {
            panic!("expected a normal disk, got {variant:?}");
        };
        assert_eq!(disk.storage, "local-lvm");
        assert_eq!(disk.size, DiskSize::from_kib(33554432));
        assert_eq!(disk.format, DiskFormat::Qcow2);
        assert_eq!(disk.options.cache, Some(CacheMode::WriteBack));
        assert!(disk.options.backup);
        assert_eq!(disk.options.bandwidth.write.iops.concurrent, 400);
    }

    #[test]
    fn normal_disk_missing_fields() {
        let (variant, diags) =
            build("scsi0", DeviceKind::Disk, false, &DiskFields::default());
        assert!(variant.is_none());
        let errors: Vec<&DiskError> = diags.errors().map(|(_, e)| e).collect();
        assert_eq!(
            errors,
            vec![
                &DiskError::MissingField("storage"),
                &DiskError::MissingField("size")
            ]
        );
    }

    #[test]
    fn normal_disk_reports_every_invalid_field() {
        let mut fields = disk_fields("local", "0G");
        fields.options.cache = "sometimes".to_owned();
        fields.options.wwn = "nope".to_owned();

        let (variant, diags) = build("sata1", DeviceKind::Disk, false, &fields);
        assert!(variant.is_none());
        let fields: Vec<&str> = diags
            .errors()
            .filter_map(|(_, e)| match e {
                DiskError::InvalidValue { field, .. } => Some(*field),
                _ => None,
            })
            .collect();
        assert_eq!(fields, vec!["size", "cache", "wwn"]);
    }

    #[test]
    fn normal_disk_warns_on_unused_fields() {
        let mut fields = disk_fields("local-lvm", "8G");
        fields.iso = "local:iso/x.iso".to_owned();
        fields.disk_file = "/dev/sdb".to_owned();

        let (variant, diags) = build("ide2", DeviceKind::Disk, false, &fields);
        assert!(matches!(variant, Some(DiskVariant::Disk(_))));
        assert!(!diags.has_errors());
        assert_eq!(ignored(&diags), vec!["iso", "disk_file"]);
    }

    #[test]
    fn bus_specific_flags_dropped_where_unsupported() {
        let mut fields = disk_fields("local-lvm", "8G");
        fields.options.emulatessd = true;
        fields.options.iothread = true;
        fields.options.readonly = true;

        let (variant, diags) = build("ide0", DeviceKind::Disk, false, &fields);
        let Some(DiskVariant::Disk(disk)) = variant else { panic!() };
        assert!(disk.options.emulate_ssd);
        assert!(!disk.options.io_thread);
        assert!(!disk.options.read_only);
        let dropped: Vec<&str> = diags
            .warnings()
            .filter_map(|(_, w)| match w {
                DiskWarning::UnsupportedOnBus { field, bus: Bus::Ide } => {
                    Some(*field)
                }
                _ => None,
            })
            .collect();
        assert_eq!(dropped, vec!["iothread", "readonly"]);

        let (variant, diags) =
            build("virtio4", DeviceKind::Disk, false, &fields);
        let Some(DiskVariant::Disk(disk)) = variant else { panic!() };
        assert!(!disk.options.emulate_ssd);
        assert!(disk.options.io_thread && disk.options.read_only);
        assert_eq!(diags.warnings().count(), 1);
    }

    #[test]
    fn passthrough_disk() {
        let mut fields = disk_fields("local-lvm", "8G");
        fields.format = "raw".to_owned();
        fields.disk_file = "/dev/disk/by-id/nvme-1".to_owned();
        fields.options.serial = "abc123".to_owned();

        let (variant, diags) = build("scsi5", DeviceKind::Disk, true, &fields);
        let Some(DiskVariant::Passthrough(disk)) = variant else { panic!() };
        assert_eq!(disk.file, "/dev/disk/by-id/nvme-1");
        assert_eq!(disk.options.serial.as_deref(), Some("abc123"));
        assert!(!diags.has_errors());
        assert_eq!(ignored(&diags), vec!["storage", "size", "format"]);

        let (variant, diags) =
            build("scsi5", DeviceKind::Disk, true, &DiskFields::default());
        assert!(variant.is_none());
        assert_eq!(
            diags.errors().next().map(|(_, e)| e),
            Some(&DiskError::MissingField("disk_file"))
        );
    }

    #[test]
    fn cdrom_media() {
        let (variant, diags) =
            build("ide2", DeviceKind::CdRom, false, &DiskFields::default());
        assert!(diags.is_empty());
        assert_eq!(
            variant,
            Some(DiskVariant::CdRom(CdRom { media: CdRomMedia::None }))
        );

        let (variant, _) =
            build("ide2", DeviceKind::CdRom, true, &DiskFields::default());
        assert_eq!(
            variant,
            Some(DiskVariant::CdRom(CdRom { media: CdRomMedia::Passthrough }))
        );

        let fields = DiskFields {
            iso: "local:iso/debian.iso".to_owned(),
            ..Default::default()
        };
        let (variant, _) = build("ide2", DeviceKind::CdRom, false, &fields);
        assert_eq!(
            variant,
            Some(DiskVariant::CdRom(CdRom {
                media: CdRomMedia::Iso {
                    storage: "local".to_owned(),
                    file: "iso/debian.iso".to_owned()
                }
            }))
        );

        let (variant, diags) = build("ide2", DeviceKind::CdRom, true, &fields);
        assert!(variant.is_none());
        assert!(diags.errors().any(|(_, e)| *e
            == DiskError::ConflictingFields("iso", "passthrough")));
    }

    #[test]
    fn cdrom_warns_on_disk_only_fields() {
        let mut fields = disk_fields("local-lvm", "8G");
        fields.options.asyncio = "native".to_owned();
        fields.options.discard = true;
        fields.options.mbps_r_burst = 10.0;

        let (variant, diags) =
            build("sata0", DeviceKind::CdRom, false, &fields);
        assert!(variant.is_some());
        assert_eq!(
            ignored(&diags),
            vec!["storage", "size", "asyncio", "discard", "mbps_r_burst"]
        );
    }

    #[test]
    fn cloud_init() {
        let fields = DiskFields {
            storage: "local".to_owned(),
            iso: "local:iso/x.iso".to_owned(),
            ..Default::default()
        };
        let (variant, diags) =
            build("ide3", DeviceKind::CloudInit, true, &fields);
        assert_eq!(
            variant,
            Some(DiskVariant::CloudInit(CloudInitDisk {
                storage: "local".to_owned()
            }))
        );
        assert_eq!(ignored(&diags), vec!["iso", "passthrough"]);
    }

    #[test]
    fn cloud_init_rejected_on_every_virtio_slot() {
        let fields = DiskFields {
            storage: "local".to_owned(),
            ..Default::default()
        };
        for slot in Bus::Virtio.slots() {
            let (variant, diags) = build(
                &slot.to_string(),
                DeviceKind::CloudInit,
                false,
                &fields,
            );
            assert!(variant.is_none());
            assert_eq!(
                diags.errors().map(|(_, e)| e).collect::<Vec<_>>(),
                vec![&DiskError::UnsupportedOnBus {
                    device: "cloudinit",
                    bus: Bus::Virtio
                }]
            );
        }
        assert!(!bus_accepts(Bus::Virtio, DeviceKind::CloudInit));
        assert!(bus_accepts(Bus::Virtio, DeviceKind::CdRom));
    }

    #[test]
    fn duplicate_slot_keeps_first_claim() {
        let first = disk_fields("local-lvm", "32G");
        let second = DiskFields::default();
        let mut builder = StorageBuilder::new();

        assert!(builder.add_device(&DeviceRequest {
            slot: slot("scsi0"),
            kind: DeviceKind::Disk,
            passthrough: false,
            fields: &first,
        }));
        assert!(!builder.add_device(&DeviceRequest {
            slot: slot("scsi0"),
            kind: DeviceKind::CdRom,
            passthrough: false,
            fields: &second,
        }));
        assert!(!builder.leave_unchanged(slot("scsi0")));

        let (config, diags) = builder.finish();
        assert!(matches!(config.get(slot("scsi0")), DiskVariant::Disk(_)));
        let duplicates: Vec<_> = diags
            .iter()
            .filter(|d| {
                d.kind
                    == DiagnosticKind::Error(DiskError::DuplicateSlot(
                        "scsi0".to_owned(),
                    ))
            })
            .collect();
        assert_eq!(duplicates.len(), 2);
    }

    #[test]
    fn failed_claim_still_counts() {
        let fields = DiskFields::default();
        let mut builder = StorageBuilder::new();
        let request = DeviceRequest {
            slot: slot("virtio0"),
            kind: DeviceKind::CloudInit,
            passthrough: false,
            fields: &fields,
        };
        assert!(!builder.add_device(&request));
        assert!(!builder.add_device(&request));
        assert_eq!(builder.get(slot("virtio0")), &DiskVariant::Delete);

        let (_, diags) = builder.finish();
        assert_eq!(
            diags
                .errors()
                .filter(|(_, e)| matches!(e, DiskError::DuplicateSlot(_)))
                .count(),
            1
        );
    }
}
