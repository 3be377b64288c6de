// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The canonical description of a guest's storage.

use std::collections::BTreeMap;

use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::disk::DiskVariant;
use crate::{all_slots, SlotId, SLOT_COUNT};

/// A total mapping from every slot in the address space to the device that
/// should occupy it.
///
/// A fresh configuration holds [`DiskVariant::Delete`] in every slot.
/// Configurations serialize as a map from slot name to variant; when
/// deserializing, slots missing from the map are filled with `Delete`.
#[derive(Clone, PartialEq, Debug)]
pub struct StorageConfiguration {
    slots: Vec<DiskVariant>,
}

impl Default for StorageConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageConfiguration {
    pub fn new() -> Self {
        Self { slots: vec![DiskVariant::Delete; SLOT_COUNT] }
    }

    pub fn get(&self, slot: SlotId) -> &DiskVariant {
        &self.slots[slot.ordinal()]
    }

    /// Stores `variant` at `slot`, returning whatever was there before.
    pub fn set(&mut self, slot: SlotId, variant: DiskVariant) -> DiskVariant {
        std::mem::replace(&mut self.slots[slot.ordinal()], variant)
    }

    /// Yields every slot with its variant, in address-space order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &DiskVariant)> {
        all_slots().zip(self.slots.iter())
    }

    /// Yields the slots holding a device, in address-space order.
    pub fn devices(&self) -> impl Iterator<Item = (SlotId, &DiskVariant)> {
        self.iter().filter(|(_, variant)| !variant.is_empty())
    }

    pub fn has_cloud_init(&self) -> bool {
        self.slots.iter().any(|v| matches!(v, DiskVariant::CloudInit(_)))
    }
}

impl FromIterator<(SlotId, DiskVariant)> for StorageConfiguration {
    fn from_iter<I: IntoIterator<Item = (SlotId, DiskVariant)>>(
        iter: I,
    ) -> Self {
        let mut config = Self::new();
        for (slot, variant) in iter {
            config.set(slot, variant);
        }
        config
    }
}

impl Serialize for StorageConfiguration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(SLOT_COUNT))?;
        for (slot, variant) in self.iter() {
            map.serialize_entry(&slot, variant)?;
        }
        map.end()
    }
}

impl<'d> Deserialize<'d> for StorageConfiguration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'d>,
    {
        let map = BTreeMap::<SlotId, DiskVariant>::deserialize(deserializer)?;
        Ok(map.into_iter().collect())
    }
}

impl JsonSchema for StorageConfiguration {
    fn schema_name() -> String {
        "StorageConfiguration".to_owned()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        gen.subschema_for::<BTreeMap<String, DiskVariant>>()
    }
}
