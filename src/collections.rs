//! The replicated collections and how each one maps between its in-memory
//! shape and the value stored under `families/{code}/{name}`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::model::{
    Allergy, ByMember, CheckupLogs, DismissedCheckups, FamilyData, GrowthRecord, HealthEntry,
    Identified, Medication, Member, PeriodRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum CollectionKind {
    Members,
    Entries,
    CheckupLogs,
    DismissedCheckups,
    Allergies,
    GrowthRecords,
    Medications,
    PeriodRecords,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 8] = [
        CollectionKind::Members,
        CollectionKind::Entries,
        CollectionKind::CheckupLogs,
        CollectionKind::DismissedCheckups,
        CollectionKind::Allergies,
        CollectionKind::GrowthRecords,
        CollectionKind::Medications,
        CollectionKind::PeriodRecords,
    ];

    /// Child name under `families/{code}`.
    pub fn remote_name(self) -> &'static str {
        match self {
            CollectionKind::Members => "members",
            CollectionKind::Entries => "entries",
            CollectionKind::CheckupLogs => "checkupLogs",
            CollectionKind::DismissedCheckups => "dismissedCheckups",
            CollectionKind::Allergies => "allergies",
            CollectionKind::GrowthRecords => "growthRecords",
            CollectionKind::Medications => "medications",
            CollectionKind::PeriodRecords => "periodRecords",
        }
    }

    /// Local store key.
    pub fn local_key(self) -> &'static str {
        match self {
            CollectionKind::Members => "healthFamily_members",
            CollectionKind::Entries => "healthFamily_entries",
            CollectionKind::CheckupLogs => "healthFamily_checkupLogs",
            CollectionKind::DismissedCheckups => "healthFamily_dismissedCheckups",
            CollectionKind::Allergies => "healthFamily_allergies",
            CollectionKind::GrowthRecords => "healthFamily_growthRecords",
            CollectionKind::Medications => "healthFamily_medications",
            CollectionKind::PeriodRecords => "healthFamily_periodRecords",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.remote_name())
    }
}

/// Ties one collection's value type to its slot in [`FamilyData`] and to
/// its remote representation.
pub trait Collection: Send + Sync + 'static {
    type Value: Clone + PartialEq + Default + Serialize + DeserializeOwned + Send + Sync;

    const KIND: CollectionKind;

    fn get(data: &FamilyData) -> &Self::Value;
    fn get_mut(data: &mut FamilyData) -> &mut Self::Value;

    fn to_remote(value: &Self::Value) -> Value {
        serde_json::to_value(value).unwrap_or(Value::Null)
    }

    /// Decode an inbound snapshot. `Null` decodes to the empty default.
    fn from_remote(value: Value) -> serde_json::Result<Self::Value> {
        if value.is_null() {
            return Ok(Self::Value::default());
        }
        serde_json::from_value(value)
    }

    /// Combine an inbound value with the current local value. Whole-value
    /// replacement unless a collection keeps local-only fields.
    fn merge_inbound(_local: &Self::Value, inbound: Self::Value) -> Self::Value {
        inbound
    }
}

pub struct Members;
pub struct Entries;
pub struct CheckupLogsCollection;
pub struct DismissedCheckupsCollection;
pub struct Allergies;
pub struct GrowthRecords;
pub struct Medications;
pub struct PeriodRecords;

impl Collection for Members {
    type Value = Vec<Member>;
    const KIND: CollectionKind = CollectionKind::Members;

    fn get(data: &FamilyData) -> &Self::Value {
        &data.members
    }

    fn get_mut(data: &mut FamilyData) -> &mut Self::Value {
        &mut data.members
    }

    fn to_remote(value: &Self::Value) -> Value {
        to_keyed_map(value)
    }

    fn from_remote(value: Value) -> serde_json::Result<Self::Value> {
        from_keyed_map(value)
    }
}

impl Collection for Entries {
    type Value = Vec<HealthEntry>;
    const KIND: CollectionKind = CollectionKind::Entries;

    fn get(data: &FamilyData) -> &Self::Value {
        &data.entries
    }

    fn get_mut(data: &mut FamilyData) -> &mut Self::Value {
        &mut data.entries
    }

    fn to_remote(value: &Self::Value) -> Value {
        to_keyed_map(&strip_attachments(value))
    }

    fn from_remote(value: Value) -> serde_json::Result<Self::Value> {
        let mut entries: Vec<HealthEntry> = from_keyed_map(value)?;
        // Attachments never travel through the remote store.
        for entry in &mut entries {
            entry.image = None;
        }
        Ok(entries)
    }

    fn merge_inbound(local: &Self::Value, inbound: Self::Value) -> Self::Value {
        merge_entries(local, inbound)
    }
}

macro_rules! plain_collection {
    ( $( $marker:ty => $kind:ident, $field:ident, $value:ty; )+ ) => {
        $(
            impl Collection for $marker {
                type Value = $value;
                const KIND: CollectionKind = CollectionKind::$kind;

                fn get(data: &FamilyData) -> &Self::Value {
                    &data.$field
                }

                fn get_mut(data: &mut FamilyData) -> &mut Self::Value {
                    &mut data.$field
                }
            }
        )+
    };
}

plain_collection! {
    CheckupLogsCollection => CheckupLogs, checkup_logs, CheckupLogs;
    DismissedCheckupsCollection => DismissedCheckups, dismissed_checkups, DismissedCheckups;
    Allergies => Allergies, allergies, ByMember<Allergy>;
    GrowthRecords => GrowthRecords, growth_records, ByMember<GrowthRecord>;
    Medications => Medications, medications, ByMember<Medication>;
    PeriodRecords => PeriodRecords, period_records, ByMember<PeriodRecord>;
}

/// Ordered sequence → `{id: record}` map. Order is not preserved.
pub fn to_keyed_map<T: Identified + Serialize>(records: &[T]) -> Value {
    let mut map = Map::new();
    for record in records {
        if let Ok(value) = serde_json::to_value(record) {
            map.insert(record.id().to_string(), value);
        }
    }
    Value::Object(map)
}

/// `{id: record}` map → sequence, writing each key back as the record id.
/// Sequence order is the store's key order; callers sort for display.
pub fn from_keyed_map<T: Identified + DeserializeOwned>(value: Value) -> serde_json::Result<Vec<T>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    let map: BTreeMap<String, Value> = serde_json::from_value(value)?;
    map.into_iter()
        .map(|(key, fields)| {
            let mut record: T = serde_json::from_value(fields)?;
            record.set_id(key);
            Ok(record)
        })
        .collect()
}

/// Copy of `entries` with every attachment removed.
pub fn strip_attachments(entries: &[HealthEntry]) -> Vec<HealthEntry> {
    entries
        .iter()
        .map(|entry| HealthEntry {
            image: None,
            ..entry.clone()
        })
        .collect()
}

/// Take every field from `inbound` except the attachment, which is kept
/// from the local record with the same id.
pub fn merge_entries(local: &[HealthEntry], inbound: Vec<HealthEntry>) -> Vec<HealthEntry> {
    let attachments: BTreeMap<&str, &str> = local
        .iter()
        .filter_map(|entry| entry.attachment().map(|image| (entry.id.as_str(), image)))
        .collect();

    inbound
        .into_iter()
        .map(|entry| {
            let image = attachments.get(entry.id.as_str()).map(|s| s.to_string());
            HealthEntry { image, ..entry }
        })
        .collect()
}
