use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Member id → records for that member.
pub type ByMember<T> = BTreeMap<String, Vec<T>>;
/// Member id → checkup id → completion timestamp (ISO8601).
pub type CheckupLogs = BTreeMap<String, BTreeMap<String, String>>;
/// Member id → dismissed checkup ids.
pub type DismissedCheckups = BTreeMap<String, Vec<String>>;

/// Anything that carries a client-generated id.
pub trait Identified {
    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);

    /// Give the record a fresh id if it has none. An empty key cannot be
    /// stored remotely.
    fn ensure_id(&mut self) {
        if self.id().is_empty() {
            self.set_id(new_id());
        }
    }
}

macro_rules! identified {
    ( $( $ty:ty ),+ $(,)? ) => {
        $(
            impl Identified for $ty {
                fn id(&self) -> &str {
                    &self.id
                }

                fn set_id(&mut self, id: String) {
                    self.id = id;
                }
            }
        )+
    };
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Member {
    pub id: String,
    pub name: String,
    #[serde(deserialize_with = "wire::number", serialize_with = "wire::serialize_number")]
    pub age: f64,
    pub gender: String,
    pub role: String,
    pub known_issues: String,
    /// Fields this version does not model, kept so a write-back never drops them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthEntry {
    pub id: String,
    pub member_id: String,
    pub date: String,
    pub body_location: String,
    /// Data-URL photo. Lives only on the device that captured it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub duration: String,
    pub description: String,
    pub what_was_done: String,
    pub follow_up: bool,
    pub follow_up_date: String,
    /// Fields this version does not model, kept so a write-back never drops them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HealthEntry {
    /// The attachment, treating an empty string as absent.
    pub fn attachment(&self) -> Option<&str> {
        self.image.as_deref().filter(|image| !image.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Allergy {
    pub id: String,
    pub allergen: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: String,
    pub reaction: String,
    /// Fields this version does not model, kept so a write-back never drops them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementUnit {
    #[default]
    Metric,
    Imperial,
}

/// Stored in centimetres and kilograms; `unit` is only a display preference.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GrowthRecord {
    pub id: String,
    pub date: String,
    #[serde(deserialize_with = "wire::number", serialize_with = "wire::serialize_number")]
    pub height: f64,
    #[serde(deserialize_with = "wire::number", serialize_with = "wire::serialize_number")]
    pub weight: f64,
    pub unit: MeasurementUnit,
    /// Fields this version does not model, kept so a write-back never drops them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Medication {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub dosage: String,
    pub frequency: String,
    pub notes: String,
    /// Fields this version does not model, kept so a write-back never drops them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PeriodRecord {
    Period(PeriodLog),
    Ovulation(OvulationLog),
    Settings(CycleSettings),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeriodLog {
    pub id: String,
    pub start_date: String,
    pub end_date: String,
    pub flow: String,
    pub symptoms: String,
    pub notes: String,
    /// Fields this version does not model, kept so a write-back never drops them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OvulationLog {
    pub id: String,
    pub date: String,
    pub notes: String,
    /// Fields this version does not model, kept so a write-back never drops them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CycleSettings {
    pub id: String,
    #[serde(deserialize_with = "wire::whole_number")]
    pub custom_cycle_length: u32,
    /// Fields this version does not model, kept so a write-back never drops them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CycleSettings {
    pub const MIN_CYCLE_LENGTH: u32 = 20;
    pub const MAX_CYCLE_LENGTH: u32 = 45;

    pub fn is_valid(&self) -> bool {
        (Self::MIN_CYCLE_LENGTH..=Self::MAX_CYCLE_LENGTH).contains(&self.custom_cycle_length)
    }
}

impl Identified for PeriodRecord {
    fn id(&self) -> &str {
        match self {
            PeriodRecord::Period(p) => &p.id,
            PeriodRecord::Ovulation(o) => &o.id,
            PeriodRecord::Settings(s) => &s.id,
        }
    }

    fn set_id(&mut self, id: String) {
        match self {
            PeriodRecord::Period(p) => p.id = id,
            PeriodRecord::Ovulation(o) => o.id = id,
            PeriodRecord::Settings(s) => s.id = id,
        }
    }
}

identified!(Member, HealthEntry, Allergy, GrowthRecord, Medication);

/// Numeric fields as other clients write them: integers, decimals, numeric
/// strings, or nothing at all.
mod wire {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    /// Largest integer an `f64` holds exactly.
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;

    pub fn number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(0.0),
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| D::Error::custom(format!("number {n} out of range"))),
            Value::String(s) if s.trim().is_empty() => Ok(0.0),
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| D::Error::custom(format!("expected a number, found {s:?}"))),
            other => Err(D::Error::custom(format!("expected a number, found {other}"))),
        }
    }

    pub fn whole_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        let n = number(deserializer)?;
        if n.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&n) {
            Ok(n as u32)
        } else {
            Err(D::Error::custom(format!("expected a whole number, found {n}")))
        }
    }

    /// Whole values go out as integers so `34` stays `34` on the wire.
    pub fn serialize_number<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.fract() == 0.0 && value.abs() < MAX_EXACT {
            serializer.serialize_i64(*value as i64)
        } else {
            serializer.serialize_f64(*value)
        }
    }
}

/// In-memory value of every replicated collection for one device.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyData {
    pub members: Vec<Member>,
    pub entries: Vec<HealthEntry>,
    pub checkup_logs: CheckupLogs,
    pub dismissed_checkups: DismissedCheckups,
    pub allergies: ByMember<Allergy>,
    pub growth_records: ByMember<GrowthRecord>,
    pub medications: ByMember<Medication>,
    pub period_records: ByMember<PeriodRecord>,
}

/// Fresh record id. Time-ordered, so the greatest id is the newest record.
pub fn new_id() -> String {
    uuid::Uuid::now_v7().as_simple().to_string()
}

/// Records for `member_id`, or an empty slice when the member has none.
pub fn for_member<'a, T>(map: &'a ByMember<T>, member_id: &str) -> &'a [T] {
    map.get(member_id).map(Vec::as_slice).unwrap_or(&[])
}
