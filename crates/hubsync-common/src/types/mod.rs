//! Domain types shared by every hubsync component
//!
//! These types describe CRM data exactly as the remote API hands it out:
//! a record identity, a loose bag of string properties and a handful of
//! bookkeeping timestamps. Typed, derived representations live in the
//! ingest crate's normalizer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::HubsyncError;

// ============================================================================
// Object Kinds
// ============================================================================

/// HubSpot object types that together make up the "engagements" kind.
///
/// Streams over engagements walk these in order.
pub const ENGAGEMENT_OBJECT_TYPES: [&str; 5] = ["calls", "emails", "meetings", "notes", "tasks"];

/// CRM object kinds supported by the connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Contacts,
    Companies,
    Deals,
    Tickets,
    Engagements,
}

impl ObjectKind {
    /// Every kind, in the order a full sync processes them
    pub const ALL: [ObjectKind; 5] = [
        ObjectKind::Contacts,
        ObjectKind::Companies,
        ObjectKind::Deals,
        ObjectKind::Tickets,
        ObjectKind::Engagements,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Contacts => "contacts",
            ObjectKind::Companies => "companies",
            ObjectKind::Deals => "deals",
            ObjectKind::Tickets => "tickets",
            ObjectKind::Engagements => "engagements",
        }
    }

    /// Remote object types queried to produce this kind
    pub fn api_object_types(&self) -> &'static [&'static str] {
        match self {
            ObjectKind::Contacts => &["contacts"],
            ObjectKind::Companies => &["companies"],
            ObjectKind::Deals => &["deals"],
            ObjectKind::Tickets => &["tickets"],
            ObjectKind::Engagements => &ENGAGEMENT_OBJECT_TYPES,
        }
    }

    /// Name of the raw storage table for this kind
    pub fn table_name(&self) -> &'static str {
        match self {
            ObjectKind::Contacts => "hubspot_contacts",
            ObjectKind::Companies => "hubspot_companies",
            ObjectKind::Deals => "hubspot_deals",
            ObjectKind::Tickets => "hubspot_tickets",
            ObjectKind::Engagements => "hubspot_engagements",
        }
    }

    /// Engagement records are identified by `(id, object_type)` rather than `id`
    pub fn is_engagement(&self) -> bool {
        matches!(self, ObjectKind::Engagements)
    }
}

impl std::str::FromStr for ObjectKind {
    type Err = HubsyncError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "contacts" | "contact" => Ok(ObjectKind::Contacts),
            "companies" | "company" => Ok(ObjectKind::Companies),
            "deals" | "deal" => Ok(ObjectKind::Deals),
            "tickets" | "ticket" => Ok(ObjectKind::Tickets),
            "engagements" | "engagement" => Ok(ObjectKind::Engagements),
            other => Err(HubsyncError::parse(format!("Unknown object kind: {}", other))),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Property Bag
// ============================================================================

/// Ordered mapping of property name to optional string value.
///
/// Absent keys, `null` values and empty strings all mean "no value": lookups
/// return `None` for each of them and [`PropertyMap::compacted`] drops them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PropertyMap(BTreeMap<String, Option<String>>);

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Option<String>) {
        self.0.insert(key.into(), value);
    }

    /// Present, non-empty value for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(|v| v.as_deref())
            .filter(|v| !is_blank(v))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Iterate over entries that carry a value
    pub fn iter_present(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().filter_map(|(k, v)| match v.as_deref() {
            Some(value) if !is_blank(value) => Some((k.as_str(), value)),
            _ => None,
        })
    }

    /// Copy of the present values only, safe to forward downstream
    pub fn compacted(&self) -> BTreeMap<String, String> {
        self.iter_present()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Number of keys, including those without a value
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Option<String>)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (K, Option<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl<'de> Deserialize<'de> for PropertyMap {
    /// Accepts strings and nulls; scalars are coerced to their string form and
    /// structured values are kept as compact JSON text.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Option<BTreeMap<String, serde_json::Value>> = Option::deserialize(deserializer)?;
        let map = raw
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => Some(s),
                    serde_json::Value::Bool(b) => Some(b.to_string()),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    structured => Some(structured.to_string()),
                };
                (key, value)
            })
            .collect();
        Ok(Self(map))
    }
}

// ============================================================================
// Raw Records
// ============================================================================

/// Identity of a record at the ingestion boundary
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordKey {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.object_type {
            Some(object_type) => write!(f, "{}:{}", object_type, self.id),
            None => f.write_str(&self.id),
        }
    }
}

/// Unmodified object fetched from the CRM API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    /// Remote identifier; empty when the API omitted it or sent `null`.
    /// Numeric ids are kept in their decimal form.
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    /// Engagement object type (`calls`, `emails`, ...); `None` for other kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(default)]
    pub properties: PropertyMap,
    /// The Unix epoch when the API omitted it or sent an unreadable value;
    /// see [`RawRecord::missing_timestamps`]
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: DateTime<Utc>,
    /// Same fallback as `created_at`
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub archived: bool,
}

// Record fields decode leniently: a malformed value reads as absent instead
// of failing the whole page.

fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let parsed = match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        serde_json::Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    };
    Ok(parsed.unwrap_or_default())
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    })
}

impl RawRecord {
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            object_type: None,
            properties: PropertyMap::new(),
            created_at,
            updated_at,
            archived: false,
        }
    }

    pub fn with_object_type(mut self, object_type: impl Into<String>) -> Self {
        self.object_type = Some(object_type.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key, Some(value.into()));
        self
    }

    pub fn has_id(&self) -> bool {
        !is_blank(&self.id)
    }

    /// Whether `created_at` or `updated_at` fell back to the Unix epoch
    pub fn missing_timestamps(&self) -> bool {
        let epoch = DateTime::<Utc>::default();
        self.created_at == epoch || self.updated_at == epoch
    }

    /// Boundary key, or `None` when the record has no usable id
    pub fn key(&self) -> Option<RecordKey> {
        self.has_id().then(|| RecordKey {
            id: self.id.clone(),
            object_type: self.object_type.clone(),
        })
    }
}

// ============================================================================
// Dead Letters
// ============================================================================

/// Raw record set aside after failed normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    pub original_record: RawRecord,
    pub object_kind: ObjectKind,
    pub failure_reason: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(original_record: RawRecord, object_kind: ObjectKind, failure_reason: impl Into<String>) -> Self {
        Self {
            original_record,
            object_kind,
            failure_reason: failure_reason.into(),
            failed_at: Utc::now(),
        }
    }
}
