//! Engagement records (calls, emails, meetings, notes, tasks)
//!
//! Each engagement type names its title and body differently; the first
//! present property in the type's list wins.

use chrono::{DateTime, Utc};
use hubsync_common::RawRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{custom_properties, optional_string, timestamp};

pub const PROPERTIES: &[&str] = &[
    "hs_timestamp",
    "hubspot_owner_id",
    "hs_createdate",
    "hs_lastmodifieddate",
    "hs_call_title",
    "hs_call_body",
    "hs_email_subject",
    "hs_email_text",
    "hs_meeting_title",
    "hs_meeting_body",
    "hs_note_body",
    "hs_task_subject",
    "hs_task_body",
];

fn title_properties(object_type: &str) -> &'static [&'static str] {
    match object_type {
        "calls" => &["hs_call_title"],
        "emails" => &["hs_email_subject"],
        "meetings" => &["hs_meeting_title"],
        "tasks" => &["hs_task_subject"],
        _ => &[],
    }
}

fn body_properties(object_type: &str) -> &'static [&'static str] {
    match object_type {
        "calls" => &["hs_call_body"],
        "emails" => &["hs_email_text"],
        "meetings" => &["hs_meeting_body"],
        "notes" => &["hs_note_body"],
        "tasks" => &["hs_task_body"],
        _ => &["hs_note_body", "hs_call_body", "hs_email_text", "hs_meeting_body", "hs_task_body"],
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    pub id: String,
    /// `calls`, `emails`, ... or "unknown" when the record was not tagged
    pub object_type: String,
    pub title: String,
    pub body: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived: bool,
    pub custom_properties: BTreeMap<String, String>,
}

impl Engagement {
    pub(crate) fn from_raw(raw: &RawRecord) -> Self {
        let props = &raw.properties;
        let object_type = raw.object_type.as_deref().unwrap_or("unknown");
        let first_present = |keys: &[&str]| keys.iter().find_map(|k| props.get(k)).map(str::to_string);

        Self {
            id: raw.id.clone(),
            object_type: object_type.to_string(),
            title: first_present(title_properties(object_type)).unwrap_or_else(|| "Untitled".to_string()),
            body: first_present(body_properties(object_type)),
            occurred_at: timestamp(props, "hs_timestamp").unwrap_or(raw.created_at),
            owner_id: optional_string(props, "hubspot_owner_id"),
            created_at: timestamp(props, "hs_createdate").unwrap_or(raw.created_at),
            updated_at: timestamp(props, "hs_lastmodifieddate").unwrap_or(raw.updated_at),
            archived: raw.archived,
            custom_properties: custom_properties(props, PROPERTIES),
        }
    }
}
