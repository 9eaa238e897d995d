//! Ticket records

use chrono::{DateTime, Utc};
use hubsync_common::RawRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{custom_properties, optional_string, stage_flags, string_or, timestamp};

pub const PROPERTIES: &[&str] = &[
    "subject",
    "content",
    "hs_pipeline",
    "hs_pipeline_stage",
    "hs_ticket_priority",
    "createdate",
    "hs_lastmodifieddate",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub subject: String,
    pub content: Option<String>,
    pub pipeline: Option<String>,
    pub stage: String,
    pub priority: String,
    pub is_closed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived: bool,
    pub custom_properties: BTreeMap<String, String>,
}

impl Ticket {
    pub(crate) fn from_raw(raw: &RawRecord) -> Self {
        let props = &raw.properties;
        let stage = string_or(props, "hs_pipeline_stage", "unknown");
        let (_, is_closed) = stage_flags(&stage);

        Self {
            id: raw.id.clone(),
            subject: string_or(props, "subject", "Untitled Ticket"),
            content: optional_string(props, "content"),
            pipeline: optional_string(props, "hs_pipeline"),
            stage,
            priority: string_or(props, "hs_ticket_priority", "unknown"),
            is_closed,
            created_at: timestamp(props, "createdate").unwrap_or(raw.created_at),
            updated_at: timestamp(props, "hs_lastmodifieddate").unwrap_or(raw.updated_at),
            archived: raw.archived,
            custom_properties: custom_properties(props, PROPERTIES),
        }
    }
}
