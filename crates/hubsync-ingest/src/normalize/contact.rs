//! Contact records

use chrono::{DateTime, Utc};
use hubsync_common::RawRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{custom_properties, optional_string, string_or, timestamp};

pub const PROPERTIES: &[&str] = &[
    "email",
    "firstname",
    "lastname",
    "phone",
    "company",
    "jobtitle",
    "lifecyclestage",
    "createdate",
    "lastmodifieddate",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// First and last name joined, "Unknown" when both are missing
    pub full_name: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub lifecycle_stage: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived: bool,
    pub custom_properties: BTreeMap<String, String>,
}

impl Contact {
    pub(crate) fn from_raw(raw: &RawRecord) -> Self {
        let props = &raw.properties;
        let first_name = optional_string(props, "firstname");
        let last_name = optional_string(props, "lastname");
        let full_name = [first_name.as_deref(), last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            id: raw.id.clone(),
            email: optional_string(props, "email"),
            full_name: if full_name.is_empty() {
                "Unknown".to_string()
            } else {
                full_name
            },
            first_name,
            last_name,
            phone: optional_string(props, "phone"),
            company: optional_string(props, "company"),
            job_title: optional_string(props, "jobtitle"),
            lifecycle_stage: string_or(props, "lifecyclestage", "unknown"),
            created_at: timestamp(props, "createdate").unwrap_or(raw.created_at),
            updated_at: timestamp(props, "lastmodifieddate").unwrap_or(raw.updated_at),
            archived: raw.archived,
            custom_properties: custom_properties(props, PROPERTIES),
        }
    }
}
