//! Deal records

use chrono::{DateTime, Utc};
use hubsync_common::RawRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{custom_properties, days_between, number, optional_string, stage_flags, string_or, timestamp};

/// Standard deal properties; anything else lands in `custom_properties`
pub const PROPERTIES: &[&str] = &[
    "dealname",
    "amount",
    "hs_deal_stage_probability",
    "hs_forecast_amount",
    "dealstage",
    "pipeline",
    "dealtype",
    "hubspot_owner_id",
    "closedate",
    "createdate",
    "hs_lastmodifieddate",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: String,
    pub name: String,
    pub amount: f64,
    pub probability: f64,
    pub forecast_amount: f64,
    pub stage: String,
    pub pipeline: String,
    pub deal_type: Option<String>,
    pub owner_id: Option<String>,
    pub close_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_won: bool,
    pub is_closed: bool,
    /// Set only for closed deals with a close date
    pub days_to_close: Option<i64>,
    pub archived: bool,
    pub custom_properties: BTreeMap<String, String>,
}

impl Deal {
    pub(crate) fn from_raw(raw: &RawRecord) -> Self {
        let props = &raw.properties;
        let stage = string_or(props, "dealstage", "unknown");
        let (is_won, is_closed) = stage_flags(&stage);
        let created_at = timestamp(props, "createdate").unwrap_or(raw.created_at);
        let close_date = timestamp(props, "closedate");
        let days_to_close = close_date
            .filter(|_| is_closed)
            .map(|closed| days_between(created_at, closed));

        Self {
            id: raw.id.clone(),
            name: string_or(props, "dealname", "Untitled Deal"),
            amount: number(props, "amount"),
            probability: number(props, "hs_deal_stage_probability"),
            forecast_amount: number(props, "hs_forecast_amount"),
            stage,
            pipeline: string_or(props, "pipeline", "default"),
            deal_type: optional_string(props, "dealtype"),
            owner_id: optional_string(props, "hubspot_owner_id"),
            close_date,
            created_at,
            updated_at: timestamp(props, "hs_lastmodifieddate").unwrap_or(raw.updated_at),
            is_won,
            is_closed,
            days_to_close,
            archived: raw.archived,
            custom_properties: custom_properties(props, PROPERTIES),
        }
    }
}
