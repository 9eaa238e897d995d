//! Record normalizer
//!
//! Turns a loosely-typed [`RawRecord`] into a typed record for its object
//! kind. Normalization is pure and total for everything except a missing id:
//!
//! - string fields fall back to a fixed default when absent or blank
//! - numeric fields fall back to `0` when absent or unparseable
//! - date fields fall back to the record's own `createdAt` / `updatedAt`
//! - won/closed flags are substring matches on the stage, not a stage table
//! - properties outside the kind's standard set are kept verbatim in
//!   `custom_properties`
//!
//! Output only depends on the input record, so normalizing the same record
//! twice serializes to identical bytes.

pub mod company;
pub mod contact;
pub mod deal;
pub mod engagement;
pub mod ticket;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use hubsync_common::{ObjectKind, PropertyMap, RawRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::NormalizationError;

pub use company::Company;
pub use contact::Contact;
pub use deal::Deal;
pub use engagement::Engagement;
pub use ticket::Ticket;

/// Typed record derived from exactly one raw record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedRecord {
    Contact(Contact),
    Company(Company),
    Deal(Deal),
    Ticket(Ticket),
    Engagement(Engagement),
}

impl NormalizedRecord {
    pub fn id(&self) -> &str {
        match self {
            NormalizedRecord::Contact(r) => &r.id,
            NormalizedRecord::Company(r) => &r.id,
            NormalizedRecord::Deal(r) => &r.id,
            NormalizedRecord::Ticket(r) => &r.id,
            NormalizedRecord::Engagement(r) => &r.id,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            NormalizedRecord::Contact(_) => ObjectKind::Contacts,
            NormalizedRecord::Company(_) => ObjectKind::Companies,
            NormalizedRecord::Deal(_) => ObjectKind::Deals,
            NormalizedRecord::Ticket(_) => ObjectKind::Tickets,
            NormalizedRecord::Engagement(_) => ObjectKind::Engagements,
        }
    }
}

/// Normalize a raw record of the given kind
pub fn normalize(kind: ObjectKind, raw: &RawRecord) -> Result<NormalizedRecord, NormalizationError> {
    if !raw.has_id() {
        return Err(NormalizationError::MissingId);
    }

    Ok(match kind {
        ObjectKind::Contacts => NormalizedRecord::Contact(Contact::from_raw(raw)),
        ObjectKind::Companies => NormalizedRecord::Company(Company::from_raw(raw)),
        ObjectKind::Deals => NormalizedRecord::Deal(Deal::from_raw(raw)),
        ObjectKind::Tickets => NormalizedRecord::Ticket(Ticket::from_raw(raw)),
        ObjectKind::Engagements => NormalizedRecord::Engagement(Engagement::from_raw(raw)),
    })
}

/// Standard properties requested for a kind when the caller names none
pub fn default_properties(kind: ObjectKind) -> &'static [&'static str] {
    match kind {
        ObjectKind::Contacts => contact::PROPERTIES,
        ObjectKind::Companies => company::PROPERTIES,
        ObjectKind::Deals => deal::PROPERTIES,
        ObjectKind::Tickets => ticket::PROPERTIES,
        ObjectKind::Engagements => engagement::PROPERTIES,
    }
}

// ============================================================================
// Field Extraction
// ============================================================================

pub(crate) fn string_or(props: &PropertyMap, key: &str, default: &str) -> String {
    props.get(key).unwrap_or(default).to_string()
}

pub(crate) fn optional_string(props: &PropertyMap, key: &str) -> Option<String> {
    props.get(key).map(str::to_string)
}

/// Parse a float; absent, unparseable and non-finite values are `0`
pub(crate) fn number(props: &PropertyMap, key: &str) -> f64 {
    props
        .get(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

pub(crate) fn timestamp(props: &PropertyMap, key: &str) -> Option<DateTime<Utc>> {
    props.get(key).and_then(parse_timestamp)
}

/// RFC 3339, epoch milliseconds, or a bare `YYYY-MM-DD` date (midnight UTC)
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(millis) = value.parse::<i64>() {
        return Utc.timestamp_millis_opt(millis).single();
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Won/closed flags from a stage label.
///
/// Case-insensitive substring matches: "won" means won, and a stage is closed
/// when it is won or mentions "lost" or "closed".
pub fn stage_flags(stage: &str) -> (bool, bool) {
    let stage = stage.to_lowercase();
    let is_won = stage.contains("won");
    let is_closed = is_won || stage.contains("lost") || stage.contains("closed");
    (is_won, is_closed)
}

/// Whole days between two instants, rounded up, order-independent
pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let seconds = (to - from).num_seconds().abs();
    (seconds + 86_399) / 86_400
}

/// Present properties outside `known`
pub(crate) fn custom_properties(props: &PropertyMap, known: &[&str]) -> BTreeMap<String, String> {
    props
        .iter_present()
        .filter(|(k, _)| !known.contains(k))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_missing_id_is_rejected_for_every_kind() {
        let raw = RawRecord::new("  ", Utc::now(), Utc::now()).with_property("dealname", "Big");
        for kind in ObjectKind::ALL {
            assert_eq!(normalize(kind, &raw), Err(NormalizationError::MissingId));
        }
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = ts("2024-03-01T12:00:00Z");
        assert_eq!(parse_timestamp("2024-03-01T12:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T12:00:00.000+00:00"), Some(expected));
        assert_eq!(parse_timestamp("1709294400000"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01"), Some(ts("2024-03-01T00:00:00Z")));
        assert_eq!(parse_timestamp("next tuesday"), None);
    }

    #[test]
    fn test_stage_flags() {
        assert_eq!(stage_flags("closedwon"), (true, true));
        assert_eq!(stage_flags("Contract WON"), (true, true));
        assert_eq!(stage_flags("closedlost"), (false, true));
        assert_eq!(stage_flags("Lost to competitor"), (false, true));
        assert_eq!(stage_flags("appointmentscheduled"), (false, false));
    }

    #[test]
    fn test_days_between_rounds_up_and_ignores_order() {
        let a = ts("2024-01-01T00:00:00Z");
        let b = ts("2024-01-03T01:00:00Z");
        assert_eq!(days_between(a, b), 3);
        assert_eq!(days_between(b, a), 3);
        assert_eq!(days_between(a, a), 0);
    }

    #[test]
    fn test_number_falls_back_to_zero() {
        let props: PropertyMap = vec![
            ("a", Some("12.5".to_string())),
            ("b", Some("n/a".to_string())),
            ("c", None),
            ("d", Some("NaN".to_string())),
        ]
        .into_iter()
        .collect();

        assert_eq!(number(&props, "a"), 12.5);
        assert_eq!(number(&props, "b"), 0.0);
        assert_eq!(number(&props, "c"), 0.0);
        assert_eq!(number(&props, "d"), 0.0);
        assert_eq!(number(&props, "missing"), 0.0);
    }

    #[test]
    fn test_normalizing_twice_is_byte_equal() {
        let raw = RawRecord::new("42", ts("2024-01-01T00:00:00Z"), ts("2024-02-01T00:00:00Z"))
            .with_property("dealname", "Renewal")
            .with_property("amount", "1000")
            .with_property("dealstage", "closedwon")
            .with_property("closedate", "2024-01-10T00:00:00Z")
            .with_property("x_custom", "kept");

        for kind in ObjectKind::ALL {
            let first = serde_json::to_vec(&normalize(kind, &raw).unwrap()).unwrap();
            let second = serde_json::to_vec(&normalize(kind, &raw).unwrap()).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_kind_and_id_accessors() {
        let raw = RawRecord::new("7", Utc::now(), Utc::now());
        let record = normalize(ObjectKind::Tickets, &raw).unwrap();
        assert_eq!(record.kind(), ObjectKind::Tickets);
        assert_eq!(record.id(), "7");
    }
}
