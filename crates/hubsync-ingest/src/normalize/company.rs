//! Company records

use chrono::{DateTime, Utc};
use hubsync_common::RawRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{custom_properties, number, optional_string, string_or, timestamp};

pub const PROPERTIES: &[&str] = &[
    "name",
    "domain",
    "industry",
    "numberofemployees",
    "annualrevenue",
    "city",
    "country",
    "createdate",
    "hs_lastmodifieddate",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: String,
    pub name: String,
    pub domain: Option<String>,
    pub industry: Option<String>,
    pub employee_count: f64,
    pub annual_revenue: f64,
    pub city: Option<String>,
    pub country: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived: bool,
    pub custom_properties: BTreeMap<String, String>,
}

impl Company {
    pub(crate) fn from_raw(raw: &RawRecord) -> Self {
        let props = &raw.properties;
        Self {
            id: raw.id.clone(),
            name: string_or(props, "name", "Untitled Company"),
            domain: optional_string(props, "domain"),
            industry: optional_string(props, "industry"),
            employee_count: number(props, "numberofemployees"),
            annual_revenue: number(props, "annualrevenue"),
            city: optional_string(props, "city"),
            country: optional_string(props, "country"),
            created_at: timestamp(props, "createdate").unwrap_or(raw.created_at),
            updated_at: timestamp(props, "hs_lastmodifieddate").unwrap_or(raw.updated_at),
            archived: raw.archived,
            custom_properties: custom_properties(props, PROPERTIES),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_company_numeric_fields_never_fail() {
        let company = Company::from_raw(
            &RawRecord::new("co1", Utc::now(), Utc::now())
                .with_property("numberofemployees", "250")
                .with_property("annualrevenue", "about a million"),
        );

        assert_eq!(company.name, "Untitled Company");
        assert_eq!(company.employee_count, 250.0);
        assert_eq!(company.annual_revenue, 0.0);
    }
}
