use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use hubsync_db::contacts::models::ContactRow;

use super::models::RawContact;

pub const PROP_FIRST_NAME: &str = "firstname";
pub const PROP_LAST_NAME: &str = "lastname";
pub const PROP_EMAIL: &str = "email";
pub const PROP_BUSINESS_NAME: &str = "business_name";
pub const PROP_VAT_NUMBER: &str = "vat_number";
pub const PROP_COUNTRY: &str = "country_";
pub const PROP_NUMBER_OF_USERS: &str = "number_of_users";
pub const PROP_VENDOR: &str = "vendor";
pub const PROP_LEAD_STATUS: &str = "lead_status";
pub const PROP_CREATED_DATE: &str = "createdate";
pub const PROP_LAST_ACTIVITY_DATE: &str = "last_activity_date";

/// Properties requested from HubSpot. Must list every property read below.
pub const CONTACT_PROPERTIES: [&str; 11] = [
    PROP_FIRST_NAME,
    PROP_LAST_NAME,
    PROP_EMAIL,
    PROP_BUSINESS_NAME,
    PROP_VAT_NUMBER,
    PROP_COUNTRY,
    PROP_NUMBER_OF_USERS,
    PROP_VENDOR,
    PROP_LEAD_STATUS,
    PROP_CREATED_DATE,
    PROP_LAST_ACTIVITY_DATE,
];

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("contact record has no id")]
    MissingId,

    #[error("record #{index} of batch: {source}")]
    InBatch {
        index: usize,
        source: Box<NormalizeError>,
    },
}

/// Map a raw HubSpot contact onto a destination row.
///
/// Only a missing id fails; bad counts become 0 and bad timestamps become
/// `None`, each with a warning.
pub fn normalize(contact: &RawContact) -> Result<ContactRow, NormalizeError> {
    let hubspot_id = match contact.id.as_deref() {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err(NormalizeError::MissingId),
    };
    let props = &contact.properties;

    Ok(ContactRow {
        first_name: text(props.get(PROP_FIRST_NAME)),
        last_name: text(props.get(PROP_LAST_NAME)),
        email: text(props.get(PROP_EMAIL)),
        business_name: text(props.get(PROP_BUSINESS_NAME)),
        vat_number: text(props.get(PROP_VAT_NUMBER)),
        country: text(props.get(PROP_COUNTRY)),
        number_of_users: user_count(&hubspot_id, props.get(PROP_NUMBER_OF_USERS)),
        vendor: text(props.get(PROP_VENDOR)),
        lead_status: text(props.get(PROP_LEAD_STATUS)),
        created_date: timestamp(&hubspot_id, PROP_CREATED_DATE, props.get(PROP_CREATED_DATE)),
        last_activity_date: timestamp(
            &hubspot_id,
            PROP_LAST_ACTIVITY_DATE,
            props.get(PROP_LAST_ACTIVITY_DATE),
        ),
        hubspot_id,
    })
}

/// Normalize a whole batch, failing on the first record without an id.
pub fn normalize_all(contacts: &[RawContact]) -> Result<Vec<ContactRow>, NormalizeError> {
    contacts
        .iter()
        .enumerate()
        .map(|(index, contact)| {
            normalize(contact).map_err(|e| NormalizeError::InBatch {
                index,
                source: Box::new(e),
            })
        })
        .collect()
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Absent, empty and non-numeric values all collapse to 0, so "no users
/// reported" and "zero users" are indistinguishable downstream.
fn user_count(hubspot_id: &str, value: Option<&Value>) -> i32 {
    let parsed = match value {
        None | Some(Value::Null) => return 0,
        Some(Value::String(s)) if s.trim().is_empty() => return 0,
        Some(Value::String(s)) => parse_count(s.trim()),
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Some(_) => None,
    };

    match parsed.and_then(|n| i32::try_from(n).ok()) {
        Some(n) => n,
        None => {
            tracing::warn!(
                hubspot_id,
                value = ?value,
                "non-numeric number_of_users, defaulting to 0"
            );
            0
        }
    }
}

fn parse_count(raw: &str) -> Option<i64> {
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().and_then(integral))
}

fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

fn timestamp(hubspot_id: &str, property: &str, value: Option<&Value>) -> Option<DateTime<Utc>> {
    let parsed = match value? {
        Value::Null => return None,
        Value::String(s) if s.trim().is_empty() => return None,
        Value::String(s) => parse_timestamp(s.trim()),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    };

    if parsed.is_none() {
        tracing::warn!(
            hubspot_id,
            property,
            value = ?value,
            "unparseable timestamp, storing null"
        );
    }
    parsed
}

/// Accepts RFC 3339, naive date-times (read as UTC), plain dates and
/// epoch milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        return raw
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis);
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
