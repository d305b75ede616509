use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hubsync_common::error::{HubsyncError, HubsyncResult};

/// One row of the destination contacts table. `updated_at` is assigned by
/// the database on every write and is not part of the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRow {
    pub hubspot_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub business_name: Option<String>,
    pub vat_number: Option<String>,
    pub country: Option<String>,
    pub number_of_users: i32,
    pub vendor: Option<String>,
    pub lead_status: Option<String>,
    pub created_date: Option<DateTime<Utc>>,
    pub last_activity_date: Option<DateTime<Utc>>,
}

/// `i64::MAX` has 19 digits.
pub const MAX_NUMERIC_ID_DIGITS: usize = 19;

impl ContactRow {
    /// The id as an integer, if it is a plain run of at most 19 ASCII digits
    /// that fits in `i64`. Signs, whitespace and separators are rejected.
    pub fn numeric_id(&self) -> Option<i64> {
        parse_numeric_id(&self.hubspot_id)
    }
}

/// Must agree with the watermark query in `pg_repository`.
pub fn parse_numeric_id(id: &str) -> Option<i64> {
    if id.is_empty()
        || id.len() > MAX_NUMERIC_ID_DIGITS
        || !id.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    id.parse().ok()
}

/// Outcome of writing one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteSummary {
    /// Rows inserted or overwritten.
    pub affected: u64,
    /// Rows dropped before writing because their id did not exceed the watermark.
    pub skipped_by_watermark: usize,
    /// Rows whose id already existed and were left untouched.
    pub unchanged: u64,
    /// Watermark in effect for insert-if-new writes.
    pub watermark: Option<i64>,
}

/// Split a batch into the rows above `watermark`, counting the rest.
///
/// A single non-numeric id fails the whole batch.
pub fn rows_above_watermark(
    rows: &[ContactRow],
    watermark: Option<i64>,
) -> HubsyncResult<(Vec<&ContactRow>, usize)> {
    let mut kept = Vec::with_capacity(rows.len());
    let mut skipped = 0;

    for row in rows {
        let id = row.numeric_id().ok_or_else(|| {
            HubsyncError::Validation(format!(
                "insert-if-new requires numeric ids, got '{}'",
                row.hubspot_id
            ))
        })?;

        match watermark {
            Some(wm) if id <= wm => skipped += 1,
            _ => kept.push(row),
        }
    }

    Ok((kept, skipped))
}
