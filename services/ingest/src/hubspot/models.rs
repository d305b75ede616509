use std::collections::HashMap;

use serde::{Deserialize, Deserializer};

/// A contact object from the HubSpot CRM v3 API (`/crm/v3/objects/contacts`).
///
/// `id` stays optional so a record without one reaches the normalizer,
/// which reports it, instead of failing the whole page decode.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawContact {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub properties: HashMap<String, serde_json::Value>,
}

/// One page of the contacts list endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactsPage {
    #[serde(default)]
    pub results: Vec<RawContact>,
    #[serde(default)]
    pub paging: Option<Paging>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub next: Option<PagingNext>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PagingNext {
    pub after: String,
}

impl ContactsPage {
    /// Continuation token for the next page; `None` ends pagination.
    pub fn next_cursor(&self) -> Option<&str> {
        self.paging
            .as_ref()
            .and_then(|p| p.next.as_ref())
            .map(|n| n.after.as_str())
            .filter(|after| !after.is_empty())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Int(u64),
    }

    Ok(match Option::<Id>::deserialize(deserializer)? {
        Some(Id::Text(s)) => Some(s),
        Some(Id::Int(n)) => Some(n.to_string()),
        None => None,
    })
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<HashMap<String, serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<HashMap<String, serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default())
}
