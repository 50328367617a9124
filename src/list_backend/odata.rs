//! Wire shapes for the list backend's delta query (spec §6: "Wire contracts
//! with the list backend"): `value[]`, optional `@odata.nextLink`, terminal
//! `@odata.deltaLink`; `reason: deleted` marks a deletion.

use serde::Deserialize;
use serde_json::Value as Json;

use crate::model::Row;
use crate::ports::{DeltaItem, DeltaReason};

#[derive(Debug, Deserialize)]
pub(super) struct DeltaPage {
    #[serde(default, rename = "value")]
    pub value: Vec<DeltaRow>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink")]
    pub delta_link: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct DeltaRow {
    pub id: i64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub fields: serde_json::Map<String, Json>,
}

impl DeltaRow {
    pub(super) fn into_item(self) -> DeltaItem {
        let reason = match self.reason.as_deref() {
            Some("deleted") => DeltaReason::Deleted,
            _ => DeltaReason::Changed,
        };
        let mut fields = Row::new();
        for (k, v) in self.fields {
            fields.insert(k, json_to_value(v));
        }
        DeltaItem {
            id: self.id,
            reason,
            fields,
        }
    }
}

fn json_to_value(v: Json) -> crate::model::Value {
    use crate::model::Value;
    match v {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Boolean(b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else {
                Value::Text(n.to_string())
            }
        }
        Json::String(s) => Value::Text(s),
        other => Value::Text(other.to_string()),
    }
}

/// Extracts the delta-token query parameter out of a next/delta link so the
/// caller only ever has to carry around an opaque token, not a URL.
pub(super) fn extract_token(link: &str) -> Option<String> {
    url::Url::parse(link)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == "$deltatoken" || k == "$skiptoken")
        .map(|(_, v)| v.into_owned())
}
