//! Sharding policy shape (spec §4.2): a list of `{if, target_list_id}` rules
//! plus a default, grounded on
//! `examples/original_source/backend/app/services/sharding.py`'s `policy`
//! dict shape.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardRule {
    #[serde(rename = "if")]
    pub predicate: String,
    pub target_list_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardingPolicy {
    #[serde(default)]
    pub rules: Vec<ShardRule>,
    pub default_target_list_id: Option<Uuid>,
}
