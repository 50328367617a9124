//! Sharding evaluator (spec §4.2, C2): routes a row to a target list id
//! using a small predicate DSL. Pure and deterministic — no I/O, no side
//! effects — grounded on
//! `examples/original_source/backend/app/services/sharding.py::ShardingEvaluator`.

mod predicate;
mod policy;

pub use policy::{ShardRule, ShardingPolicy};

use uuid::Uuid;

use crate::model::Row;

/// Evaluate a policy against a row. First matching rule wins; falls through
/// to the policy default (which may itself be absent, spec §4.2).
pub fn evaluate(policy: &ShardingPolicy, row: &Row) -> Option<Uuid> {
    for rule in &policy.rules {
        if predicate::eval(&rule.predicate, row) {
            return Some(rule.target_list_id);
        }
    }
    policy.default_target_list_id
}
