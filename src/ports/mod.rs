//! The four ports the core engines depend on (spec §6), each with a
//! production adapter elsewhere in the crate and an in-memory fake in its
//! `#[cfg(test)]` module for engine unit tests — the same split the teacher
//! draws between `backend::Pool` and its test doubles.

mod definition_repository;
mod durable_queue;
mod list_backend;
mod source_db;

pub use definition_repository::{CdcBinding, DefinitionRepository};
pub use durable_queue::{DurableQueue, QueueMessage};
pub use list_backend::{DeltaItem, DeltaReason, ListBackend};
pub use source_db::SourceDB;
