//! Durable event queue (spec §6, ADDED A2): Redis Streams backing the
//! `DurableQueue` port between the CDC ingestion worker (C8, sole producer)
//! and the CDC consumer pool (C9, competing consumers via a consumer
//! group). Grounded on
//! `examples/original_source/backend/app/services/cdc_consumer.py`'s direct
//! use of `XGROUP CREATE` / `XREADGROUP` / `XACK`, translated to the `redis`
//! crate already depended on by `examples/kokizzu-readyset/benchmarks`.

mod redis_streams;

pub use redis_streams::RedisStreamQueue;
