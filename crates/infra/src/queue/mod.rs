//! Queue transports backed by external infrastructure.
//!
//! The transport contract and the in-memory implementation live in
//! `jobping-queue`; this module adds the Redis Streams backend.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsQueue;
