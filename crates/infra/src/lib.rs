//! `jobping-infra` — infrastructure adapters for the matching pipeline.
//!
//! **Responsibility:** everything that talks to the outside world.
//!
//! - `store`: job/user/match/notification persistence (Postgres, in-memory)
//! - `queue`: Redis Streams queue transport (feature `redis`)
//! - `notify`: outbound notification sinks
//! - `workers`: the queue consumer engine
//! - `config`: environment-driven settings

pub mod config;
pub mod notify;
pub mod queue;
pub mod store;
pub mod workers;
