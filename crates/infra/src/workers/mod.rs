//! Background workers.
//!
//! `queue_consumer` is the generic engine every pipeline stage runs on.

pub mod queue_consumer;

pub use queue_consumer::{
    BatchError, ConsumerConfig, ConsumerHandle, CycleReport, FailureScope, MessageHandler,
    QueueConsumer, Retryable, process_batch,
};
