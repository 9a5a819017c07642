//! HTTP API: the host-invoked deployment of the pipeline, plus job ingestion
//! and notification history.

pub mod app;
