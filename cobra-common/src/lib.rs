//! # Cobra Common Library
//!
//! Shared code for the Cobra feed ingestion services:
//! - Durable store schema and row models
//! - Bootstrap configuration loading
//! - Embedding text codec used by the `video_embedding` table
//! - Ingest event types (IngestEvent enum) and the EventBus

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod events;

pub use error::{Error, Result};
