//! Durable store access for cobra-ingest
//!
//! Schema creation lives in `cobra_common::db::init`; these modules hold the
//! queries. Every multi-statement write runs in one transaction.

pub mod channels;
pub mod embeddings;
pub mod enrichment;
pub mod pipeline_state;
pub mod search;
pub mod videos;
