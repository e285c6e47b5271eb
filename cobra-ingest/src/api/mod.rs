//! HTTP API handlers for cobra-ingest
//!
//! Retrieval queries, index control, health and an SSE feed of ingest events.

pub mod health;
pub mod index;
pub mod search;
pub mod sse;

pub use health::health_routes;
pub use index::index_routes;
pub use search::search_routes;
pub use sse::event_stream;
