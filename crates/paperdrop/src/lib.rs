//! Paperdrop: watch a drop folder, extract document text, and reliably
//! deliver both the original bytes and the extracted content to a blob
//! store and an ingestion API.
//!
//! The durable pieces live in `paperdrop_db`; this crate wires the
//! watch-and-admit pipeline and the retry worker loop around that store.

pub mod config;
pub mod jobs;
pub mod watcher;
pub mod worker;

pub use config::Config;
pub use jobs::JobPayload;
pub use watcher::WatchPipeline;
pub use worker::Worker;
