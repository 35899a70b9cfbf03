//! marketgate library
//!
//! Resource-governed caching in front of two rate-limited upstream APIs: a
//! tiered memory/disk cache, a daily budget and a sliding-window limiter,
//! tied together by a fetch-through operation.

pub mod cache;
pub mod cli;
pub mod client;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod governor;
pub mod maintenance;
