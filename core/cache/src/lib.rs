//! Request caching for SnipMaster.
//!
//! Every outbound request is classified and answered with one of three
//! strategies (cache-first, network-first, stale-while-revalidate) against
//! three named caches that carry a version tag. Installing a new version
//! fetches the app shell; activating it deletes caches of older versions.

pub mod classify;
pub mod config;
pub mod fetch;
pub mod request;
pub mod router;
pub mod store;

#[cfg(test)]
mod testing;

pub use classify::{classify, Strategy};
pub use config::CacheConfig;
pub use fetch::{Fetcher, HttpFetcher};
pub use request::{CacheRequest, CachedResponse, RequestMode, ResponseKind};
pub use router::{CacheRouter, WorkerState};
pub use store::{CacheStorage, MemoryCacheStorage, SqliteCacheStorage};
