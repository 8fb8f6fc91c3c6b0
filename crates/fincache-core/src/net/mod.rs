//! Network access for the intermediary.
//!
//! This module provides the `Fetcher` seam every component fetches through,
//! and `HttpFetcher`, the reqwest-backed implementation used in production.
//!
//! A fetch only fails on transport problems (unreachable host, timeout,
//! aborted request). Non-2xx statuses are ordinary responses.

pub mod error;
pub mod fetcher;

pub use error::FetchError;
pub use fetcher::{Fetcher, HttpFetcher};
