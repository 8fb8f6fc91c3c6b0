//! Cache Partition Manager.
//!
//! This module provides `CacheStorage`, the process-wide set of named
//! partitions, and `Partition`, a single request-key → response map.
//! Partitions can be mirrored to JSON files so that their contents outlive
//! the process; everything else in the worker is allowed to forget.
//!
//! Partition roles:
//! - static: local application shell, populated on install (cache-first)
//! - dynamic: external and runtime responses (network-first, stale-while-revalidate)

pub mod error;
pub mod partition;
pub mod storage;

pub use error::CacheError;
pub use partition::{CachedEntry, Partition};
pub use storage::{CacheStorage, MatchScope};
