//! Cluster Store
//!
//! The controllers read and write cluster resources only through
//! [`ResourceStore`]: get, list, create, replace (metadata and spec),
//! replace_status and delete. Writes carry the resource version of the
//! object they were computed from, so a stale read surfaces as
//! [`StoreError::Conflict`] instead of overwriting a newer write.
//!
//! - [`KubeStore`] talks to the API server through `kube::Api`.
//! - `MemoryStore` (feature `test-util`) keeps objects in memory and mirrors
//!   the API server's finalizer and deletion-timestamp behavior.

pub mod error;
pub mod kube_store;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(feature = "test-util")]
pub mod memory;

pub use error::StoreError;
pub use kube_store::KubeStore;
pub use store_trait::{ResourceStore, object_key};
#[cfg(feature = "test-util")]
pub use memory::MemoryStore;
