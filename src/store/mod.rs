//! Cluster store adapters
//!
//! - [`KubeStore`]: talks to the API server through a `kube::Client`
//! - [`MemoryStore`]: in-process object tables for tests and dry runs

pub mod kubernetes;
pub mod memory;

pub use kubernetes::{KubeStore, FIELD_MANAGER};
pub use memory::{MemoryStore, ObjectKey, StoredObject, Tables};
