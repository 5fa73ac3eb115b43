//! Manifest Engine
//!
//! Decodes multi-document Kubernetes manifests into generic objects and
//! applies them with create/update/delete semantics.

pub mod apply;
pub mod fetch;
pub mod parser;

pub use apply::{apply_locations, apply_manifests, ROLE_BINDING_DEFAULT_NAMESPACE};
pub use fetch::HttpFetcher;
pub use parser::{parse_manifests, GenericResource};
