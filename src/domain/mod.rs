//! Domain layer
//!
//! Ports connecting the reconcilers to the Kubernetes API, vCenter and
//! manifest hosts.

pub mod ports;

pub use ports::*;
