//! Custom Resource Definitions for the vSphere Drivers Operator
//!
//! This module contains all CRD types:
//! - VsphereCloudConfig: vCenter endpoint, credentials and datacenters
//! - VDOConfig: CPI and CSI driver configuration for the cluster

pub mod vdo_config;
pub mod vsphere_cloud_config;

pub use vdo_config::*;
pub use vsphere_cloud_config::*;

// Re-export common types for convenience
pub use std::collections::BTreeMap;
