//! vSphere Drivers Operator
//!
//! A Kubernetes operator that configures the vSphere cloud provider (CPI)
//! and storage (CSI) drivers from two custom resources.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐      ┌──────────────────────────────┐
//! │  VsphereCloudConfig          │      │  VDOConfig                   │
//! │  Reconciler                  │      │  Reconciler                  │
//! │  (verify vCenter login)      │      │  ┌────────────┐ ┌──────────┐ │
//! └──────────────┬───────────────┘      │  │ CPI        │ │ CSI      │ │
//!                │                      │  │ pipeline   │ │ pipeline │ │
//!       ┌────────┴────────┐             │  └─────┬──────┘ └────┬─────┘ │
//!       │  Session Cache  │◄────────────┤        │             │       │
//!       └─────────────────┘             └────────┼─────────────┼───────┘
//!                                                │             │
//!          ┌───────────────────┬─────────────────┴──┬──────────┴────────┐
//!          │  Driver Config    │  Manifest Engine   │  Version Matrix   │
//!          │  Builders         │                    │  Resolver         │
//!          └───────────────────┴────────────────────┴───────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`crd`]: Custom Resource Definitions
//! - [`controller`]: Reconcilers and controller wiring
//! - [`session`]: vCenter session cache and REST connector
//! - [`drivers`]: CPI and CSI configuration builders
//! - [`manifest`]: Manifest decoding and application
//! - [`matrix`]: Compatibility matrix resolution
//! - [`store`]: Kubernetes and in-memory cluster stores
//! - [`domain`]: Ports connecting the reconcilers to the outside world
//! - [`error`]: Error types and handling

pub mod config;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod drivers;
pub mod error;
pub mod manifest;
pub mod matrix;
pub mod metrics;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use config::{OperatorConfig, DEFAULT_NAMESPACE};

pub use controller::{live_context, reconcile_once, run_controllers, Context};

pub use crd::{
    CPIStatus, CSIStatus, ConfigStatus, NodeStatus, VDOConfig, VDOConfigSpec, VDOConfigStatus,
    VDOPhase, VsphereCloudConfig, VsphereCloudConfigSpec, VsphereCloudConfigStatus,
};

pub use domain::ports::{
    ApplyAction, ClusterStore, ManifestFetcher, ResourceApplier, VcenterClient, VcenterConnector,
};

pub use error::{Error, ErrorAction, Result};

pub use metrics::Metrics;

pub use session::{RestConnector, SessionCache};

pub use store::{KubeStore, MemoryStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
