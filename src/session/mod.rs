//! vCenter sessions
//!
//! [`SessionCache`] hands out authenticated connections; [`RestConnector`]
//! creates them against the vCenter REST API.

pub mod cache;
pub mod vcenter;

pub use cache::{parse_endpoint, Session, SessionCache, SessionRequest};
pub use vcenter::{thumbprint, thumbprints_match, RestConnector};
