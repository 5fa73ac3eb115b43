//! Reconcilers
//!
//! `vsphere_cloud_config` verifies vCenter descriptors; `vdo_config` drives
//! the CPI and CSI pipelines off the verified descriptors.

pub mod context;
pub mod cpi;
pub mod csi;
pub mod health;
pub mod nodes;
pub mod resources;
pub mod runner;
pub mod status;
pub mod vdo_config;
pub mod vsphere_cloud_config;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;

pub use context::Context;
pub use runner::{live_context, reconcile_once, run_controllers};

use crate::error::{Error, ErrorAction};
use kube::runtime::controller::Action;

/// Map an error's [`ErrorAction`] onto a controller action
pub fn requeue_action(error: &Error, ctx: &Context) -> Action {
    match error.action() {
        ErrorAction::RequeueWithBackoff => Action::requeue(ctx.config.error_requeue_interval),
        ErrorAction::RequeueAfter(delay) => Action::requeue(delay),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}
