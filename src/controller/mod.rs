//! Controller implementation for MCPServer
//!
//! This module contains the reconciliation logic for MCPServer resources.
//! The controller follows the Kubernetes pattern of observe-diff-act: it
//! renders the desired children, compares them with what the cluster holds,
//! writes only what drifted, and reports progress through status conditions.

mod client;
mod diff;
#[cfg(test)]
mod fake;
mod mcp_server;

pub use client::{KubeClientImpl, McpServerKubeClient};
pub use diff::{is_subset, needs_update, spec_hash, with_spec_hash};
pub use mcp_server::{error_policy, reconcile, Context, ERROR_REQUEUE};
