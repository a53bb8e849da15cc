//! MCP Operator - reconciles MCPServer resources into running Kubernetes workloads
//!
//! An MCPServer declares a process that speaks the Model Context Protocol over
//! stdio or HTTP. The operator turns that declaration into a ServiceAccount,
//! ConfigMap, Deployment and Service, and reports progress through four
//! chained conditions: `Accepted → ResolvedRefs → Programmed → Ready`.
//!
//! # Pipeline
//!
//! Every reconcile pass runs the same deterministic pipeline:
//!
//! 1. [`normalizer`] fills defaults and rejects invalid field combinations
//! 2. [`resolver`] checks that referenced Secrets, ConfigMaps and the image exist
//! 3. [`transport`] picks the pod topology for stdio or HTTP
//! 4. [`compiler`] renders the desired child manifests (no cluster I/O)
//! 5. [`controller`] diffs desired against observed children and applies changes
//! 6. [`conditions`] folds the outcomes into the status condition set
//!
//! # Modules
//!
//! - [`crd`] - MCPServer Custom Resource Definition
//! - [`ownership`] - Owner references and ownership checks for child resources
//! - [`retry`] - Bounded exponential backoff for transient API failures
//! - [`config`] - Operator configuration
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod compiler;
pub mod conditions;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod normalizer;
pub mod ownership;
pub mod resolver;
pub mod retry;
pub mod transport;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// These constants define the default values used throughout the operator.
// CRD defaults, rendered manifests and test fixtures all read from here.

/// Default port the MCP server listens on when `deployment.port` is unset
pub const DEFAULT_PORT: u16 = 3000;

/// Default replica count when `deployment.replicas` is unset
pub const DEFAULT_REPLICAS: i32 = 1;

/// Default client connection timeout propagated to remote server configuration
///
/// Stdio servers are spawned per session, and interpreter-based servers
/// (uvx, npx) can take several seconds to start.
pub const DEFAULT_TIMEOUT: &str = "30s";

/// Default HTTP path MCP is served on
pub const DEFAULT_MCP_PATH: &str = "/mcp";

/// Field manager name used for server-side apply
pub const FIELD_MANAGER: &str = "mcp-operator";

/// Image that carries the stdio transport adapter binary
pub const DEFAULT_TRANSPORT_ADAPTER_IMAGE: &str = "ghcr.io/kagent-dev/mcp-gateway:latest";
