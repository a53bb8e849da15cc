//! Transport strategy selection
//!
//! Decides the pod topology for each transport:
//!
//! - **stdio**: the server only speaks MCP over stdin/stdout. An init
//!   container copies the transport adapter binary into a shared emptyDir,
//!   and the main container runs the adapter, which listens on the server port
//!   and spawns one server subprocess per client session (terminated when the
//!   session ends).
//! - **http**: the container already serves MCP. When TLS is configured the
//!   referenced Secret is mounted and its paths exported to the container.
//!
//! [`TransportPlan`] is a tagged variant; the renderer matches it
//! exhaustively, so a new transport fails to compile until it is handled.

use crate::conditions::Reason;
use crate::config::OperatorConfig;
use crate::crd::TransportType;
use crate::normalizer::{NormalizedSpec, Transport};
use crate::resolver::{RefError, ResolvedRefs};
use crate::DEFAULT_MCP_PATH;

/// Name of the container running the MCP server (or the adapter in front of it)
pub const MAIN_CONTAINER_NAME: &str = "mcp-server";

/// Name of the init container that installs the adapter binary
pub const ADAPTER_INIT_CONTAINER_NAME: &str = "copy-transport-adapter";

/// Shared emptyDir holding the adapter binary
pub const ADAPTER_VOLUME_NAME: &str = "transport-adapter";

/// Where the adapter volume is mounted in both containers
pub const ADAPTER_MOUNT_PATH: &str = "/transport-adapter";

/// Adapter binary location inside the adapter image
pub const ADAPTER_SOURCE_PATH: &str = "/usr/local/bin/mcp-gateway";

/// Adapter binary location inside the shared volume
pub const ADAPTER_BINARY_PATH: &str = "/transport-adapter/mcp-gateway";

/// Volume carrying the TLS Secret
pub const TLS_VOLUME_NAME: &str = "tls-certs";

/// Where the TLS Secret is mounted
pub const TLS_MOUNT_PATH: &str = "/etc/mcp/tls";

/// Certificate key in a TLS Secret
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Private key in a TLS Secret
pub const TLS_KEY_KEY: &str = "tls.key";

/// Optional CA bundle in a TLS Secret
pub const TLS_CA_KEY: &str = "ca.crt";

/// Pod topology for the selected transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportPlan {
    /// Adapter-fronted stdio server
    Stdio(StdioPlan),
    /// Directly served HTTP
    Http(HttpPlan),
}

/// Adapter injection for a stdio server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StdioPlan {
    /// Image carrying the adapter binary
    pub adapter_image: String,
    /// Command for the main container
    pub command: Vec<String>,
    /// Arguments for the main container
    pub args: Vec<String>,
    /// Port the adapter listens on
    pub listen_port: u16,
    /// Path the adapter serves MCP on
    pub path: String,
}

/// Settings for an HTTP server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpPlan {
    /// Container port serving MCP
    pub target_port: u16,
    /// Path MCP is served on
    pub path: String,
    /// TLS wiring, if configured
    pub tls: Option<TlsPlan>,
}

/// TLS wiring for the HTTP transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsPlan {
    /// Secret mounted at [`TLS_MOUNT_PATH`], if one is referenced
    pub secret_name: Option<String>,
    /// Whether the Secret carries `ca.crt`
    pub has_ca: bool,
    /// Passed through verbatim to the transport layer
    pub insecure_skip_verify: bool,
}

impl TransportPlan {
    /// Container port clients connect to
    pub fn port(&self) -> u16 {
        match self {
            Self::Stdio(plan) => plan.listen_port,
            Self::Http(plan) => plan.target_port,
        }
    }

    /// Path MCP is served on
    pub fn path(&self) -> &str {
        match self {
            Self::Stdio(plan) => &plan.path,
            Self::Http(plan) => &plan.path,
        }
    }

    /// Transport type
    pub fn kind(&self) -> TransportType {
        match self {
            Self::Stdio(_) => TransportType::Stdio,
            Self::Http(_) => TransportType::Http,
        }
    }

    /// URL scheme clients should use
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Http(HttpPlan { tls: Some(_), .. }) => "https",
            Self::Stdio(_) | Self::Http(_) => "http",
        }
    }
}

/// Build the transport plan for a normalized spec
///
/// A TLS Secret that exists but lacks `tls.crt` or `tls.key` is a reference
/// failure (`InvalidTLSSecret`).
pub fn select(
    spec: &NormalizedSpec,
    refs: &ResolvedRefs,
    config: &OperatorConfig,
) -> Result<TransportPlan, RefError> {
    match &spec.transport {
        Transport::Stdio => Ok(TransportPlan::Stdio(stdio_plan(spec, config))),
        Transport::Http(http) => {
            let tls = match &http.tls {
                None => None,
                Some(tls) => Some(TlsPlan {
                    secret_name: tls.secret_ref.clone(),
                    has_ca: tls_secret_has_ca(tls.secret_ref.as_deref(), refs)?,
                    insecure_skip_verify: tls.insecure_skip_verify,
                }),
            };
            Ok(TransportPlan::Http(HttpPlan {
                target_port: http.target_port,
                path: http.path.clone(),
                tls,
            }))
        }
    }
}

fn stdio_plan(spec: &NormalizedSpec, config: &OperatorConfig) -> StdioPlan {
    let deployment = &spec.deployment;
    let adapter_image = deployment
        .init_container
        .as_ref()
        .and_then(|c| c.image.clone())
        .filter(|i| !i.is_empty())
        .unwrap_or_else(|| config.transport_adapter_image.clone());

    let mut args = vec![
        "stdio".to_string(),
        "--listen".to_string(),
        format!("0.0.0.0:{}", spec.port),
        "--path".to_string(),
        DEFAULT_MCP_PATH.to_string(),
        "--session-timeout".to_string(),
        spec.timeout.raw.clone(),
        "--spawn-per-session".to_string(),
        "--".to_string(),
    ];
    args.extend(deployment.cmd.iter().cloned());
    args.extend(deployment.args.iter().cloned());

    StdioPlan {
        adapter_image,
        command: vec![ADAPTER_BINARY_PATH.to_string()],
        args,
        listen_port: spec.port,
        path: DEFAULT_MCP_PATH.to_string(),
    }
}

fn tls_secret_has_ca(secret_ref: Option<&str>, refs: &ResolvedRefs) -> Result<bool, RefError> {
    let Some(name) = secret_ref else {
        return Ok(false);
    };
    let secret = refs
        .tls_secret
        .as_ref()
        .filter(|s| s.name == name)
        .ok_or_else(|| {
            RefError::new(
                Reason::SecretNotFound,
                format!("TLS Secret {name} was not resolved"),
            )
        })?;

    let missing: Vec<&str> = [TLS_CERT_KEY, TLS_KEY_KEY]
        .into_iter()
        .filter(|k| !secret.keys.contains(*k))
        .collect();
    if !missing.is_empty() {
        return Err(RefError::new(
            Reason::InvalidTlsSecret,
            format!("TLS Secret {name} is missing {}", missing.join(", ")),
        ));
    }
    Ok(secret.keys.contains(TLS_CA_KEY))
}
