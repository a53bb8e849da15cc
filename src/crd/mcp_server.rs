//! MCPServer Custom Resource Definition
//!
//! An MCPServer declares one MCP server workload: the container that runs it,
//! how clients reach it (stdio through the transport adapter, or HTTP), and the
//! connection timeout clients should use.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, Container, LocalObjectReference, PodSecurityContext, ResourceRequirements,
    SecurityContext, Toleration, Volume, VolumeMount,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, TransportType};

/// Specification for an MCPServer
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kagent.dev",
    version = "v1alpha1",
    kind = "MCPServer",
    root = "McpServer",
    plural = "mcpservers",
    shortname = "mcps",
    shortname = "mcp",
    category = "kagent",
    status = "McpServerStatus",
    namespaced,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct McpServerSpec {
    /// Workload configuration for the MCP server container
    pub deployment: McpServerDeployment,

    /// Transport the server speaks; inferred from the transport blocks if unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_type: Option<TransportType>,

    /// Stdio transport configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdio_transport: Option<StdioTransport>,

    /// Streamable HTTP transport configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_transport: Option<HttpTransport>,

    /// Default client connection timeout, in Go duration syntax (e.g. `30s`, `1m30s`)
    ///
    /// Copied verbatim into the generated remote server configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// Stdio transport marker
///
/// Carries no configuration today; a distinct type leaves room for options.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct StdioTransport {}

/// Streamable HTTP transport configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpTransport {
    /// Port the container serves MCP on (defaults to `deployment.port`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<u32>,

    /// Path MCP is served on (defaults to `/mcp`)
    #[serde(default, rename = "path", skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,

    /// TLS configuration for HTTPS access
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<HttpTransportTls>,
}

/// TLS configuration for the HTTP transport
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpTransportTls {
    /// Secret holding `tls.crt`, `tls.key` and optionally `ca.crt`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,

    /// Disable certificate verification (development only)
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// Workload configuration for the MCP server
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct McpServerDeployment {
    /// Container image
    #[serde(default)]
    pub image: String,

    /// Image pull policy (Always, Never, IfNotPresent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Port the server listens on (defaults to 3000)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Command to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,

    /// Arguments passed to the command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Environment variables, delivered through a generated ConfigMap
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Secrets mounted read-only at `/etc/mcp/secrets/<name>`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_refs: Vec<LocalObjectReference>,

    /// ConfigMaps mounted read-only at `/etc/mcp/configmaps/<name>`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_map_refs: Vec<LocalObjectReference>,

    /// Volume mounts for the main container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,

    /// Pod volumes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// Overrides for the transport adapter init container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_container: Option<InitContainerConfig>,

    /// Create a dedicated ServiceAccount (exclusive with `serviceAccountName`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<ServiceAccountConfig>,

    /// Use an existing ServiceAccount (exclusive with `serviceAccount`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Additional containers in the pod
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sidecars: Vec<Container>,

    /// Extra labels for the pod template
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Extra annotations for the pod template
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Compute resources for the main container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Security context for the main container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,

    /// Security context for the pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_security_context: Option<PodSecurityContext>,

    /// Pod tolerations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    /// Pod affinity rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    /// Node selector
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Desired replica count (defaults to 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Pull secrets for the pod
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
}

/// Overrides for the transport adapter init container
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitContainerConfig {
    /// Adapter image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image pull policy (Always, Never, IfNotPresent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Compute resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Security context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
}

/// Configuration for a ServiceAccount created alongside the server
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountConfig {
    /// Annotations (e.g. cloud IAM role bindings)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Observed state of an MCPServer
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct McpServerStatus {
    /// Conditions keyed by type (at most 8)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(length(max = 8))]
    pub conditions: Vec<Condition>,

    /// Generation last processed by the controller
    #[serde(default)]
    pub observed_generation: i64,
}

impl McpServerStatus {
    /// Find a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}
