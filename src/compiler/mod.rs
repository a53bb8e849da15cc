//! Resource compiler for MCPServer
//!
//! Renders the desired child resources of one MCPServer from its normalized
//! spec, resolved references and transport plan. Pure: no cluster I/O, no
//! clock, and inputs are only borrowed, so the same inputs always produce the
//! same manifests.
//!
//! # Output
//!
//! - ServiceAccount, when `deployment.serviceAccount` is set
//! - ConfigMap holding `deployment.env`, when it is non-empty
//! - Deployment with the pod topology chosen by the transport plan
//! - Service exposing the transport port, annotated with the generated
//!   remote server configuration
//!
//! Every child is named after the MCPServer and carries a controller owner
//! reference to it.

mod pod;

use std::collections::BTreeMap;

use aws_lc_rs::digest::{digest, SHA256};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::conditions::Reason;
use crate::normalizer::{NormalizedSpec, ServiceAccountStrategy};
use crate::ownership::Owner;
use crate::resolver::ResolvedRefs;
use crate::transport::TransportPlan;
use crate::{Error, FIELD_MANAGER};

pub use pod::{
    CONFIG_MAP_MOUNT_ROOT, ENV_TLS_CA_FILE, ENV_TLS_CERT_FILE, ENV_TLS_INSECURE_SKIP_VERIFY,
    ENV_TLS_KEY_FILE, MCP_PORT_NAME, SECRET_MOUNT_ROOT,
};

/// Recommended label: application name
pub const LABEL_NAME: &str = "app.kubernetes.io/name";
/// Recommended label: instance
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
/// Recommended label: component
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
/// Recommended label: managing tool
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Pod annotation: hash of the generated ConfigMap data
pub const ANNOTATION_CONFIG_HASH: &str = "kagent.dev/config-hash";
/// Pod annotation: transport type
pub const ANNOTATION_TRANSPORT: &str = "kagent.dev/transport";
/// Service annotation: generated remote server configuration (JSON)
pub const ANNOTATION_REMOTE_SERVER: &str = "kagent.dev/remote-server";
/// Child annotation: hash of the manifest last applied by the operator
pub const ANNOTATION_SPEC_HASH: &str = "kagent.dev/spec-hash";

/// Cluster DNS suffix used in generated URLs
pub const CLUSTER_DOMAIN: &str = "cluster.local";

/// Protocol name clients use for Streamable HTTP
pub const STREAMABLE_HTTP: &str = "STREAMABLE_HTTP";

/// Kinds of child resources, in apply order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChildKind {
    /// ServiceAccount
    ServiceAccount,
    /// ConfigMap
    ConfigMap,
    /// Deployment
    Deployment,
    /// Service
    Service,
}

impl ChildKind {
    /// Apply order: dependencies before dependents
    pub const APPLY_ORDER: [ChildKind; 4] = [
        ChildKind::ServiceAccount,
        ChildKind::ConfigMap,
        ChildKind::Deployment,
        ChildKind::Service,
    ];

    /// Kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ServiceAccount => "ServiceAccount",
            Self::ConfigMap => "ConfigMap",
            Self::Deployment => "Deployment",
            Self::Service => "Service",
        }
    }

    /// `Programmed=False` reason when applying this kind fails
    pub fn failure_reason(&self) -> Reason {
        match self {
            Self::ServiceAccount => Reason::ServiceAccountFailed,
            Self::ConfigMap => Reason::ConfigMapFailed,
            Self::Deployment => Reason::DeploymentFailed,
            Self::Service => Reason::ServiceFailed,
        }
    }
}

impl std::fmt::Display for ChildKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A child resource of any supported kind
#[derive(Clone, Debug, PartialEq)]
pub enum ChildResource {
    /// ServiceAccount
    ServiceAccount(ServiceAccount),
    /// ConfigMap
    ConfigMap(ConfigMap),
    /// Deployment
    Deployment(Deployment),
    /// Service
    Service(Service),
}

impl ChildResource {
    /// Kind of this resource
    pub fn kind(&self) -> ChildKind {
        match self {
            Self::ServiceAccount(_) => ChildKind::ServiceAccount,
            Self::ConfigMap(_) => ChildKind::ConfigMap,
            Self::Deployment(_) => ChildKind::Deployment,
            Self::Service(_) => ChildKind::Service,
        }
    }

    /// Object metadata
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Self::ServiceAccount(o) => &o.metadata,
            Self::ConfigMap(o) => &o.metadata,
            Self::Deployment(o) => &o.metadata,
            Self::Service(o) => &o.metadata,
        }
    }

    /// Mutable object metadata
    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::ServiceAccount(o) => &mut o.metadata,
            Self::ConfigMap(o) => &mut o.metadata,
            Self::Deployment(o) => &mut o.metadata,
            Self::Service(o) => &mut o.metadata,
        }
    }

    /// `namespace/name` for logs and messages
    pub fn display_name(&self) -> String {
        let meta = self.meta();
        format!(
            "{}/{}",
            meta.namespace.as_deref().unwrap_or_default(),
            meta.name.as_deref().unwrap_or_default()
        )
    }

    /// JSON form, as sent to the API server
    pub fn to_value(&self) -> Result<serde_json::Value, Error> {
        let value = match self {
            Self::ServiceAccount(o) => serde_json::to_value(o)?,
            Self::ConfigMap(o) => serde_json::to_value(o)?,
            Self::Deployment(o) => serde_json::to_value(o)?,
            Self::Service(o) => serde_json::to_value(o)?,
        };
        Ok(value)
    }
}

/// Client-facing configuration for reaching the server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteServerConfig {
    /// In-cluster URL
    pub url: String,
    /// Wire protocol
    pub protocol: String,
    /// Client connection timeout, verbatim from `spec.timeout`
    pub timeout: String,
    /// TLS client settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RemoteTlsConfig>,
}

impl RemoteServerConfig {
    /// JSON form stored in the Service annotation
    pub fn to_annotation(&self) -> String {
        let mut value = json!({
            "url": self.url,
            "protocol": self.protocol,
            "timeout": self.timeout,
        });
        if let Some(tls) = &self.tls {
            let mut tls_value = json!({ "insecureSkipVerify": tls.insecure_skip_verify });
            if let Some(secret) = &tls.secret_ref {
                tls_value["secretRef"] = json!(secret);
            }
            value["tls"] = tls_value;
        }
        value.to_string()
    }
}

/// TLS settings in the remote server configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTlsConfig {
    /// Secret with the client certificate material
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
    /// Disable certificate verification (development only)
    pub insecure_skip_verify: bool,
}

/// Desired child resources for one MCPServer
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledResources {
    /// Generated ServiceAccount
    pub service_account: Option<ServiceAccount>,
    /// ConfigMap with environment variables
    pub config_map: Option<ConfigMap>,
    /// Deployment running the server
    pub deployment: Deployment,
    /// Service exposing the server
    pub service: Service,
    /// Remote server configuration stored on the Service
    pub remote: RemoteServerConfig,
}

impl CompiledResources {
    /// Children in apply order; `None` marks a kind that should not exist
    pub fn children(&self) -> Vec<(ChildKind, Option<ChildResource>)> {
        vec![
            (
                ChildKind::ServiceAccount,
                self.service_account.clone().map(ChildResource::ServiceAccount),
            ),
            (
                ChildKind::ConfigMap,
                self.config_map.clone().map(ChildResource::ConfigMap),
            ),
            (
                ChildKind::Deployment,
                Some(ChildResource::Deployment(self.deployment.clone())),
            ),
            (
                ChildKind::Service,
                Some(ChildResource::Service(self.service.clone())),
            ),
        ]
    }

    /// Number of children that should exist
    pub fn resource_count(&self) -> usize {
        2 + usize::from(self.service_account.is_some()) + usize::from(self.config_map.is_some())
    }
}

/// Compiler for one MCPServer's child resources
pub struct ResourceCompiler<'a> {
    owner: &'a Owner,
    spec: &'a NormalizedSpec,
    refs: &'a ResolvedRefs,
    plan: &'a TransportPlan,
}

impl<'a> ResourceCompiler<'a> {
    /// Create a compiler over borrowed inputs
    pub fn new(
        owner: &'a Owner,
        spec: &'a NormalizedSpec,
        refs: &'a ResolvedRefs,
        plan: &'a TransportPlan,
    ) -> Self {
        Self {
            owner,
            spec,
            refs,
            plan,
        }
    }

    /// Render every desired child
    pub fn compile(&self) -> CompiledResources {
        let service_account = self.service_account();
        let config_map = self.config_map();
        let remote = self.remote_config();
        let deployment = self.deployment(config_map.as_ref());
        let service = self.service(&remote);

        CompiledResources {
            service_account,
            config_map,
            deployment,
            service,
            remote,
        }
    }

    fn metadata(&self, labels: BTreeMap<String, String>) -> ObjectMeta {
        ObjectMeta {
            name: Some(self.owner.name.clone()),
            namespace: Some(self.owner.namespace.clone()),
            labels: Some(labels),
            owner_references: Some(vec![self.owner.reference()]),
            ..Default::default()
        }
    }

    fn service_account(&self) -> Option<ServiceAccount> {
        let ServiceAccountStrategy::Generated(config) = &self.spec.service_account else {
            return None;
        };

        let mut labels = config.labels.clone();
        labels.extend(standard_labels(&self.owner.name));

        let mut metadata = self.metadata(labels);
        if !config.annotations.is_empty() {
            metadata.annotations = Some(config.annotations.clone());
        }

        Some(ServiceAccount {
            metadata,
            ..Default::default()
        })
    }

    fn config_map(&self) -> Option<ConfigMap> {
        let env = &self.spec.deployment.env;
        if env.is_empty() {
            return None;
        }
        Some(ConfigMap {
            metadata: self.metadata(standard_labels(&self.owner.name)),
            data: Some(env.clone()),
            ..Default::default()
        })
    }

    fn deployment(&self, config_map: Option<&ConfigMap>) -> Deployment {
        let deployment = &self.spec.deployment;

        let mut pod_labels = deployment.labels.clone();
        pod_labels.extend(standard_labels(&self.owner.name));

        let mut pod_annotations = deployment.annotations.clone();
        pod_annotations.insert(
            ANNOTATION_TRANSPORT.to_string(),
            self.plan.kind().to_string(),
        );
        if let Some(data) = config_map.and_then(|cm| cm.data.as_ref()) {
            pod_annotations.insert(ANNOTATION_CONFIG_HASH.to_string(), compute_config_hash(data));
        }

        let template = pod::pod_template(&pod::PodInputs {
            name: &self.owner.name,
            spec: self.spec,
            refs: self.refs,
            plan: self.plan,
            labels: pod_labels,
            annotations: pod_annotations,
            has_config_map: config_map.is_some(),
        });

        Deployment {
            metadata: self.metadata(standard_labels(&self.owner.name)),
            spec: Some(DeploymentSpec {
                replicas: Some(self.spec.replicas),
                selector: LabelSelector {
                    match_labels: Some(selector_labels(&self.owner.name)),
                    ..Default::default()
                },
                template,
                ..Default::default()
            }),
            status: None,
        }
    }

    fn service(&self, remote: &RemoteServerConfig) -> Service {
        let port = i32::from(self.plan.port());
        let mut metadata = self.metadata(standard_labels(&self.owner.name));
        metadata.annotations = Some(BTreeMap::from([(
            ANNOTATION_REMOTE_SERVER.to_string(),
            remote.to_annotation(),
        )]));

        Service {
            metadata,
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(selector_labels(&self.owner.name)),
                ports: Some(vec![ServicePort {
                    name: Some(MCP_PORT_NAME.to_string()),
                    port,
                    target_port: Some(IntOrString::Int(port)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn remote_config(&self) -> RemoteServerConfig {
        let tls = match self.plan {
            TransportPlan::Http(http) => http.tls.as_ref().map(|tls| RemoteTlsConfig {
                secret_ref: tls.secret_name.clone(),
                insecure_skip_verify: tls.insecure_skip_verify,
            }),
            TransportPlan::Stdio(_) => None,
        };

        RemoteServerConfig {
            url: format!(
                "{}://{}.{}.svc.{}:{}{}",
                self.plan.scheme(),
                self.owner.name,
                self.owner.namespace,
                CLUSTER_DOMAIN,
                self.plan.port(),
                self.plan.path()
            ),
            protocol: STREAMABLE_HTTP.to_string(),
            timeout: self.spec.timeout.raw.clone(),
            tls,
        }
    }
}

/// Labels the Deployment selects pods by; never change for a live server
pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), name.to_string()),
        (LABEL_INSTANCE.to_string(), name.to_string()),
    ])
}

/// Labels on every child resource and pod
pub fn standard_labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(name);
    labels.insert(LABEL_COMPONENT.to_string(), "mcp-server".to_string());
    labels.insert(LABEL_MANAGED_BY.to_string(), FIELD_MANAGER.to_string());
    labels
}

/// Compute a hash of ConfigMap data for change detection
///
/// Added as a pod annotation so an env change rolls the pods. SHA-256,
/// first 8 bytes as hex.
pub fn compute_config_hash(data: &BTreeMap<String, String>) -> String {
    let mut input = String::new();
    for (k, v) in data {
        input.push_str(k);
        input.push('=');
        input.push_str(v);
        input.push('\n');
    }

    short_hash(input.as_bytes(), 8)
}

/// First `bytes` bytes of the SHA-256 of `input`, as hex
pub fn short_hash(input: &[u8], bytes: usize) -> String {
    let hash = digest(&SHA256, input);
    hash.as_ref()
        .iter()
        .take(bytes)
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatorConfig;
    use crate::crd::{
        HttpTransport, HttpTransportTls, McpServerDeployment, McpServerSpec,
        ServiceAccountConfig, TransportType,
    };
    use crate::normalizer::normalize;
    use crate::resolver::ResolvedSecret;
    use crate::transport::{self, ADAPTER_INIT_CONTAINER_NAME, ADAPTER_VOLUME_NAME};
    use k8s_openapi::api::core::v1::LocalObjectReference;

    fn owner() -> Owner {
        Owner {
            name: "weather".to_string(),
            namespace: "tools".to_string(),
            uid: "uid-1".to_string(),
        }
    }

    fn compile(spec: &McpServerSpec, refs: ResolvedRefs) -> CompiledResources {
        let normalized = normalize(spec).unwrap();
        let refs = ResolvedRefs {
            image: normalized.deployment.image.clone(),
            ..refs
        };
        let plan = transport::select(&normalized, &refs, &OperatorConfig::default()).unwrap();
        ResourceCompiler::new(&owner(), &normalized, &refs, &plan).compile()
    }

    fn stdio_spec() -> McpServerSpec {
        McpServerSpec {
            deployment: McpServerDeployment {
                image: "x/y:1".to_string(),
                port: Some(3000),
                ..Default::default()
            },
            transport_type: Some(TransportType::Stdio),
            ..Default::default()
        }
    }

    fn pod_spec(compiled: &CompiledResources) -> &k8s_openapi::api::core::v1::PodSpec {
        compiled
            .deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
    }

    // =========================================================================
    // Scenario: stdio happy path
    // =========================================================================

    /// Story: A stdio server renders an adapter init container, one Service, no ConfigMap
    #[test]
    fn story_stdio_renders_adapter_topology() {
        let compiled = compile(&stdio_spec(), ResolvedRefs::default());

        assert!(compiled.config_map.is_none());
        assert!(compiled.service_account.is_none());
        assert_eq!(compiled.resource_count(), 2);

        let pod = pod_spec(&compiled);
        let init = pod.init_containers.as_ref().unwrap();
        assert_eq!(init.len(), 1);
        assert_eq!(init[0].name, ADAPTER_INIT_CONTAINER_NAME);

        let main = &pod.containers[0];
        assert_eq!(main.image.as_deref(), Some("x/y:1"));
        let mounts = main.volume_mounts.as_ref().unwrap();
        assert!(mounts.iter().any(|m| m.name == ADAPTER_VOLUME_NAME));
        assert_eq!(
            main.command.as_ref().unwrap()[0],
            transport::ADAPTER_BINARY_PATH
        );

        let volumes = pod.volumes.as_ref().unwrap();
        assert!(volumes
            .iter()
            .any(|v| v.name == ADAPTER_VOLUME_NAME && v.empty_dir.is_some()));

        let ports = compiled.service.spec.as_ref().unwrap().ports.as_ref().unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, 3000);
    }

    /// Story: Rendering is deterministic
    #[test]
    fn story_render_is_byte_identical() {
        let mut spec = stdio_spec();
        spec.deployment.env = BTreeMap::from([
            ("B".to_string(), "2".to_string()),
            ("A".to_string(), "1".to_string()),
        ]);
        spec.deployment.secret_refs = vec![LocalObjectReference {
            name: "api-token".to_string(),
        }];

        let first = serde_json::to_string(&compile(&spec, ResolvedRefs::default()).deployment)
            .unwrap();
        let second = serde_json::to_string(&compile(&spec, ResolvedRefs::default()).deployment)
            .unwrap();
        assert_eq!(first, second);
    }

    /// Story: Every child is owned by the MCPServer and named after it
    #[test]
    fn story_children_are_owned_and_named() {
        let mut spec = stdio_spec();
        spec.deployment.env.insert("LOG_LEVEL".to_string(), "debug".to_string());
        spec.deployment.service_account = Some(ServiceAccountConfig::default());
        let compiled = compile(&spec, ResolvedRefs::default());

        let children = compiled.children();
        let kinds: Vec<ChildKind> = children.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, ChildKind::APPLY_ORDER.to_vec());

        for (_, child) in &children {
            let child = child.as_ref().unwrap();
            let meta = child.meta();
            assert_eq!(meta.name.as_deref(), Some("weather"));
            assert_eq!(meta.namespace.as_deref(), Some("tools"));
            assert!(owner().controls(meta), "{}", child.kind());
        }
    }

    // =========================================================================
    // ConfigMap and ServiceAccount
    // =========================================================================

    #[test]
    fn test_env_goes_through_config_map() {
        let mut spec = stdio_spec();
        spec.deployment.env.insert("API_URL".to_string(), "https://api".to_string());
        let compiled = compile(&spec, ResolvedRefs::default());

        let cm = compiled.config_map.as_ref().unwrap();
        assert_eq!(cm.data.as_ref().unwrap()["API_URL"], "https://api");

        let main = &pod_spec(&compiled).containers[0];
        let env_from = main.env_from.as_ref().unwrap();
        assert_eq!(env_from[0].config_map_ref.as_ref().unwrap().name, "weather");

        let annotations = compiled
            .deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .metadata
            .as_ref()
            .unwrap()
            .annotations
            .as_ref()
            .unwrap();
        assert_eq!(
            annotations[ANNOTATION_CONFIG_HASH],
            compute_config_hash(cm.data.as_ref().unwrap())
        );
    }

    #[test]
    fn test_service_account_strategies() {
        let mut spec = stdio_spec();
        spec.deployment.service_account = Some(ServiceAccountConfig {
            annotations: BTreeMap::from([(
                "eks.amazonaws.com/role-arn".to_string(),
                "arn:aws:iam::1:role/mcp".to_string(),
            )]),
            labels: BTreeMap::new(),
        });
        let compiled = compile(&spec, ResolvedRefs::default());
        let sa = compiled.service_account.as_ref().unwrap();
        assert!(sa
            .metadata
            .annotations
            .as_ref()
            .unwrap()
            .contains_key("eks.amazonaws.com/role-arn"));
        assert_eq!(
            pod_spec(&compiled).service_account_name.as_deref(),
            Some("weather")
        );

        let mut spec = stdio_spec();
        spec.deployment.service_account_name = Some("shared".to_string());
        let compiled = compile(&spec, ResolvedRefs::default());
        assert!(compiled.service_account.is_none());
        assert_eq!(
            pod_spec(&compiled).service_account_name.as_deref(),
            Some("shared")
        );
    }

    // =========================================================================
    // Mounts and HTTP
    // =========================================================================

    #[test]
    fn test_reference_mount_paths() {
        let mut spec = stdio_spec();
        spec.deployment.secret_refs = vec![LocalObjectReference {
            name: "api-token".to_string(),
        }];
        spec.deployment.config_map_refs = vec![LocalObjectReference {
            name: "prompts".to_string(),
        }];
        let compiled = compile(&spec, ResolvedRefs::default());

        let mounts = pod_spec(&compiled).containers[0]
            .volume_mounts
            .clone()
            .unwrap();
        let paths: Vec<&str> = mounts.iter().map(|m| m.mount_path.as_str()).collect();
        assert!(paths.contains(&"/etc/mcp/secrets/api-token"));
        assert!(paths.contains(&"/etc/mcp/configmaps/prompts"));
        assert!(mounts
            .iter()
            .filter(|m| m.mount_path.starts_with("/etc/mcp"))
            .all(|m| m.read_only == Some(true)));
    }

    /// Story: HTTPS servers get the TLS Secret mounted and exported
    #[test]
    fn story_http_tls_wiring() {
        let spec = McpServerSpec {
            deployment: McpServerDeployment {
                image: "ghcr.io/example/search:2".to_string(),
                port: Some(8443),
                cmd: Some("search-server".to_string()),
                ..Default::default()
            },
            transport_type: Some(TransportType::Http),
            http_transport: Some(HttpTransport {
                tls: Some(HttpTransportTls {
                    secret_ref: Some("server-tls".to_string()),
                    insecure_skip_verify: true,
                }),
                ..Default::default()
            }),
            timeout: Some("2m".to_string()),
            ..Default::default()
        };
        let refs = ResolvedRefs {
            tls_secret: Some(ResolvedSecret {
                name: "server-tls".to_string(),
                keys: ["tls.crt", "tls.key", "ca.crt"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            }),
            ..Default::default()
        };
        let compiled = compile(&spec, refs);

        let pod = pod_spec(&compiled);
        assert!(pod.init_containers.is_none());
        let main = &pod.containers[0];
        assert_eq!(main.command, Some(vec!["search-server".to_string()]));
        let env = main.env.as_ref().unwrap();
        let names: Vec<&str> = env.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                ENV_TLS_CERT_FILE,
                ENV_TLS_KEY_FILE,
                ENV_TLS_CA_FILE,
                ENV_TLS_INSECURE_SKIP_VERIFY
            ]
        );

        assert_eq!(
            compiled.remote.url,
            "https://weather.tools.svc.cluster.local:8443/mcp"
        );
        assert_eq!(compiled.remote.timeout, "2m");
        assert!(compiled.remote.tls.as_ref().unwrap().insecure_skip_verify);

        let annotation = &compiled.service.metadata.annotations.as_ref().unwrap()
            [ANNOTATION_REMOTE_SERVER];
        let remote: RemoteServerConfig = serde_json::from_str(annotation).unwrap();
        assert_eq!(remote, compiled.remote);
        assert_eq!(
            remote.tls.unwrap().secret_ref.as_deref(),
            Some("server-tls")
        );
    }

    /// Story: The timeout reaches the remote configuration verbatim
    #[test]
    fn story_timeout_propagates_verbatim() {
        let mut spec = stdio_spec();
        spec.timeout = Some("1m30s".to_string());
        let compiled = compile(&spec, ResolvedRefs::default());

        let annotation = &compiled.service.metadata.annotations.as_ref().unwrap()
            [ANNOTATION_REMOTE_SERVER];
        let remote: RemoteServerConfig = serde_json::from_str(annotation).unwrap();
        assert_eq!(remote.timeout, "1m30s");
        assert_eq!(remote.protocol, STREAMABLE_HTTP);

        let default = compile(&stdio_spec(), ResolvedRefs::default());
        assert_eq!(default.remote.timeout, "30s");
    }

    #[test]
    fn test_selector_is_subset_of_pod_labels() {
        let mut spec = stdio_spec();
        spec.deployment.labels.insert("team".to_string(), "search".to_string());
        spec.deployment
            .labels
            .insert(LABEL_NAME.to_string(), "spoofed".to_string());
        let compiled = compile(&spec, ResolvedRefs::default());

        let deployment_spec = compiled.deployment.spec.as_ref().unwrap();
        let selector = deployment_spec.selector.match_labels.as_ref().unwrap();
        let pod_labels = deployment_spec
            .template
            .metadata
            .as_ref()
            .unwrap()
            .labels
            .as_ref()
            .unwrap();
        for (k, v) in selector {
            assert_eq!(pod_labels.get(k), Some(v));
        }
        assert_eq!(pod_labels["team"], "search");
    }

    #[test]
    fn test_config_hash_changes_with_data() {
        let a = BTreeMap::from([("K".to_string(), "1".to_string())]);
        let b = BTreeMap::from([("K".to_string(), "2".to_string())]);
        assert_eq!(compute_config_hash(&a).len(), 16);
        assert_ne!(compute_config_hash(&a), compute_config_hash(&b));
        assert_eq!(compute_config_hash(&a), compute_config_hash(&a.clone()));
    }

    #[test]
    fn test_failure_reasons_per_kind() {
        assert_eq!(
            ChildKind::Deployment.failure_reason(),
            Reason::DeploymentFailed
        );
        assert_eq!(ChildKind::Service.failure_reason(), Reason::ServiceFailed);
        assert_eq!(
            ChildKind::ConfigMap.failure_reason(),
            Reason::ConfigMapFailed
        );
        assert_eq!(
            ChildKind::ServiceAccount.failure_reason(),
            Reason::ServiceAccountFailed
        );
    }
}
