//! Spec normalization
//!
//! Turns a raw [`McpServerSpec`] into a [`NormalizedSpec`]: defaults filled
//! in, the transport resolved into a tagged variant, and the service account
//! strategy made explicit. Cross-field rules are checked here so they hold no
//! matter which layer admitted the object. Pure function, no I/O.

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;

use crate::compiler::short_hash;
use crate::conditions::Reason;
use crate::crd::{
    HttpTransport, McpServerDeployment, McpServerSpec, ServiceAccountConfig, TransportType,
};
use crate::transport::{
    ADAPTER_INIT_CONTAINER_NAME, ADAPTER_VOLUME_NAME, MAIN_CONTAINER_NAME, TLS_VOLUME_NAME,
};
use crate::{DEFAULT_MCP_PATH, DEFAULT_PORT, DEFAULT_REPLICAS, DEFAULT_TIMEOUT};

/// Pull policies accepted for the main and init containers
const PULL_POLICIES: [&str; 3] = ["Always", "Never", "IfNotPresent"];

/// Longest name a pod volume may have (DNS-1123 label)
const MAX_VOLUME_NAME_LEN: usize = 63;

/// Volume name prefix for `secretRefs` mounts
pub const SECRET_VOLUME_PREFIX: &str = "secret-";

/// Volume name prefix for `configMapRefs` mounts
pub const CONFIG_MAP_VOLUME_PREFIX: &str = "configmap-";

/// Semantic validation failure; surfaces as `Accepted=False`
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    /// Fields that cannot be combined, or values out of range
    #[error("{0}")]
    InvalidConfig(String),
    /// Transport type missing its config, or mismatched with it
    #[error("{0}")]
    UnsupportedTransport(String),
}

impl SpecError {
    fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedTransport(msg.into())
    }

    /// Condition reason for this failure
    pub fn reason(&self) -> Reason {
        match self {
            Self::InvalidConfig(_) => Reason::InvalidConfig,
            Self::UnsupportedTransport(_) => Reason::UnsupportedTransport,
        }
    }
}

/// Resolved transport variant
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transport {
    /// Stdio process exposed through the transport adapter
    Stdio,
    /// Container serves Streamable HTTP itself
    Http(HttpTransportConfig),
}

impl Transport {
    /// Transport type for labels and annotations
    pub fn kind(&self) -> TransportType {
        match self {
            Self::Stdio => TransportType::Stdio,
            Self::Http(_) => TransportType::Http,
        }
    }
}

/// HTTP transport with defaults applied
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpTransportConfig {
    /// Container port serving MCP
    pub target_port: u16,
    /// Path MCP is served on
    pub path: String,
    /// TLS settings, if any
    pub tls: Option<TlsConfig>,
}

/// TLS settings for the HTTP transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsConfig {
    /// Secret holding the certificate material
    pub secret_ref: Option<String>,
    /// Pass-through flag; never changes which material is mounted
    pub insecure_skip_verify: bool,
}

/// Which ServiceAccount the pod runs as
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceAccountStrategy {
    /// Create a ServiceAccount named after the server
    Generated(ServiceAccountConfig),
    /// Use an existing ServiceAccount
    Existing(String),
    /// Use the namespace default
    Default,
}

/// Client connection timeout
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timeout {
    /// Spec value, copied verbatim into generated configuration
    pub raw: String,
    /// Parsed value
    pub duration: Duration,
}

/// Spec with defaults filled in and cross-field rules checked
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedSpec {
    /// Workload fields as written in the MCPServer
    pub deployment: McpServerDeployment,
    /// Port the server listens on
    pub port: u16,
    /// Desired replicas
    pub replicas: i32,
    /// Resolved transport
    pub transport: Transport,
    /// ServiceAccount strategy
    pub service_account: ServiceAccountStrategy,
    /// Client connection timeout
    pub timeout: Timeout,
}

impl NormalizedSpec {
    /// Names of the Secrets listed in `secretRefs`
    pub fn secret_ref_names(&self) -> impl Iterator<Item = &str> {
        self.deployment.secret_refs.iter().map(|r| r.name.as_str())
    }

    /// Names of the ConfigMaps listed in `configMapRefs`
    pub fn config_map_ref_names(&self) -> impl Iterator<Item = &str> {
        self.deployment.config_map_refs.iter().map(|r| r.name.as_str())
    }
}

/// Normalize a spec, or explain why it cannot be accepted
pub fn normalize(spec: &McpServerSpec) -> Result<NormalizedSpec, SpecError> {
    let deployment = &spec.deployment;

    let existing_name = deployment
        .service_account_name
        .as_ref()
        .filter(|name| !name.is_empty());
    let service_account = match (&deployment.service_account, existing_name) {
        (Some(_), Some(_)) => {
            return Err(SpecError::invalid(
                "deployment.serviceAccount and deployment.serviceAccountName are mutually exclusive",
            ))
        }
        (Some(config), None) => ServiceAccountStrategy::Generated(config.clone()),
        (None, Some(name)) => ServiceAccountStrategy::Existing(name.clone()),
        (None, None) => ServiceAccountStrategy::Default,
    };

    let port = match deployment.port {
        Some(0) | None => DEFAULT_PORT,
        Some(p) => p,
    };

    let replicas = deployment.replicas.unwrap_or(DEFAULT_REPLICAS);
    if replicas < 0 {
        return Err(SpecError::invalid(format!(
            "deployment.replicas must not be negative, got {replicas}"
        )));
    }

    validate_pull_policy("deployment.imagePullPolicy", &deployment.image_pull_policy)?;
    if let Some(init) = &deployment.init_container {
        validate_pull_policy(
            "deployment.initContainer.imagePullPolicy",
            &init.image_pull_policy,
        )?;
    }

    validate_env(deployment)?;
    validate_volumes(deployment)?;
    validate_sidecars(deployment)?;

    let transport = select_transport(spec, port)?;

    let raw = spec
        .timeout
        .clone()
        .unwrap_or_else(|| DEFAULT_TIMEOUT.to_string());
    let duration = parse_duration(&raw)
        .map_err(|e| SpecError::invalid(format!("timeout {raw:?} is invalid: {e}")))?;

    Ok(NormalizedSpec {
        deployment: deployment.clone(),
        port,
        replicas,
        transport,
        service_account,
        timeout: Timeout { raw, duration },
    })
}

fn select_transport(spec: &McpServerSpec, port: u16) -> Result<Transport, SpecError> {
    let stdio = spec.stdio_transport.is_some();
    match (spec.transport_type, &spec.http_transport) {
        (Some(TransportType::Stdio), Some(_)) => Err(SpecError::unsupported(
            "transportType stdio cannot be combined with httpTransport",
        )),
        (Some(TransportType::Stdio), None) => Ok(Transport::Stdio),
        (Some(TransportType::Http), None) => Err(SpecError::unsupported(
            "transportType http requires httpTransport to be set",
        )),
        (Some(TransportType::Http), Some(_)) if stdio => Err(SpecError::unsupported(
            "transportType http cannot be combined with stdioTransport",
        )),
        (None, Some(_)) if stdio => Err(SpecError::unsupported(
            "stdioTransport and httpTransport are mutually exclusive; set transportType",
        )),
        (Some(TransportType::Http), Some(http)) | (None, Some(http)) => {
            http_config(http, port).map(Transport::Http)
        }
        (None, None) => Ok(Transport::Stdio),
    }
}

fn http_config(http: &HttpTransport, port: u16) -> Result<HttpTransportConfig, SpecError> {
    let target_port = match http.target_port {
        Some(0) | None => port,
        Some(p) => u16::try_from(p).map_err(|_| {
            SpecError::invalid(format!(
                "httpTransport.targetPort must be between 1 and 65535, got {p}"
            ))
        })?,
    };

    let path = match http.target_path.as_deref() {
        None | Some("") => DEFAULT_MCP_PATH.to_string(),
        Some(p) if p.starts_with('/') => p.to_string(),
        Some(p) => {
            return Err(SpecError::invalid(format!(
                "httpTransport.path must start with '/', got {p:?}"
            )))
        }
    };

    let tls = http.tls.as_ref().map(|tls| TlsConfig {
        secret_ref: tls.secret_ref.clone().filter(|s| !s.is_empty()),
        insecure_skip_verify: tls.insecure_skip_verify,
    });

    Ok(HttpTransportConfig {
        target_port,
        path,
        tls,
    })
}

fn validate_pull_policy(field: &str, policy: &Option<String>) -> Result<(), SpecError> {
    match policy.as_deref() {
        None => Ok(()),
        Some(p) if PULL_POLICIES.contains(&p) => Ok(()),
        Some(p) => Err(SpecError::invalid(format!(
            "{field} must be one of Always, Never, IfNotPresent, got {p:?}"
        ))),
    }
}

fn validate_env(deployment: &McpServerDeployment) -> Result<(), SpecError> {
    for key in deployment.env.keys() {
        if key.is_empty() || key.contains('=') {
            return Err(SpecError::invalid(format!(
                "deployment.env has an invalid variable name {key:?}"
            )));
        }
    }
    Ok(())
}

fn validate_volumes(deployment: &McpServerDeployment) -> Result<(), SpecError> {
    let mut generated = BTreeSet::from([
        ADAPTER_VOLUME_NAME.to_string(),
        TLS_VOLUME_NAME.to_string(),
    ]);
    for name in deployment.secret_refs.iter().map(|r| &r.name) {
        if !generated.insert(secret_volume_name(name)) {
            return Err(SpecError::invalid(format!(
                "deployment.secretRefs entry {name:?} is listed twice or maps to the same volume as another entry"
            )));
        }
    }
    for name in deployment.config_map_refs.iter().map(|r| &r.name) {
        if !generated.insert(config_map_volume_name(name)) {
            return Err(SpecError::invalid(format!(
                "deployment.configMapRefs entry {name:?} is listed twice or maps to the same volume as another entry"
            )));
        }
    }
    if let Some(long) = generated.iter().find(|n| n.len() > MAX_VOLUME_NAME_LEN) {
        return Err(SpecError::invalid(format!(
            "reference name too long: volume {long:?} exceeds {MAX_VOLUME_NAME_LEN} characters"
        )));
    }

    let mut declared = BTreeSet::new();
    for volume in &deployment.volumes {
        let reserved_prefix = [SECRET_VOLUME_PREFIX, CONFIG_MAP_VOLUME_PREFIX]
            .iter()
            .any(|prefix| volume.name.starts_with(prefix));
        if reserved_prefix || generated.contains(&volume.name) {
            return Err(SpecError::invalid(format!(
                "deployment.volumes name {:?} is reserved by the operator",
                volume.name
            )));
        }
        if !declared.insert(volume.name.as_str()) {
            return Err(SpecError::invalid(format!(
                "deployment.volumes declares {:?} more than once",
                volume.name
            )));
        }
    }

    for mount in &deployment.volume_mounts {
        if !declared.contains(mount.name.as_str()) {
            return Err(SpecError::invalid(format!(
                "deployment.volumeMounts references undeclared volume {:?}",
                mount.name
            )));
        }
    }
    Ok(())
}

fn validate_sidecars(deployment: &McpServerDeployment) -> Result<(), SpecError> {
    let mut names = BTreeSet::from([MAIN_CONTAINER_NAME, ADAPTER_INIT_CONTAINER_NAME]);
    for sidecar in &deployment.sidecars {
        if sidecar.name.is_empty() {
            return Err(SpecError::invalid("deployment.sidecars entries must be named"));
        }
        if !names.insert(sidecar.name.as_str()) {
            return Err(SpecError::invalid(format!(
                "deployment.sidecars name {:?} collides with another container",
                sidecar.name
            )));
        }
    }
    Ok(())
}

/// Pod volume name for a `secretRefs` entry
pub fn secret_volume_name(secret: &str) -> String {
    reference_volume_name(SECRET_VOLUME_PREFIX, secret)
}

/// Pod volume name for a `configMapRefs` entry
pub fn config_map_volume_name(config_map: &str) -> String {
    reference_volume_name(CONFIG_MAP_VOLUME_PREFIX, config_map)
}

/// Object names may contain dots but volume names are DNS-1123 labels.
/// A dotted name gets its dots replaced and a hash suffix, so `api.token`
/// and `api-token` still map to different volumes.
fn reference_volume_name(prefix: &str, object: &str) -> String {
    if !object.contains('.') {
        return format!("{prefix}{object}");
    }
    format!(
        "{prefix}{}-{}",
        object.replace('.', "-"),
        short_hash(object.as_bytes(), 4)
    )
}

/// Parse a Go-style duration such as `30s`, `1m30s`, `1.5h` or `500ms`
///
/// The result must be positive.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut rest = s;
    let mut seconds = 0f64;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_end == 0 {
            return Err(format!("expected a number at {rest:?}"));
        }
        let value: f64 = rest[..num_end]
            .parse()
            .map_err(|_| format!("invalid number {:?}", &rest[..num_end]))?;
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1e-9,
            "us" | "µs" | "μs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err("missing unit (expected e.g. 30s, 1m, 1h)".to_string()),
            unit => return Err(format!("unknown unit {unit:?}")),
        };
        seconds += value * scale;
        rest = &rest[unit_end..];
    }

    if seconds <= 0.0 {
        return Err("must be positive".to_string());
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| "out of range".to_string())
}
