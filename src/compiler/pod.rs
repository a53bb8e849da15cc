//! Pod template rendering
//!
//! Assembles the main container, the transport adapter init container (stdio
//! only), sidecars, volumes and scheduling fields into a `PodTemplateSpec`.
//! Volume and mount order is fixed so repeated renders compare equal.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMapEnvSource, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource,
    EnvFromSource, EnvVar, PodSpec, PodTemplateSpec, Probe, SecretVolumeSource, TCPSocketAction,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::normalizer::{
    config_map_volume_name, secret_volume_name, NormalizedSpec, ServiceAccountStrategy,
};
use crate::resolver::ResolvedRefs;
use crate::transport::{
    HttpPlan, StdioPlan, TransportPlan, ADAPTER_BINARY_PATH, ADAPTER_INIT_CONTAINER_NAME,
    ADAPTER_MOUNT_PATH, ADAPTER_SOURCE_PATH, ADAPTER_VOLUME_NAME, MAIN_CONTAINER_NAME,
    TLS_CA_KEY, TLS_CERT_KEY, TLS_KEY_KEY, TLS_MOUNT_PATH, TLS_VOLUME_NAME,
};

/// Named container port for MCP traffic
pub const MCP_PORT_NAME: &str = "mcp";

/// Mount root for `secretRefs`
pub const SECRET_MOUNT_ROOT: &str = "/etc/mcp/secrets";

/// Mount root for `configMapRefs`
pub const CONFIG_MAP_MOUNT_ROOT: &str = "/etc/mcp/configmaps";

/// Environment variables exported when TLS is configured
pub const ENV_TLS_CERT_FILE: &str = "MCP_TLS_CERT_FILE";
/// Private key path
pub const ENV_TLS_KEY_FILE: &str = "MCP_TLS_KEY_FILE";
/// CA bundle path
pub const ENV_TLS_CA_FILE: &str = "MCP_TLS_CA_FILE";
/// Pass-through verification flag
pub const ENV_TLS_INSECURE_SKIP_VERIFY: &str = "MCP_TLS_INSECURE_SKIP_VERIFY";

/// Inputs shared by every part of the pod template
pub(crate) struct PodInputs<'a> {
    pub name: &'a str,
    pub spec: &'a NormalizedSpec,
    pub refs: &'a ResolvedRefs,
    pub plan: &'a TransportPlan,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub has_config_map: bool,
}

/// Render the pod template
pub(crate) fn pod_template(inputs: &PodInputs<'_>) -> PodTemplateSpec {
    let deployment = &inputs.spec.deployment;

    let service_account_name = match &inputs.spec.service_account {
        ServiceAccountStrategy::Generated(_) => Some(inputs.name.to_string()),
        ServiceAccountStrategy::Existing(name) => Some(name.clone()),
        ServiceAccountStrategy::Default => None,
    };

    let init_containers = match inputs.plan {
        TransportPlan::Stdio(plan) => Some(vec![adapter_init_container(inputs.spec, plan)]),
        TransportPlan::Http(_) => None,
    };

    let mut containers = vec![main_container(inputs)];
    containers.extend(deployment.sidecars.iter().cloned());

    let image_pull_secrets = non_empty(deployment.image_pull_secrets.clone());

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(inputs.labels.clone()),
            annotations: Some(inputs.annotations.clone()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            service_account_name,
            init_containers,
            containers,
            volumes: non_empty(volumes(inputs)),
            image_pull_secrets,
            security_context: deployment.pod_security_context.clone(),
            tolerations: non_empty(deployment.tolerations.clone()),
            affinity: deployment.affinity.clone(),
            node_selector: non_empty_map(deployment.node_selector.clone()),
            ..Default::default()
        }),
    }
}

fn main_container(inputs: &PodInputs<'_>) -> Container {
    let deployment = &inputs.spec.deployment;
    let port = inputs.plan.port();

    let (command, args) = match inputs.plan {
        TransportPlan::Stdio(StdioPlan { command, args, .. }) => {
            (Some(command.clone()), Some(args.clone()))
        }
        TransportPlan::Http(_) => (
            deployment.cmd.clone().map(|c| vec![c]),
            non_empty(deployment.args.clone()),
        ),
    };

    let env_from = inputs.has_config_map.then(|| {
        vec![EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: inputs.name.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }]
    });

    let env = match inputs.plan {
        TransportPlan::Http(HttpPlan { tls: Some(tls), .. }) => {
            let mut env = Vec::new();
            if tls.secret_name.is_some() {
                env.push(env_var(ENV_TLS_CERT_FILE, tls_path(TLS_CERT_KEY)));
                env.push(env_var(ENV_TLS_KEY_FILE, tls_path(TLS_KEY_KEY)));
                if tls.has_ca {
                    env.push(env_var(ENV_TLS_CA_FILE, tls_path(TLS_CA_KEY)));
                }
            }
            if tls.insecure_skip_verify {
                env.push(env_var(ENV_TLS_INSECURE_SKIP_VERIFY, "true".to_string()));
            }
            non_empty(env)
        }
        TransportPlan::Http(_) | TransportPlan::Stdio(_) => None,
    };

    Container {
        name: MAIN_CONTAINER_NAME.to_string(),
        image: Some(inputs.refs.image.clone()),
        image_pull_policy: deployment.image_pull_policy.clone(),
        command,
        args,
        ports: Some(vec![ContainerPort {
            name: Some(MCP_PORT_NAME.to_string()),
            container_port: i32::from(port),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env,
        env_from,
        volume_mounts: non_empty(main_volume_mounts(inputs)),
        resources: deployment.resources.clone(),
        security_context: deployment.security_context.clone(),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                host: None,
                port: IntOrString::Int(i32::from(port)),
            }),
            period_seconds: Some(10),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn adapter_init_container(spec: &NormalizedSpec, plan: &StdioPlan) -> Container {
    let overrides = spec.deployment.init_container.clone().unwrap_or_default();
    Container {
        name: ADAPTER_INIT_CONTAINER_NAME.to_string(),
        image: Some(plan.adapter_image.clone()),
        image_pull_policy: overrides.image_pull_policy,
        command: Some(vec![
            "cp".to_string(),
            ADAPTER_SOURCE_PATH.to_string(),
            ADAPTER_BINARY_PATH.to_string(),
        ]),
        volume_mounts: Some(vec![adapter_mount()]),
        resources: overrides.resources,
        security_context: overrides.security_context,
        ..Default::default()
    }
}

/// Operator-generated volumes first, then user volumes in spec order
fn volumes(inputs: &PodInputs<'_>) -> Vec<Volume> {
    let deployment = &inputs.spec.deployment;
    let mut volumes = Vec::new();

    if let TransportPlan::Stdio(_) = inputs.plan {
        volumes.push(Volume {
            name: ADAPTER_VOLUME_NAME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
    }

    for name in inputs.spec.secret_ref_names() {
        volumes.push(Volume {
            name: secret_volume_name(name),
            secret: Some(SecretVolumeSource {
                secret_name: Some(name.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    for name in inputs.spec.config_map_ref_names() {
        volumes.push(Volume {
            name: config_map_volume_name(name),
            config_map: Some(ConfigMapVolumeSource {
                name: name.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    if let Some(secret) = tls_secret(inputs.plan) {
        volumes.push(Volume {
            name: TLS_VOLUME_NAME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    volumes.extend(deployment.volumes.iter().cloned());
    volumes
}

fn main_volume_mounts(inputs: &PodInputs<'_>) -> Vec<VolumeMount> {
    let mut mounts = Vec::new();

    if let TransportPlan::Stdio(_) = inputs.plan {
        mounts.push(adapter_mount());
    }

    for name in inputs.spec.secret_ref_names() {
        mounts.push(read_only_mount(
            secret_volume_name(name),
            format!("{SECRET_MOUNT_ROOT}/{name}"),
        ));
    }

    for name in inputs.spec.config_map_ref_names() {
        mounts.push(read_only_mount(
            config_map_volume_name(name),
            format!("{CONFIG_MAP_MOUNT_ROOT}/{name}"),
        ));
    }

    if tls_secret(inputs.plan).is_some() {
        mounts.push(read_only_mount(
            TLS_VOLUME_NAME.to_string(),
            TLS_MOUNT_PATH.to_string(),
        ));
    }

    mounts.extend(inputs.spec.deployment.volume_mounts.iter().cloned());
    mounts
}

fn tls_secret(plan: &TransportPlan) -> Option<&str> {
    match plan {
        TransportPlan::Http(HttpPlan { tls: Some(tls), .. }) => tls.secret_name.as_deref(),
        TransportPlan::Http(_) | TransportPlan::Stdio(_) => None,
    }
}

fn adapter_mount() -> VolumeMount {
    VolumeMount {
        name: ADAPTER_VOLUME_NAME.to_string(),
        mount_path: ADAPTER_MOUNT_PATH.to_string(),
        ..Default::default()
    }
}

fn read_only_mount(name: String, mount_path: String) -> VolumeMount {
    VolumeMount {
        name,
        mount_path,
        read_only: Some(true),
        ..Default::default()
    }
}

fn tls_path(key: &str) -> String {
    format!("{TLS_MOUNT_PATH}/{key}")
}

fn env_var(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

fn non_empty_map(map: BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    (!map.is_empty()).then_some(map)
}
