//! Reference resolution
//!
//! Verifies that everything an MCPServer points at exists in its namespace:
//! the image reference, `secretRefs`, `configMapRefs`, Secret and ConfigMap
//! volumes that are actually mounted, and the TLS Secret. Resolution is
//! all-or-nothing and stops at the first missing object. Nothing is cached
//! between passes; a reference that resolved last time is checked again.
//!
//! Only existence (and, for Secrets, key names) is recorded. Contents are
//! mounted by reference and never copied.

use std::collections::BTreeSet;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::conditions::Reason;
use crate::normalizer::{NormalizedSpec, Transport};
use crate::retry::{retry_with_backoff_if, RetryConfig};
use crate::Error;

/// Read-only lookups the resolver needs from the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReferenceLookup: Send + Sync {
    /// Key names of a Secret, or `None` if it does not exist
    async fn secret_keys(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeSet<String>>, Error>;

    /// Whether a ConfigMap exists
    async fn config_map_exists(&self, namespace: &str, name: &str) -> Result<bool, Error>;
}

/// Reference failure; surfaces as `ResolvedRefs=False`
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RefError {
    /// Condition reason
    pub reason: Reason,
    /// Message naming the object that failed
    pub message: String,
}

impl RefError {
    /// Create a reference error
    pub fn new(reason: Reason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// A Secret that was found, with the key names it holds
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedSecret {
    /// Secret name
    pub name: String,
    /// Keys present in `data` or `stringData`
    pub keys: BTreeSet<String>,
}

/// References verified during this pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedRefs {
    /// Image reference that passed the format check
    pub image: String,
    /// Secrets verified to exist
    pub secrets: BTreeSet<String>,
    /// ConfigMaps verified to exist
    pub config_maps: BTreeSet<String>,
    /// TLS Secret for the HTTP transport
    pub tls_secret: Option<ResolvedSecret>,
}

/// Resolve every reference in `spec`, in a fixed order
///
/// Order: image, `secretRefs`, `configMapRefs`, mounted volume sources, TLS
/// Secret. Transient lookup failures are retried per `retry`; exhaustion
/// yields `ReferenceLookupFailed`.
pub async fn resolve(
    spec: &NormalizedSpec,
    namespace: &str,
    lookup: &dyn ReferenceLookup,
    retry: &RetryConfig,
) -> Result<ResolvedRefs, RefError> {
    let image = &spec.deployment.image;
    validate_image(image)?;

    let mut resolved = ResolvedRefs {
        image: image.clone(),
        ..Default::default()
    };

    for name in spec.secret_ref_names() {
        require_secret(lookup, namespace, name, "secretRefs", retry, &mut resolved).await?;
    }

    for name in spec.config_map_ref_names() {
        require_config_map(lookup, namespace, name, "configMapRefs", retry, &mut resolved).await?;
    }

    for mount in &spec.deployment.volume_mounts {
        let Some(volume) = spec.deployment.volumes.iter().find(|v| v.name == mount.name) else {
            continue;
        };
        if let Some(source) = &volume.secret {
            if let (Some(name), false) = (&source.secret_name, source.optional.unwrap_or(false)) {
                let origin = format!("volume {:?}", volume.name);
                require_secret(lookup, namespace, name, &origin, retry, &mut resolved).await?;
            }
        }
        if let Some(source) = &volume.config_map {
            if !source.optional.unwrap_or(false) {
                let origin = format!("volume {:?}", volume.name);
                require_config_map(lookup, namespace, &source.name, &origin, retry, &mut resolved)
                    .await?;
            }
        }
    }

    if let Transport::Http(http) = &spec.transport {
        if let Some(name) = http.tls.as_ref().and_then(|t| t.secret_ref.as_deref()) {
            let keys = fetch_secret(lookup, namespace, name, "httpTransport.tls", retry).await?;
            resolved.secrets.insert(name.to_string());
            resolved.tls_secret = Some(ResolvedSecret {
                name: name.to_string(),
                keys,
            });
        }
    }

    debug!(
        secrets = resolved.secrets.len(),
        config_maps = resolved.config_maps.len(),
        tls = resolved.tls_secret.is_some(),
        "references resolved"
    );
    Ok(resolved)
}

async fn require_secret(
    lookup: &dyn ReferenceLookup,
    namespace: &str,
    name: &str,
    origin: &str,
    retry: &RetryConfig,
    resolved: &mut ResolvedRefs,
) -> Result<(), RefError> {
    if resolved.secrets.contains(name) {
        return Ok(());
    }
    fetch_secret(lookup, namespace, name, origin, retry).await?;
    resolved.secrets.insert(name.to_string());
    Ok(())
}

async fn fetch_secret(
    lookup: &dyn ReferenceLookup,
    namespace: &str,
    name: &str,
    origin: &str,
    retry: &RetryConfig,
) -> Result<BTreeSet<String>, RefError> {
    let found = retry_with_backoff_if(retry, "get_secret", Error::is_transient, || {
        lookup.secret_keys(namespace, name)
    })
    .await
    .map_err(|e| {
        RefError::new(
            Reason::ReferenceLookupFailed,
            format!("failed to read Secret {namespace}/{name}: {e}"),
        )
    })?;

    found.ok_or_else(|| {
        RefError::new(
            Reason::SecretNotFound,
            format!("Secret {namespace}/{name} referenced by {origin} not found"),
        )
    })
}

async fn require_config_map(
    lookup: &dyn ReferenceLookup,
    namespace: &str,
    name: &str,
    origin: &str,
    retry: &RetryConfig,
    resolved: &mut ResolvedRefs,
) -> Result<(), RefError> {
    if resolved.config_maps.contains(name) {
        return Ok(());
    }
    let exists = retry_with_backoff_if(retry, "get_configmap", Error::is_transient, || {
        lookup.config_map_exists(namespace, name)
    })
    .await
    .map_err(|e| {
        RefError::new(
            Reason::ReferenceLookupFailed,
            format!("failed to read ConfigMap {namespace}/{name}: {e}"),
        )
    })?;

    if !exists {
        return Err(RefError::new(
            Reason::ConfigMapNotFound,
            format!("ConfigMap {namespace}/{name} referenced by {origin} not found"),
        ));
    }
    resolved.config_maps.insert(name.to_string());
    Ok(())
}

/// Reject image references no registry could serve
///
/// Registry reachability is not probed here; an image that cannot be pulled
/// shows up as `Ready=False/PodsNotReady`.
fn validate_image(image: &str) -> Result<(), RefError> {
    if image.is_empty() {
        return Err(RefError::new(
            Reason::ImageNotFound,
            "deployment.image is empty",
        ));
    }

    if image.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(RefError::new(
            Reason::ImageNotFound,
            format!("image {image:?} contains invalid characters"),
        ));
    }

    const SHELL_METACHARS: &[char] = &['`', '|', ';', '&', '$', '>', '<', '(', ')', '{', '}'];
    if image.chars().any(|c| SHELL_METACHARS.contains(&c)) {
        return Err(RefError::new(
            Reason::ImageNotFound,
            format!("image {image:?} contains shell metacharacters"),
        ));
    }

    Ok(())
}
