//! MCPServer controller implementation
//!
//! One reconcile pass runs the whole pipeline for one MCPServer:
//!
//! ```text
//! normalize → resolve refs → select transport → compile → apply children
//!           → check rollout → aggregate conditions → patch status
//! ```
//!
//! Each stage feeds the next condition in the chain. A stage that fails stops
//! the pass; later conditions are reported as pending. Every child write is a
//! get-then-create-or-update unit retried on transient API errors. Children
//! that exist but are not controlled by this MCPServer are never overwritten.

use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, info, instrument, warn};

use crate::compiler::{ChildKind, ChildResource, CompiledResources, ResourceCompiler};
use crate::conditions::{aggregate, Outcome, PassOutcome, Reason};
use crate::config::OperatorConfig;
use crate::crd::{McpServer, McpServerSpec};
use crate::normalizer::normalize;
use crate::ownership::Owner;
use crate::resolver::{self, ReferenceLookup};
use crate::retry::retry_with_backoff_if;
use crate::transport;
use crate::Error;

use super::client::{KubeClientImpl, McpServerKubeClient};
use super::diff;

/// Requeue delay after a reconcile error
pub const ERROR_REQUEUE: std::time::Duration = std::time::Duration::from_secs(30);

/// Controller context shared by every reconcile pass
pub struct Context {
    /// Child resource and status operations (trait object for testability)
    pub kube: Arc<dyn McpServerKubeClient>,
    /// Secret and ConfigMap lookups for reference resolution
    pub refs: Arc<dyn ReferenceLookup>,
    /// Operator configuration
    pub config: OperatorConfig,
}

impl Context {
    /// Create a context backed by a real Kubernetes client
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        let kube = Arc::new(KubeClientImpl::new(client));
        Self {
            kube: kube.clone(),
            refs: kube,
            config,
        }
    }

    /// Create a context from explicit clients
    pub fn with_clients(
        kube: Arc<dyn McpServerKubeClient>,
        refs: Arc<dyn ReferenceLookup>,
        config: OperatorConfig,
    ) -> Self {
        Self { kube, refs, config }
    }
}

/// Reconcile an MCPServer resource
///
/// Status is written only when the aggregated conditions differ from what is
/// already stored, so a converged server costs one read per child and no
/// writes.
#[instrument(
    skip(server, ctx),
    fields(server = %server.name_any(), namespace = %server.namespace().unwrap_or_default())
)]
pub async fn reconcile(server: Arc<McpServer>, ctx: Arc<Context>) -> Result<Action, Error> {
    let owner = Owner::from_server(&server)?;
    let generation = server.metadata.generation.unwrap_or_default();
    debug!(generation, "reconciling MCPServer");

    let (pass, action) = run_pass(&server.spec, &owner, &ctx).await;

    let now = Utc::now().trunc_subsecs(0);
    let status = aggregate(server.status.as_ref(), generation, &pass, now);

    if server.status.as_ref() == Some(&status) {
        debug!("status unchanged");
    } else {
        let kube = ctx.kube.as_ref();
        let (namespace, name) = (owner.namespace.as_str(), owner.name.as_str());
        retry_with_backoff_if(&ctx.config.retry, "patch_status", Error::is_transient, || {
            kube.patch_status(namespace, name, &status)
        })
        .await?;
        info!(ready = pass.is_ready(), "status updated");
    }

    Ok(action)
}

/// Requeue after a failed reconcile
pub fn error_policy(server: Arc<McpServer>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(
        error = %error,
        server = %server.name_any(),
        "reconciliation failed"
    );
    Action::requeue(ERROR_REQUEUE)
}

/// Run every stage that can run and pick the requeue interval
async fn run_pass(spec: &McpServerSpec, owner: &Owner, ctx: &Context) -> (PassOutcome, Action) {
    let requeue = &ctx.config.requeue;

    let normalized = match normalize(spec) {
        Ok(normalized) => normalized,
        Err(e) => {
            warn!(error = %e, "spec rejected");
            let pass = PassOutcome::new(Outcome::failure(e.reason(), e.to_string()));
            return (pass, Action::await_change());
        }
    };
    let mut pass = PassOutcome::new(Outcome::success(Reason::Accepted, "spec accepted"));

    let resolved = match resolver::resolve(
        &normalized,
        &owner.namespace,
        ctx.refs.as_ref(),
        &ctx.config.retry,
    )
    .await
    {
        Ok(refs) => transport::select(&normalized, &refs, &ctx.config).map(|plan| (refs, plan)),
        Err(e) => Err(e),
    };
    let (refs, plan) = match resolved {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!(reason = %e.reason, error = %e.message, "references not resolved");
            pass.resolved_refs = Some(Outcome::failure(e.reason, e.message));
            return (pass, Action::requeue(requeue.refs_failed));
        }
    };
    pass.resolved_refs = Some(Outcome::success(
        Reason::ResolvedRefs,
        "all references resolved",
    ));

    let compiled = ResourceCompiler::new(owner, &normalized, &refs, &plan).compile();

    let deployment = match apply_children(owner, &compiled, ctx).await {
        Ok(deployment) => deployment,
        Err(failure) => {
            warn!(kind = %failure.kind, error = %failure.error, "apply failed");
            pass.programmed = Some(Outcome::failure(
                failure.kind.failure_reason(),
                format!(
                    "failed to apply {} {}/{}: {}",
                    failure.kind, owner.namespace, owner.name, failure.error
                ),
            ));
            return (pass, Action::requeue(requeue.apply_failed));
        }
    };
    pass.programmed = Some(Outcome::success(
        Reason::Programmed,
        format!("{} resources applied", compiled.resource_count()),
    ));

    let ready = deployment_readiness(&deployment, normalized.replicas);
    let delay = if ready.is_success() {
        requeue.ready
    } else {
        requeue.not_ready
    };
    pass.ready = Some(ready);
    (pass, Action::requeue(delay))
}

/// A child write that failed after retries
struct ApplyFailure {
    kind: ChildKind,
    error: Error,
}

/// Apply desired children in order, then remove children no longer desired
///
/// Returns the Deployment as stored after the write, for the readiness check.
async fn apply_children(
    owner: &Owner,
    compiled: &CompiledResources,
    ctx: &Context,
) -> Result<Deployment, ApplyFailure> {
    let mut deployment = None;
    let mut unwanted = Vec::new();

    for (kind, desired) in compiled.children() {
        let Some(desired) = desired else {
            unwanted.push(kind);
            continue;
        };
        let applied = sync_child(owner, &desired, ctx)
            .await
            .map_err(|error| ApplyFailure { kind, error })?;
        if let ChildResource::Deployment(d) = applied {
            deployment = Some(d);
        }
    }

    // Deletes run after every apply so a pod never references a missing object
    for kind in unwanted {
        prune_child(owner, kind, ctx)
            .await
            .map_err(|error| ApplyFailure { kind, error })?;
    }

    deployment.ok_or(ApplyFailure {
        kind: ChildKind::Deployment,
        error: Error::validation("no Deployment was rendered"),
    })
}

/// Create or update one child and return it as stored
async fn sync_child(
    owner: &Owner,
    desired: &ChildResource,
    ctx: &Context,
) -> Result<ChildResource, Error> {
    let kube = ctx.kube.as_ref();
    let kind = desired.kind();
    let (namespace, name) = (owner.namespace.as_str(), owner.name.as_str());
    let stamped = diff::with_spec_hash(desired)?;
    let desired = &stamped;

    retry_with_backoff_if(&ctx.config.retry, "apply_child", Error::is_transient, || async move {
        let Some(observed) = kube.get_child(kind, namespace, name).await? else {
            info!(%kind, "creating child resource");
            return kube.create_child(desired).await;
        };

        if !owner.controls(observed.meta()) {
            return Err(Error::conflict(format!(
                "{kind} {} exists and is not controlled by this MCPServer",
                observed.display_name()
            )));
        }

        if !diff::needs_update(desired, &observed)? {
            debug!(%kind, "child resource up to date");
            return Ok(observed);
        }

        let mut update = desired.clone();
        update.meta_mut().resource_version = observed.meta().resource_version.clone();
        info!(%kind, "updating child resource");
        kube.update_child(&update).await
    })
    .await
}

/// Delete a child this MCPServer controls; leave anything else alone
async fn prune_child(owner: &Owner, kind: ChildKind, ctx: &Context) -> Result<(), Error> {
    let kube = ctx.kube.as_ref();
    let (namespace, name) = (owner.namespace.as_str(), owner.name.as_str());

    retry_with_backoff_if(&ctx.config.retry, "prune_child", Error::is_transient, || async move {
        let Some(observed) = kube.get_child(kind, namespace, name).await? else {
            return Ok(());
        };
        if !owner.controls(observed.meta()) {
            debug!(%kind, "leaving child resource not controlled by this MCPServer");
            return Ok(());
        }
        let Some(uid) = observed.meta().uid.as_deref() else {
            return Ok(());
        };
        info!(%kind, "deleting child resource no longer desired");
        kube.delete_child(kind, namespace, name, uid).await
    })
    .await
}

/// Ready when the current rollout is observed and enough replicas are available
fn deployment_readiness(deployment: &Deployment, replicas: i32) -> Outcome {
    let generation = deployment.metadata.generation.unwrap_or_default();
    let status = deployment.status.clone().unwrap_or_default();
    let observed = status.observed_generation.unwrap_or_default();
    let available = status.available_replicas.unwrap_or_default();

    if observed < generation {
        return Outcome::failure(
            Reason::PodsNotReady,
            format!("Deployment generation {generation} not yet observed"),
        );
    }

    let message = format!("{available}/{replicas} replicas available");
    if available >= replicas {
        Outcome::success(Reason::Ready, message)
    } else {
        Outcome::failure(Reason::PodsNotReady, message)
    }
}
