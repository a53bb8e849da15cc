//! Condition aggregation for MCPServer status
//!
//! Four condition types form a dependency chain:
//! `Accepted → ResolvedRefs → Programmed → Ready`. A stage is only evaluated
//! when the stage before it is `True`; stages past the first non-`True` one are
//! written as `Unknown/Pending` so a stale `True` from an older generation is
//! never left behind.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::crd::{Condition, ConditionStatus, McpServerStatus};

/// Maximum number of conditions stored in status
pub const MAX_CONDITIONS: usize = 8;

/// Known condition types, in chain order
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConditionType {
    /// Spec passed semantic validation
    Accepted,
    /// All referenced objects exist
    ResolvedRefs,
    /// All child resources were applied
    Programmed,
    /// The Deployment reports its desired replicas available
    Ready,
}

impl ConditionType {
    /// All known types in dependency order
    pub const CHAIN: [ConditionType; 4] = [
        ConditionType::Accepted,
        ConditionType::ResolvedRefs,
        ConditionType::Programmed,
        ConditionType::Ready,
    ];

    /// Wire name of the condition type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::ResolvedRefs => "ResolvedRefs",
            Self::Programmed => "Programmed",
            Self::Ready => "Ready",
        }
    }

    fn rank(type_: &str) -> usize {
        Self::CHAIN
            .iter()
            .position(|t| t.as_str() == type_)
            .unwrap_or(Self::CHAIN.len())
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable condition reasons
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reason {
    /// Accepted=True
    Accepted,
    /// Cross-field validation failed
    InvalidConfig,
    /// Transport type and transport config disagree
    UnsupportedTransport,
    /// ResolvedRefs=True
    ResolvedRefs,
    /// Image reference is unusable
    ImageNotFound,
    /// A referenced Secret does not exist
    SecretNotFound,
    /// A referenced ConfigMap does not exist
    ConfigMapNotFound,
    /// The TLS Secret lacks `tls.crt` or `tls.key`
    InvalidTlsSecret,
    /// Lookups kept failing after retries
    ReferenceLookupFailed,
    /// Programmed=True
    Programmed,
    /// Applying the ServiceAccount failed
    ServiceAccountFailed,
    /// Applying the ConfigMap failed
    ConfigMapFailed,
    /// Applying the Deployment failed
    DeploymentFailed,
    /// Applying the Service failed
    ServiceFailed,
    /// Ready=True
    Ready,
    /// Desired replicas are not available yet
    PodsNotReady,
    /// Stage not evaluated because an earlier stage is not True
    Pending,
}

impl Reason {
    /// Wire name of the reason
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::InvalidConfig => "InvalidConfig",
            Self::UnsupportedTransport => "UnsupportedTransport",
            Self::ResolvedRefs => "ResolvedRefs",
            Self::ImageNotFound => "ImageNotFound",
            Self::SecretNotFound => "SecretNotFound",
            Self::ConfigMapNotFound => "ConfigMapNotFound",
            Self::InvalidTlsSecret => "InvalidTLSSecret",
            Self::ReferenceLookupFailed => "ReferenceLookupFailed",
            Self::Programmed => "Programmed",
            Self::ServiceAccountFailed => "ServiceAccountFailed",
            Self::ConfigMapFailed => "ConfigMapFailed",
            Self::DeploymentFailed => "DeploymentFailed",
            Self::ServiceFailed => "ServiceFailed",
            Self::Ready => "Ready",
            Self::PodsNotReady => "PodsNotReady",
            Self::Pending => "Pending",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating one stage
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    /// True or False
    pub status: ConditionStatus,
    /// Reason
    pub reason: Reason,
    /// Human-readable detail
    pub message: String,
}

impl Outcome {
    /// A stage that succeeded
    pub fn success(reason: Reason, message: impl Into<String>) -> Self {
        Self {
            status: ConditionStatus::True,
            reason,
            message: message.into(),
        }
    }

    /// A stage that failed
    pub fn failure(reason: Reason, message: impl Into<String>) -> Self {
        Self {
            status: ConditionStatus::False,
            reason,
            message: message.into(),
        }
    }

    /// Returns true if the stage succeeded
    pub fn is_success(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Outcomes of one reconcile pass, one slot per chain stage
///
/// `None` means the pass stopped before evaluating that stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassOutcome {
    /// Normalizer result
    pub accepted: Outcome,
    /// Resolver and transport selector result
    pub resolved_refs: Option<Outcome>,
    /// Child apply result
    pub programmed: Option<Outcome>,
    /// Deployment availability
    pub ready: Option<Outcome>,
}

impl PassOutcome {
    /// Start a pass record from the normalizer outcome
    pub fn new(accepted: Outcome) -> Self {
        Self {
            accepted,
            resolved_refs: None,
            programmed: None,
            ready: None,
        }
    }

    fn slot(&self, type_: ConditionType) -> Option<&Outcome> {
        match type_ {
            ConditionType::Accepted => Some(&self.accepted),
            ConditionType::ResolvedRefs => self.resolved_refs.as_ref(),
            ConditionType::Programmed => self.programmed.as_ref(),
            ConditionType::Ready => self.ready.as_ref(),
        }
    }

    /// Returns true if every stage of the chain succeeded
    pub fn is_ready(&self) -> bool {
        ConditionType::CHAIN
            .iter()
            .all(|t| self.slot(*t).is_some_and(Outcome::is_success))
    }
}

/// Conditions keyed by type
///
/// Guarantees unique types and keeps `lastTransitionTime` stable while a
/// condition's status does not change.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConditionSet {
    by_type: BTreeMap<String, Condition>,
}

impl ConditionSet {
    /// Build a set from a status condition list; later duplicates win
    pub fn from_conditions(conditions: &[Condition]) -> Self {
        let by_type = conditions
            .iter()
            .map(|c| (c.type_.clone(), c.clone()))
            .collect();
        Self { by_type }
    }

    /// Look up a condition by type
    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.by_type.get(type_)
    }

    /// Insert or replace a condition
    ///
    /// When the status matches the stored condition, the stored transition
    /// time is kept.
    pub fn set(&mut self, mut condition: Condition) {
        if let Some(existing) = self.by_type.get(&condition.type_) {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
        }
        self.by_type.insert(condition.type_.clone(), condition);
    }

    /// Number of conditions
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    /// Returns true if there are no conditions
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Chain types first in dependency order, then any other types by name,
    /// truncated to [`MAX_CONDITIONS`]
    pub fn into_conditions(self) -> Vec<Condition> {
        let mut conditions: Vec<Condition> = self.by_type.into_values().collect();
        conditions.sort_by(|a, b| {
            ConditionType::rank(&a.type_)
                .cmp(&ConditionType::rank(&b.type_))
                .then_with(|| a.type_.cmp(&b.type_))
        });
        conditions.truncate(MAX_CONDITIONS);
        conditions
    }
}

/// Fold a pass outcome into the next status
///
/// Every chain condition is rewritten with `generation`. Conditions of other
/// types already present in `previous` are carried over untouched.
pub fn aggregate(
    previous: Option<&McpServerStatus>,
    generation: i64,
    pass: &PassOutcome,
    now: DateTime<Utc>,
) -> McpServerStatus {
    let mut set = previous
        .map(|s| ConditionSet::from_conditions(&s.conditions))
        .unwrap_or_default();

    let mut blocked_by: Option<ConditionType> = None;
    for type_ in ConditionType::CHAIN {
        let (status, reason, message) = match (blocked_by, pass.slot(type_)) {
            (Some(upstream), _) => (
                ConditionStatus::Unknown,
                Reason::Pending,
                format!("Waiting for {upstream} to become True"),
            ),
            (None, Some(outcome)) => (outcome.status, outcome.reason, outcome.message.clone()),
            (None, None) => (
                ConditionStatus::Unknown,
                Reason::Pending,
                format!("{type_} has not been evaluated for generation {generation}"),
            ),
        };

        if status != ConditionStatus::True && blocked_by.is_none() {
            blocked_by = Some(type_);
        }

        set.set(Condition {
            type_: type_.as_str().to_string(),
            status,
            reason: reason.as_str().to_string(),
            message,
            observed_generation: generation,
            last_transition_time: now,
        });
    }

    McpServerStatus {
        conditions: set.into_conditions(),
        observed_generation: generation,
    }
}
