//! Subscription and decision types exchanged with callers.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

// =============================================================================
// Subscriptions
// =============================================================================

/// The four elements of an authorization subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionElement {
    Subject,
    Action,
    Resource,
    Environment,
}

/// A subject/action/resource/environment tuple to be decided.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationSubscription {
    #[serde(default)]
    pub subject: Json,
    #[serde(default)]
    pub action: Json,
    #[serde(default)]
    pub resource: Json,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub environment: Json,
}

impl AuthorizationSubscription {
    /// Create a subscription without environment.
    pub fn new(subject: Json, action: Json, resource: Json) -> Self {
        Self {
            subject,
            action,
            resource,
            environment: Json::Null,
        }
    }

    #[must_use]
    pub fn with_environment(mut self, environment: Json) -> Self {
        self.environment = environment;
        self
    }

    /// Access one element of the subscription.
    pub fn element(&self, element: SubscriptionElement) -> &Json {
        match element {
            SubscriptionElement::Subject => &self.subject,
            SubscriptionElement::Action => &self.action,
            SubscriptionElement::Resource => &self.resource,
            SubscriptionElement::Environment => &self.environment,
        }
    }
}

/// A set of subscriptions, each under a caller chosen id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiAuthorizationSubscription {
    #[serde(default)]
    pub subscriptions: IndexMap<String, AuthorizationSubscription>,
}

impl MultiAuthorizationSubscription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription under `id`, replacing an earlier one with the same id.
    #[must_use]
    pub fn with(mut self, id: impl Into<String>, subscription: AuthorizationSubscription) -> Self {
        self.subscriptions.insert(id.into(), subscription);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }
}

// =============================================================================
// Decisions
// =============================================================================

/// The four possible outcomes of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Permit,
    Deny,
    Indeterminate,
    NotApplicable,
}

impl Decision {
    /// `true` for everything except NOT_APPLICABLE.
    pub fn is_applicable(self) -> bool {
        !matches!(self, Self::NotApplicable)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Permit => "PERMIT",
            Self::Deny => "DENY",
            Self::Indeterminate => "INDETERMINATE",
            Self::NotApplicable => "NOT_APPLICABLE",
        })
    }
}

/// A decision together with its constraints and an optional transformed
/// resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationDecision {
    pub decision: Decision,

    /// Replacement for the resource, if a policy transformed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Json>,

    /// Constraints the enforcement point must fulfil.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obligations: Vec<Json>,

    /// Constraints the enforcement point should try to fulfil.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advice: Vec<Json>,
}

impl AuthorizationDecision {
    pub fn new(decision: Decision) -> Self {
        Self {
            decision,
            resource: None,
            obligations: Vec::new(),
            advice: Vec::new(),
        }
    }

    pub fn permit() -> Self {
        Self::new(Decision::Permit)
    }

    pub fn deny() -> Self {
        Self::new(Decision::Deny)
    }

    pub fn indeterminate() -> Self {
        Self::new(Decision::Indeterminate)
    }

    pub fn not_applicable() -> Self {
        Self::new(Decision::NotApplicable)
    }

    #[must_use]
    pub fn with_obligations(mut self, obligations: Vec<Json>) -> Self {
        self.obligations = obligations;
        self
    }

    #[must_use]
    pub fn with_advice(mut self, advice: Vec<Json>) -> Self {
        self.advice = advice;
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource: Json) -> Self {
        self.resource = Some(resource);
        self
    }
}

/// A decision for one subscription of a multi-subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifiableAuthorizationDecision {
    /// `None` only for the indeterminate answer to an empty multi-subscription.
    pub subscription_id: Option<String>,
    pub decision: AuthorizationDecision,
}

impl IdentifiableAuthorizationDecision {
    pub fn new(subscription_id: impl Into<String>, decision: AuthorizationDecision) -> Self {
        Self {
            subscription_id: Some(subscription_id.into()),
            decision,
        }
    }

    /// Answer to a multi-subscription without any subscription.
    pub fn indeterminate() -> Self {
        Self {
            subscription_id: None,
            decision: AuthorizationDecision::indeterminate(),
        }
    }
}

/// Aggregate snapshot of the latest decision for every subscription id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiAuthorizationDecision {
    pub decisions: IndexMap<String, AuthorizationDecision>,
}

impl MultiAuthorizationDecision {
    /// Answer to a multi-subscription without any subscription: a single
    /// INDETERMINATE entry under the empty id.
    pub fn indeterminate() -> Self {
        let mut decisions = IndexMap::new();
        decisions.insert(String::new(), AuthorizationDecision::indeterminate());
        Self { decisions }
    }

    pub fn get(&self, subscription_id: &str) -> Option<&AuthorizationDecision> {
        self.decisions.get(subscription_id)
    }

    pub fn set(&mut self, subscription_id: impl Into<String>, decision: AuthorizationDecision) {
        self.decisions.insert(subscription_id.into(), decision);
    }
}

impl FromIterator<IdentifiableAuthorizationDecision> for MultiAuthorizationDecision {
    fn from_iter<I: IntoIterator<Item = IdentifiableAuthorizationDecision>>(iter: I) -> Self {
        let mut multi = Self::default();
        for item in iter {
            multi.set(item.subscription_id.unwrap_or_default(), item.decision);
        }
        multi
    }
}
