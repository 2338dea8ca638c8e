//! Subscription scoped evaluation context.

use std::fmt;
use std::sync::Arc;

use serde_json::Value as Json;

use crate::attributes::AttributeProvider;
use crate::decision::AuthorizationSubscription;

/// Global policy variables, keyed by name.
pub type Variables = serde_json::Map<String, Json>;

/// Everything an expression may read while being evaluated for one
/// subscription. Cheap to clone.
#[derive(Clone)]
pub struct EvaluationContext {
    subscription: Arc<AuthorizationSubscription>,
    variables: Arc<Variables>,
    attributes: Arc<dyn AttributeProvider>,
}

impl EvaluationContext {
    pub fn new(
        subscription: Arc<AuthorizationSubscription>,
        variables: Arc<Variables>,
        attributes: Arc<dyn AttributeProvider>,
    ) -> Self {
        Self {
            subscription,
            variables,
            attributes,
        }
    }

    pub fn subscription(&self) -> &AuthorizationSubscription {
        &self.subscription
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Json> {
        self.variables.get(name)
    }

    pub fn attributes(&self) -> &Arc<dyn AttributeProvider> {
        &self.attributes
    }
}

impl fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("subscription", &self.subscription)
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
