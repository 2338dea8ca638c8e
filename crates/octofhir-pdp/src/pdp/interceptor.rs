//! Interception hooks around the decision pipeline.
//!
//! Interceptors are synchronous and run inline on the decision stream, in
//! registration order. They exist for logging and auditing:
//! - subscription interceptors see every subscription before it is decided
//! - decision interceptors see every decision after deduplication

use super::PdpDecision;
use crate::decision::AuthorizationSubscription;

// ============================================================================
// Interceptor Traits
// ============================================================================

/// Hook applied to inbound subscriptions.
pub trait SubscriptionInterceptor: Send + Sync {
    /// Unique name for this interceptor (for logging).
    fn name(&self) -> &str;

    fn intercept(&self, subscription: AuthorizationSubscription) -> AuthorizationSubscription;
}

/// Hook applied to outbound decisions.
///
/// Implementations must not change the decision itself; they may annotate
/// or record it.
pub trait DecisionInterceptor: Send + Sync {
    /// Unique name for this interceptor (for logging).
    fn name(&self) -> &str;

    fn intercept(&self, decision: PdpDecision) -> PdpDecision;
}

// ============================================================================
// Built-in Interceptors
// ============================================================================

/// Logs every emitted decision at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDecisionInterceptor;

impl DecisionInterceptor for TracingDecisionInterceptor {
    fn name(&self) -> &str {
        "tracing"
    }

    fn intercept(&self, decision: PdpDecision) -> PdpDecision {
        tracing::debug!(
            decision = %decision.authorization_decision().decision,
            algorithm = ?decision.algorithm(),
            documents = ?decision.matching_documents,
            obligations = decision.authorization_decision().obligations.len(),
            timestamp = %decision.timestamp,
            "Authorization decision"
        );
        decision
    }
}
