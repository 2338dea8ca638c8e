//! Embedded policy decision point.
//!
//! The decision pipeline for one subscription is a chain of plain stream
//! adapters:
//!
//! ```text
//! configurations ──switch_map──▶ index matches ──switch_map──▶ combine(document bodies)
//!        ──▶ distinct_until_changed ──▶ decision interceptors
//! ```
//!
//! A new configuration restarts matching, a new index snapshot restarts body
//! evaluation, and dropping the returned stream drops everything upstream of
//! it. Nothing runs detached from the consumer.

mod interceptor;

pub use interceptor::{DecisionInterceptor, SubscriptionInterceptor, TracingDecisionInterceptor};

use std::sync::Arc;

use arc_swap::ArcSwap;
use futures_util::stream::{self, BoxStream, StreamExt};
use time::OffsetDateTime;

use crate::attributes::AttributeProvider;
use crate::combining::{CombinedDecision, CombiningAlgorithm, combine_documents};
use crate::config::{ConfigurationProvider, PdpConfig, PdpConfiguration};
use crate::context::EvaluationContext;
use crate::decision::{
    AuthorizationDecision, AuthorizationSubscription, IdentifiableAuthorizationDecision,
    MultiAuthorizationDecision, MultiAuthorizationSubscription,
};
use crate::prp::PolicyRetrievalPoint;
use crate::stream::{combine_latest, distinct_until_changed_by, just, switch_map};

/// A decision with the trace it was derived from.
#[derive(Debug, Clone)]
pub struct PdpDecision {
    pub subscription: Arc<AuthorizationSubscription>,
    pub decision: AuthorizationDecision,
    /// Output of the combining algorithm; `None` when the configuration was
    /// invalid and no algorithm ran.
    pub combined: Option<CombinedDecision>,
    /// Ids of the documents whose target matched, in load order.
    pub matching_documents: Vec<String>,
    pub error: Option<String>,
    pub timestamp: OffsetDateTime,
}

impl PdpDecision {
    fn from_combined(
        subscription: Arc<AuthorizationSubscription>,
        combined: CombinedDecision,
        matching_documents: Vec<String>,
    ) -> Self {
        Self {
            subscription,
            decision: combined.decision.clone(),
            error: combined.error.clone(),
            combined: Some(combined),
            matching_documents,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    fn invalid_configuration(subscription: Arc<AuthorizationSubscription>, reason: &str) -> Self {
        Self {
            subscription,
            decision: AuthorizationDecision::indeterminate(),
            combined: None,
            matching_documents: Vec::new(),
            error: Some(reason.to_string()),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn authorization_decision(&self) -> &AuthorizationDecision {
        &self.decision
    }

    pub fn algorithm(&self) -> Option<CombiningAlgorithm> {
        self.combined.as_ref().map(|c| c.algorithm)
    }
}

/// Policy decision point evaluating subscriptions in-process.
pub struct EmbeddedPolicyDecisionPoint {
    prp: Arc<PolicyRetrievalPoint>,
    configuration: Arc<ConfigurationProvider>,
    attributes: Arc<dyn AttributeProvider>,
    subscription_interceptors: ArcSwap<Vec<Arc<dyn SubscriptionInterceptor>>>,
    decision_interceptors: ArcSwap<Vec<Arc<dyn DecisionInterceptor>>>,
}

impl EmbeddedPolicyDecisionPoint {
    pub fn new(
        prp: Arc<PolicyRetrievalPoint>,
        configuration: Arc<ConfigurationProvider>,
        attributes: Arc<dyn AttributeProvider>,
    ) -> Self {
        Self {
            prp,
            configuration,
            attributes,
            subscription_interceptors: ArcSwap::from_pointee(Vec::new()),
            decision_interceptors: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Build a decision point from operator configuration.
    ///
    /// Registers the tracing interceptor when `log_decisions` is set.
    pub fn from_config(
        config: &PdpConfig,
        prp: Arc<PolicyRetrievalPoint>,
        attributes: Arc<dyn AttributeProvider>,
    ) -> Self {
        let configuration = Arc::new(ConfigurationProvider::new(config.resolve()));
        let pdp = Self::new(prp, configuration, attributes);
        if config.log_decisions {
            pdp.register_decision_interceptor(Arc::new(TracingDecisionInterceptor));
        }
        pdp
    }

    pub fn prp(&self) -> &Arc<PolicyRetrievalPoint> {
        &self.prp
    }

    pub fn configuration(&self) -> &Arc<ConfigurationProvider> {
        &self.configuration
    }

    pub fn register_subscription_interceptor(&self, interceptor: Arc<dyn SubscriptionInterceptor>) {
        tracing::info!(interceptor = interceptor.name(), "Registered subscription interceptor");
        self.subscription_interceptors.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&interceptor));
            next
        });
    }

    pub fn register_decision_interceptor(&self, interceptor: Arc<dyn DecisionInterceptor>) {
        tracing::info!(interceptor = interceptor.name(), "Registered decision interceptor");
        self.decision_interceptors.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&interceptor));
            next
        });
    }

    /// Continuously decide `subscription`.
    pub fn decide(&self, subscription: AuthorizationSubscription) -> BoxStream<'static, AuthorizationDecision> {
        self.decide_traced(subscription)
            .map(|traced| traced.decision)
            .boxed()
    }

    /// First decision for `subscription`.
    pub async fn decide_once(&self, subscription: AuthorizationSubscription) -> AuthorizationDecision {
        self.decide(subscription)
            .next()
            .await
            .unwrap_or_else(AuthorizationDecision::indeterminate)
    }

    /// Continuously decide `subscription`, keeping the evaluation trace.
    ///
    /// Consecutive emissions never carry the same authorization decision.
    pub fn decide_traced(&self, subscription: AuthorizationSubscription) -> BoxStream<'static, PdpDecision> {
        let subscription = Arc::new(
            self.subscription_interceptors
                .load()
                .iter()
                .fold(subscription, |s, interceptor| interceptor.intercept(s)),
        );
        let prp = Arc::clone(&self.prp);
        let attributes = Arc::clone(&self.attributes);
        let interceptors = self.decision_interceptors.load_full();

        let decisions = switch_map(self.configuration.configurations(), move |configuration| {
            evaluate(Arc::clone(&subscription), &configuration, &prp, &attributes)
        });
        distinct_until_changed_by(decisions, |traced: &PdpDecision| traced.decision.clone())
            .map(move |traced| {
                interceptors
                    .iter()
                    .fold(traced, |d, interceptor| interceptor.intercept(d))
            })
            .boxed()
    }

    /// Decide every subscription independently; each emission carries the
    /// id of the subscription it belongs to.
    pub fn decide_multi(
        &self,
        multi: MultiAuthorizationSubscription,
    ) -> BoxStream<'static, IdentifiableAuthorizationDecision> {
        if multi.is_empty() {
            return just(IdentifiableAuthorizationDecision::indeterminate());
        }
        stream::select_all(self.identifiable(multi)).boxed()
    }

    /// Decide every subscription and emit the latest decision of all of them
    /// whenever any one changes.
    pub fn decide_all(
        &self,
        multi: MultiAuthorizationSubscription,
    ) -> BoxStream<'static, MultiAuthorizationDecision> {
        if multi.is_empty() {
            return just(MultiAuthorizationDecision::indeterminate());
        }
        combine_latest(self.identifiable(multi))
            .map(|decisions| decisions.into_iter().collect())
            .boxed()
    }

    fn identifiable(
        &self,
        multi: MultiAuthorizationSubscription,
    ) -> Vec<BoxStream<'static, IdentifiableAuthorizationDecision>> {
        multi
            .subscriptions
            .into_iter()
            .map(|(id, subscription)| {
                self.decide(subscription)
                    .map(move |decision| IdentifiableAuthorizationDecision::new(id.clone(), decision))
                    .boxed()
            })
            .collect()
    }
}

/// Decisions for one subscription under one configuration snapshot.
fn evaluate(
    subscription: Arc<AuthorizationSubscription>,
    configuration: &PdpConfiguration,
    prp: &PolicyRetrievalPoint,
    attributes: &Arc<dyn AttributeProvider>,
) -> BoxStream<'static, PdpDecision> {
    let algorithm = match configuration.algorithm() {
        Ok(algorithm) => algorithm,
        Err(reason) => return just(PdpDecision::invalid_configuration(subscription, reason)),
    };
    let ctx = EvaluationContext::new(
        Arc::clone(&subscription),
        Arc::clone(configuration.variables()),
        Arc::clone(attributes),
    );

    switch_map(prp.retrieve(ctx.clone()), move |retrieval| {
        let ids: Vec<String> = retrieval.documents.iter().map(|d| d.id.clone()).collect();
        if retrieval.errors_in_target {
            tracing::debug!(version = retrieval.version, "Target evaluation failed");
            return just(PdpDecision::from_combined(
                Arc::clone(&subscription),
                CombinedDecision::indeterminate(algorithm, "Error in target expression"),
                ids,
            ));
        }
        let bodies = retrieval
            .documents
            .iter()
            .map(|document| document.evaluate(&ctx))
            .collect();
        let subscription = Arc::clone(&subscription);
        combine_documents(algorithm, bodies)
            .map(move |combined| PdpDecision::from_combined(Arc::clone(&subscription), combined, ids.clone()))
            .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::NoAttributes;
    use crate::decision::Decision;
    use crate::document::{Document, Entitlement, Policy};
    use crate::expr::Expr;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    fn pdp(documents: Vec<Document>) -> EmbeddedPolicyDecisionPoint {
        let (prp, _) = PolicyRetrievalPoint::with_documents(documents).unwrap();
        EmbeddedPolicyDecisionPoint::new(
            Arc::new(prp),
            Arc::new(ConfigurationProvider::default()),
            Arc::new(NoAttributes),
        )
    }

    fn subscription(action: &str) -> AuthorizationSubscription {
        AuthorizationSubscription::new(json!({"name": "alice"}), json!(action), json!({}))
    }

    async fn next<T>(s: &mut BoxStream<'static, T>) -> T {
        timeout(Duration::from_secs(1), s.next())
            .await
            .expect("no decision in time")
            .expect("stream ended")
    }

    struct Counting(AtomicUsize);

    impl DecisionInterceptor for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn intercept(&self, decision: PdpDecision) -> PdpDecision {
            self.0.fetch_add(1, Ordering::SeqCst);
            decision
        }
    }

    struct ForceAction(&'static str);

    impl SubscriptionInterceptor for ForceAction {
        fn name(&self) -> &str {
            "force-action"
        }

        fn intercept(&self, mut subscription: AuthorizationSubscription) -> AuthorizationSubscription {
            subscription.action = json!(self.0);
            subscription
        }
    }

    fn read_only() -> Document {
        Document::policy(
            "read",
            Policy::new("read", Entitlement::Permit)
                .with_target(Expr::equals(Expr::action(""), Expr::constant(json!("read")))),
        )
    }

    #[tokio::test]
    async fn test_traced_decision_lists_matching_documents() {
        let pdp = pdp(vec![read_only()]);
        let mut decisions = pdp.decide_traced(subscription("read"));
        let traced = next(&mut decisions).await;
        assert_eq!(traced.decision.decision, Decision::Permit);
        assert_eq!(traced.matching_documents, vec!["read".to_string()]);
        assert_eq!(traced.algorithm(), Some(CombiningAlgorithm::DenyOverrides));
    }

    #[tokio::test]
    async fn test_no_match_is_not_applicable() {
        let pdp = pdp(vec![read_only()]);
        let decision = pdp.decide_once(subscription("write")).await;
        assert_eq!(decision.decision, Decision::NotApplicable);
    }

    #[tokio::test]
    async fn test_configuration_change_restarts_evaluation() {
        let pdp = pdp(vec![read_only()]);
        let mut decisions = pdp.decide(subscription("read"));
        assert_eq!(next(&mut decisions).await.decision, Decision::Permit);

        pdp.configuration()
            .update(PdpConfiguration::invalid("unknown algorithm", Arc::default()));
        assert_eq!(next(&mut decisions).await.decision, Decision::Indeterminate);

        pdp.configuration().update(PdpConfiguration::default());
        assert_eq!(next(&mut decisions).await.decision, Decision::Permit);
    }

    #[tokio::test]
    async fn test_interceptors_run_in_order() {
        let pdp = pdp(vec![read_only()]);
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        pdp.register_decision_interceptor(counter.clone());
        pdp.register_subscription_interceptor(Arc::new(ForceAction("read")));

        let decision = pdp.decide_once(subscription("delete")).await;
        assert_eq!(decision.decision, Decision::Permit);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_decide_multi_tags_ids() {
        let pdp = pdp(vec![read_only()]);
        let multi = MultiAuthorizationSubscription::new()
            .with("r", subscription("read"))
            .with("w", subscription("write"));
        let mut decisions = pdp.decide_multi(multi);
        let mut seen = vec![next(&mut decisions).await, next(&mut decisions).await];
        seen.sort_by(|a, b| a.subscription_id.cmp(&b.subscription_id));
        assert_eq!(seen[0].subscription_id.as_deref(), Some("r"));
        assert_eq!(seen[0].decision.decision, Decision::Permit);
        assert_eq!(seen[1].decision.decision, Decision::NotApplicable);

        let mut empty = pdp.decide_multi(MultiAuthorizationSubscription::new());
        let only = next(&mut empty).await;
        assert!(only.subscription_id.is_none());
        assert_eq!(only.decision.decision, Decision::Indeterminate);
    }
}
