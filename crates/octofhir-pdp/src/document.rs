//! Policy documents and their body evaluation.
//!
//! A document is either a single policy or a policy set. Its `target` is
//! compiled into the canonical index; everything else (condition,
//! constraints, nested policies) is evaluated as a stream only once the
//! target matched.
//!
//! ```json
//! {
//!   "id": "patients-read",
//!   "policy": {
//!     "name": "doctors may read patients",
//!     "target": {"eq": [{"subscription": {"element": "action"}}, {"const": "read"}]},
//!     "entitlement": "permit",
//!     "condition": {"in": {"needle": {"const": "doctor"},
//!                          "haystack": {"subscription": {"element": "subject", "path": "/roles"}}}},
//!     "obligations": [{"const": {"type": "log"}}]
//!   }
//! }
//! ```

use std::sync::Arc;

use futures_util::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::combining::CombiningAlgorithm;
use crate::context::EvaluationContext;
use crate::decision::{AuthorizationDecision, Decision};
use crate::expr::Expr;
use crate::stream::{combine_latest, just, switch_map};
use crate::value::Value;

/// The unit of policy held by the retrieval point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(flatten)]
    pub element: PolicyElement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyElement {
    Policy(Arc<Policy>),
    PolicySet(Arc<PolicySet>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Entitlement {
    Permit,
    Deny,
}

impl Entitlement {
    pub fn decision(self) -> Decision {
        match self {
            Self::Permit => Decision::Permit,
            Self::Deny => Decision::Deny,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Expr>,
    pub entitlement: Entitlement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Expr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obligations: Vec<Expr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advice: Vec<Expr>,
    /// Replacement resource handed to the enforcement point on PERMIT/DENY.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySet {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Expr>,
    pub algorithm: CombiningAlgorithm,
    #[serde(default)]
    pub policies: Vec<Arc<Policy>>,
}

/// Decision of one document, with the trace of nested policies for sets.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEvaluationResult {
    pub document: String,
    pub decision: AuthorizationDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<CombiningAlgorithm>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nested: Vec<DocumentEvaluationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentEvaluationResult {
    pub fn new(document: impl Into<String>, decision: AuthorizationDecision) -> Self {
        Self {
            document: document.into(),
            decision,
            algorithm: None,
            nested: Vec::new(),
            error: None,
        }
    }

    pub fn indeterminate(document: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(document, AuthorizationDecision::indeterminate())
        }
    }
}

impl Document {
    pub fn policy(id: impl Into<String>, policy: Policy) -> Self {
        Self {
            id: id.into(),
            element: PolicyElement::Policy(Arc::new(policy)),
        }
    }

    pub fn policy_set(id: impl Into<String>, set: PolicySet) -> Self {
        Self {
            id: id.into(),
            element: PolicyElement::PolicySet(Arc::new(set)),
        }
    }

    pub fn name(&self) -> &str {
        match &self.element {
            PolicyElement::Policy(policy) => &policy.name,
            PolicyElement::PolicySet(set) => &set.name,
        }
    }

    /// Target expression; `None` matches every subscription.
    pub fn target(&self) -> Option<&Expr> {
        match &self.element {
            PolicyElement::Policy(policy) => policy.target.as_ref(),
            PolicyElement::PolicySet(set) => set.target.as_ref(),
        }
    }

    /// Continuously evaluate the document body. Assumes the target matched.
    pub fn evaluate(&self, ctx: &EvaluationContext) -> BoxStream<'static, DocumentEvaluationResult> {
        match &self.element {
            PolicyElement::Policy(policy) => policy.evaluate(ctx),
            PolicyElement::PolicySet(set) => set.evaluate(ctx),
        }
    }
}

impl Policy {
    pub fn new(name: impl Into<String>, entitlement: Entitlement) -> Self {
        Self {
            name: name.into(),
            target: None,
            entitlement,
            condition: None,
            obligations: Vec::new(),
            advice: Vec::new(),
            transform: None,
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: Expr) -> Self {
        self.target = Some(target);
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Expr) -> Self {
        self.condition = Some(condition);
        self
    }

    #[must_use]
    pub fn with_obligation(mut self, obligation: Expr) -> Self {
        self.obligations.push(obligation);
        self
    }

    #[must_use]
    pub fn with_advice(mut self, advice: Expr) -> Self {
        self.advice.push(advice);
        self
    }

    #[must_use]
    pub fn with_transform(mut self, transform: Expr) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Condition first; while it holds, follow the constraint expressions.
    pub fn evaluate(self: &Arc<Self>, ctx: &EvaluationContext) -> BoxStream<'static, DocumentEvaluationResult> {
        let condition = match &self.condition {
            Some(condition) => condition.evaluate(ctx),
            None => just(Value::boolean(true)),
        };
        let policy = Arc::clone(self);
        let ctx = ctx.clone();
        switch_map(condition, move |value| match value.as_condition() {
            Ok(true) => policy.constraints(&ctx),
            Ok(false) => just(DocumentEvaluationResult::new(
                policy.name.clone(),
                AuthorizationDecision::not_applicable(),
            )),
            Err(message) => just(DocumentEvaluationResult::indeterminate(
                policy.name.clone(),
                message,
            )),
        })
    }

    fn constraints(self: &Arc<Self>, ctx: &EvaluationContext) -> BoxStream<'static, DocumentEvaluationResult> {
        let expressions: Vec<&Expr> = self
            .obligations
            .iter()
            .chain(&self.advice)
            .chain(&self.transform)
            .collect();
        if expressions.is_empty() {
            return just(DocumentEvaluationResult::new(
                self.name.clone(),
                AuthorizationDecision::new(self.entitlement.decision()),
            ));
        }
        let streams = expressions.into_iter().map(|e| e.evaluate(ctx)).collect();
        let policy = Arc::clone(self);
        combine_latest(streams)
            .map(move |values| policy.decide(values))
            .boxed()
    }

    fn decide(&self, values: Vec<Value>) -> DocumentEvaluationResult {
        let mut json = Vec::with_capacity(values.len());
        for value in values {
            match value {
                Value::Defined(v) => json.push(v),
                Value::Undefined => {
                    return DocumentEvaluationResult::indeterminate(
                        self.name.clone(),
                        "Constraint evaluated to undefined",
                    );
                }
                Value::Error(message) => {
                    return DocumentEvaluationResult::indeterminate(self.name.clone(), message);
                }
            }
        }
        let resource: Option<Json> = match self.transform {
            Some(_) => json.pop(),
            None => None,
        };
        let advice = json.split_off(self.obligations.len());
        let mut decision = AuthorizationDecision::new(self.entitlement.decision())
            .with_obligations(json)
            .with_advice(advice);
        decision.resource = resource;
        DocumentEvaluationResult::new(self.name.clone(), decision)
    }
}

impl PolicySet {
    pub fn new(name: impl Into<String>, algorithm: CombiningAlgorithm) -> Self {
        Self {
            name: name.into(),
            target: None,
            algorithm,
            policies: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: Expr) -> Self {
        self.target = Some(target);
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    /// Member targets are checked once per subscription; matching members
    /// are combined continuously with the set's algorithm.
    pub fn evaluate(&self, ctx: &EvaluationContext) -> BoxStream<'static, DocumentEvaluationResult> {
        let mut members = Vec::with_capacity(self.policies.len());
        for policy in &self.policies {
            let matched = match &policy.target {
                None => Ok(true),
                Some(target) => target.evaluate_static(ctx).as_condition(),
            };
            match matched {
                Ok(true) => members.push(policy.evaluate(ctx)),
                Ok(false) => {}
                Err(message) => members.push(just(DocumentEvaluationResult::indeterminate(
                    policy.name.clone(),
                    format!("Error in target: {message}"),
                ))),
            }
        }

        let name = self.name.clone();
        let algorithm = self.algorithm;
        let into_result = move |nested: Vec<DocumentEvaluationResult>| {
            let combined = algorithm.combine(&nested);
            DocumentEvaluationResult {
                document: name.clone(),
                decision: combined.decision,
                algorithm: Some(algorithm),
                nested: combined.documents,
                error: combined.error,
            }
        };
        if members.is_empty() {
            return just(into_result(Vec::new()));
        }
        combine_latest(members).map(into_result).boxed()
    }
}
