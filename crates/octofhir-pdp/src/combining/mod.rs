//! Combining algorithms.
//!
//! A combining algorithm reduces the latest decision of every matched
//! document into one [`CombinedDecision`]. The reduction itself is a pure
//! function over a slice of [`DocumentEvaluationResult`]s; [`combine_documents`]
//! lifts it onto continuously updating document streams.

mod applicable;
mod overrides;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use futures_util::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::decision::{AuthorizationDecision, Decision};
use crate::document::DocumentEvaluationResult;
use crate::error::{PdpError, PdpResult};
use crate::stream::{combine_latest, just};

/// The closed set of supported combining algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CombiningAlgorithm {
    DenyOverrides,
    PermitOverrides,
    OnlyOneApplicable,
    FirstApplicable,
    DenyUnlessPermit,
    PermitUnlessDeny,
}

static ALGORITHMS: LazyLock<HashMap<&'static str, CombiningAlgorithm>> = LazyLock::new(|| {
    CombiningAlgorithm::ALL
        .iter()
        .map(|algorithm| (algorithm.name(), *algorithm))
        .collect()
});

impl CombiningAlgorithm {
    pub const ALL: [CombiningAlgorithm; 6] = [
        Self::DenyOverrides,
        Self::PermitOverrides,
        Self::OnlyOneApplicable,
        Self::FirstApplicable,
        Self::DenyUnlessPermit,
        Self::PermitUnlessDeny,
    ];

    /// Canonical kebab-case name.
    pub fn name(self) -> &'static str {
        match self {
            Self::DenyOverrides => "deny-overrides",
            Self::PermitOverrides => "permit-overrides",
            Self::OnlyOneApplicable => "only-one-applicable",
            Self::FirstApplicable => "first-applicable",
            Self::DenyUnlessPermit => "deny-unless-permit",
            Self::PermitUnlessDeny => "permit-unless-deny",
        }
    }

    /// Look an algorithm up by name. Unknown names are configuration errors.
    pub fn from_name(name: &str) -> PdpResult<Self> {
        ALGORITHMS
            .get(name.trim())
            .copied()
            .ok_or_else(|| PdpError::config(format!("Unknown combining algorithm '{name}'")))
    }

    /// Reduce the given per-document results into one decision.
    ///
    /// An empty input is NOT_APPLICABLE under every algorithm.
    pub fn combine(self, results: &[DocumentEvaluationResult]) -> CombinedDecision {
        if results.is_empty() {
            return CombinedDecision::new(self, AuthorizationDecision::not_applicable());
        }
        let (decision, error) = match self {
            Self::DenyOverrides => overrides::deny_overrides(results),
            Self::PermitOverrides => overrides::permit_overrides(results),
            Self::DenyUnlessPermit => overrides::deny_unless_permit(results),
            Self::PermitUnlessDeny => overrides::permit_unless_deny(results),
            Self::OnlyOneApplicable => applicable::only_one_applicable(results),
            Self::FirstApplicable => applicable::first_applicable(results),
        };
        CombinedDecision {
            decision,
            algorithm: self,
            documents: results.to_vec(),
            error,
        }
    }
}

impl fmt::Display for CombiningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CombiningAlgorithm {
    type Err = PdpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

/// Result of a combining algorithm, with the per-document trace it was
/// computed from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedDecision {
    pub decision: AuthorizationDecision,
    pub algorithm: CombiningAlgorithm,
    pub documents: Vec<DocumentEvaluationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CombinedDecision {
    pub fn new(algorithm: CombiningAlgorithm, decision: AuthorizationDecision) -> Self {
        Self {
            decision,
            algorithm,
            documents: Vec::new(),
            error: None,
        }
    }

    /// An INDETERMINATE result that did not get as far as evaluating documents.
    pub fn indeterminate(algorithm: CombiningAlgorithm, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(algorithm, AuthorizationDecision::indeterminate())
        }
    }

    pub fn kind(&self) -> Decision {
        self.decision.decision
    }
}

/// Continuously combine document decision streams.
///
/// Emits after every document has produced a decision, then again on every
/// change of any document. No documents at all yields a single
/// NOT_APPLICABLE.
pub fn combine_documents(
    algorithm: CombiningAlgorithm,
    documents: Vec<BoxStream<'static, DocumentEvaluationResult>>,
) -> BoxStream<'static, CombinedDecision> {
    if documents.is_empty() {
        return just(algorithm.combine(&[]));
    }
    combine_latest(documents)
        .map(move |results| algorithm.combine(&results))
        .boxed()
}

/// Union of obligations and advice of the given results, in document order.
fn merge_constraints<'a>(
    decision: Decision,
    voters: impl IntoIterator<Item = &'a DocumentEvaluationResult>,
) -> AuthorizationDecision {
    let mut merged = AuthorizationDecision::new(decision);
    for result in voters {
        merged.obligations.extend(result.decision.obligations.iter().cloned());
        merged.advice.extend(result.decision.advice.iter().cloned());
    }
    merged
}

/// Results whose own decision equals `decision`.
fn with_decision(
    results: &[DocumentEvaluationResult],
    decision: Decision,
) -> impl Iterator<Item = &DocumentEvaluationResult> {
    results.iter().filter(move |r| r.decision.decision == decision)
}


#[cfg(test)]
mod tests {
    use super::test_support::result;
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_test::block_on;

    fn decisions(list: &[Decision]) -> Vec<DocumentEvaluationResult> {
        list.iter()
            .enumerate()
            .map(|(i, d)| result(&format!("doc-{i}"), AuthorizationDecision::new(*d)))
            .collect()
    }

    fn kind(algorithm: CombiningAlgorithm, list: &[Decision]) -> Decision {
        algorithm.combine(&decisions(list)).kind()
    }

    use Decision::{Deny, Indeterminate, NotApplicable, Permit};

    #[test]
    fn test_identity_laws() {
        use CombiningAlgorithm::*;
        assert_eq!(kind(DenyOverrides, &[Deny, Permit]), Deny);
        assert_eq!(kind(PermitOverrides, &[Deny, Permit]), Permit);
        assert_eq!(kind(OnlyOneApplicable, &[Permit]), Permit);
        assert_eq!(kind(OnlyOneApplicable, &[Permit, Permit]), Indeterminate);
        assert_eq!(kind(FirstApplicable, &[NotApplicable, Deny, Permit]), Deny);
        for algorithm in CombiningAlgorithm::ALL {
            assert_eq!(kind(algorithm, &[]), NotApplicable, "{algorithm}");
        }
    }

    #[test]
    fn test_name_lookup() {
        for algorithm in CombiningAlgorithm::ALL {
            assert_eq!(CombiningAlgorithm::from_name(algorithm.name()).unwrap(), algorithm);
        }
        assert_eq!(
            "permit-unless-deny".parse::<CombiningAlgorithm>().unwrap(),
            CombiningAlgorithm::PermitUnlessDeny
        );
        let err = CombiningAlgorithm::from_name("majority-wins").unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_serde_names() {
        let value = serde_json::to_value(CombiningAlgorithm::OnlyOneApplicable).unwrap();
        assert_eq!(value, json!("only-one-applicable"));
    }

    #[test]
    fn test_obligations_only_from_agreeing_documents() {
        let results = vec![
            result(
                "a",
                AuthorizationDecision::deny().with_obligations(vec![json!("audit-deny")]),
            ),
            result(
                "b",
                AuthorizationDecision::permit().with_obligations(vec![json!("audit-permit")]),
            ),
            result(
                "c",
                AuthorizationDecision::deny().with_advice(vec![json!("notify")]),
            ),
        ];
        let combined = CombiningAlgorithm::DenyOverrides.combine(&results);
        assert_eq!(combined.kind(), Deny);
        assert_eq!(combined.decision.obligations, vec![json!("audit-deny")]);
        assert_eq!(combined.decision.advice, vec![json!("notify")]);
        assert_eq!(combined.documents.len(), 3);
    }

    #[test]
    fn test_combine_documents_empty_is_not_applicable() {
        let mut combined = combine_documents(CombiningAlgorithm::PermitUnlessDeny, Vec::new());
        let first = block_on(combined.next()).unwrap();
        assert_eq!(first.kind(), NotApplicable);
        assert!(block_on(combined.next()).is_none());
    }

    #[tokio::test]
    async fn test_combine_documents_recomputes_on_change() {
        let (tx, mut rx) = mpsc::unbounded_channel::<DocumentEvaluationResult>();
        let changing = Box::pin(async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        });
        let fixed = just(result("fixed", AuthorizationDecision::permit()));
        let mut combined =
            combine_documents(CombiningAlgorithm::DenyOverrides, vec![fixed, changing]);

        tx.send(result("changing", AuthorizationDecision::not_applicable()))
            .unwrap();
        let first = timeout(Duration::from_secs(1), combined.next()).await.unwrap();
        assert_eq!(first.unwrap().kind(), Permit);

        tx.send(result("changing", AuthorizationDecision::deny())).unwrap();
        let second = timeout(Duration::from_secs(1), combined.next()).await.unwrap();
        assert_eq!(second.unwrap().kind(), Deny);
    }
}
