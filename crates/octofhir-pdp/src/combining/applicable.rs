//! only-one-applicable and first-applicable.

use crate::decision::{AuthorizationDecision, Decision};
use crate::document::DocumentEvaluationResult;

fn applicable(
    results: &[DocumentEvaluationResult],
) -> impl Iterator<Item = &DocumentEvaluationResult> {
    results.iter().filter(|r| r.decision.decision.is_applicable())
}

pub(super) fn only_one_applicable(
    results: &[DocumentEvaluationResult],
) -> (AuthorizationDecision, Option<String>) {
    let mut candidates = applicable(results);
    let Some(only) = candidates.next() else {
        return (AuthorizationDecision::not_applicable(), None);
    };
    if candidates.next().is_some() {
        return (
            AuthorizationDecision::indeterminate(),
            Some("More than one document is applicable".to_string()),
        );
    }
    if only.decision.decision == Decision::Indeterminate {
        return (AuthorizationDecision::indeterminate(), only.error.clone());
    }
    (only.decision.clone(), None)
}

/// The first applicable document in document order decides, INDETERMINATE
/// included.
pub(super) fn first_applicable(
    results: &[DocumentEvaluationResult],
) -> (AuthorizationDecision, Option<String>) {
    match applicable(results).next() {
        Some(first) => (first.decision.clone(), first.error.clone()),
        None => (AuthorizationDecision::not_applicable(), None),
    }
}
