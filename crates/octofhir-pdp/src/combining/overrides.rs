//! deny-overrides, permit-overrides and the two "unless" algorithms.

use serde_json::Value as Json;

use super::{merge_constraints, with_decision};
use crate::decision::{AuthorizationDecision, Decision};
use crate::document::DocumentEvaluationResult;

const TRANSFORMATION_UNCERTAINTY: &str =
    "Transformation uncertainty: more than one permitting document transforms the resource";

/// The resource transform of the permitting documents, or an error if more
/// than one of them carries one.
fn permit_transform(results: &[DocumentEvaluationResult]) -> Result<Option<Json>, &'static str> {
    let mut transforms = with_decision(results, Decision::Permit)
        .filter_map(|result| result.decision.resource.as_ref());
    let first = transforms.next().cloned();
    match transforms.next() {
        Some(_) => Err(TRANSFORMATION_UNCERTAINTY),
        None => Ok(first),
    }
}

fn permit(results: &[DocumentEvaluationResult], resource: Option<Json>) -> AuthorizationDecision {
    let mut decision = merge_constraints(Decision::Permit, with_decision(results, Decision::Permit));
    decision.resource = resource;
    decision
}

fn deny(results: &[DocumentEvaluationResult]) -> AuthorizationDecision {
    merge_constraints(Decision::Deny, with_decision(results, Decision::Deny))
}

fn any(results: &[DocumentEvaluationResult], decision: Decision) -> bool {
    with_decision(results, decision).next().is_some()
}

fn indeterminate(reason: &str) -> (AuthorizationDecision, Option<String>) {
    (AuthorizationDecision::indeterminate(), Some(reason.to_string()))
}

pub(super) fn deny_overrides(
    results: &[DocumentEvaluationResult],
) -> (AuthorizationDecision, Option<String>) {
    if any(results, Decision::Deny) {
        return (deny(results), None);
    }
    if any(results, Decision::Indeterminate) {
        return indeterminate("At least one document evaluated to INDETERMINATE");
    }
    if any(results, Decision::Permit) {
        return match permit_transform(results) {
            Ok(resource) => (permit(results, resource), None),
            Err(reason) => indeterminate(reason),
        };
    }
    (AuthorizationDecision::not_applicable(), None)
}

pub(super) fn permit_overrides(
    results: &[DocumentEvaluationResult],
) -> (AuthorizationDecision, Option<String>) {
    if any(results, Decision::Permit) {
        return match permit_transform(results) {
            Ok(resource) => (permit(results, resource), None),
            Err(reason) => indeterminate(reason),
        };
    }
    if any(results, Decision::Indeterminate) {
        return indeterminate("At least one document evaluated to INDETERMINATE");
    }
    if any(results, Decision::Deny) {
        return (deny(results), None);
    }
    (AuthorizationDecision::not_applicable(), None)
}

/// PERMIT only on an unambiguous permit; DENY otherwise.
pub(super) fn deny_unless_permit(
    results: &[DocumentEvaluationResult],
) -> (AuthorizationDecision, Option<String>) {
    if any(results, Decision::Permit) {
        match permit_transform(results) {
            Ok(resource) => return (permit(results, resource), None),
            Err(reason) => return (deny(results), Some(reason.to_string())),
        }
    }
    (deny(results), None)
}

/// DENY on any deny or an ambiguous transform; PERMIT otherwise.
pub(super) fn permit_unless_deny(
    results: &[DocumentEvaluationResult],
) -> (AuthorizationDecision, Option<String>) {
    if any(results, Decision::Deny) {
        return (deny(results), None);
    }
    match permit_transform(results) {
        Ok(resource) => (permit(results, resource), None),
        Err(reason) => (deny(results), Some(reason.to_string())),
    }
}
