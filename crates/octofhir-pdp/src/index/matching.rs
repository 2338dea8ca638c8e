//! Bitmask matching of a subscription against the compiled index.

use std::sync::Arc;

use super::bitmask::Bitmask;
use super::container::CanonicalIndexContainer;
use crate::context::EvaluationContext;
use crate::document::Document;
use crate::expr::Expr;
use crate::value::Value;

/// Candidate documents for one subscription.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    /// Documents with a satisfied target, in load order.
    pub documents: Vec<Arc<Document>>,
    /// `true` if any evaluated target literal produced an error.
    pub errors_in_target: bool,
}

/// Per-match working state. Never shared between matches.
#[derive(Debug)]
pub struct MatchingContext {
    candidates: Bitmask,
    satisfied: Bitmask,
    resolved_formulas: Bitmask,
    true_literals: Vec<usize>,
    eliminated_formulas: Vec<usize>,
    errors: bool,
}

impl MatchingContext {
    /// Fresh state where every conjunction is a candidate. Conjunctions
    /// without literals are satisfied immediately.
    pub fn new(container: &CanonicalIndexContainer) -> Self {
        let width = container.conjunction_count();
        let mut ctx = Self {
            candidates: Bitmask::full(width),
            satisfied: Bitmask::new(width),
            resolved_formulas: Bitmask::new(container.formula_count()),
            true_literals: vec![0; width],
            eliminated_formulas: vec![0; width],
            errors: false,
        };
        for (conjunction, info) in container.conjunctions().iter().enumerate() {
            if info.literal_count == 0 {
                ctx.satisfy(container, conjunction);
            }
        }
        ctx
    }

    pub fn has_candidates(&self) -> bool {
        !self.candidates.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.errors
    }

    /// Record a predicate error without touching the candidates. Used for
    /// predicates no remaining candidate depends on.
    pub fn record_error(&mut self, predicate: usize, message: &str) {
        tracing::trace!(predicate, error = %message, "Target literal errored");
        self.errors = true;
    }

    /// Fold one predicate result into the state.
    pub fn apply(&mut self, container: &CanonicalIndexContainer, predicate: usize, value: &Value) {
        let info = &container.predicates()[predicate];
        match value.as_condition() {
            Err(message) => {
                self.record_error(predicate, &message);
                self.candidates.and_not(&info.conjunctions);
            }
            Ok(truth) => {
                let (falsified, strengthened) = if truth {
                    (&info.false_for_true, &info.true_for_true)
                } else {
                    (&info.false_for_false, &info.true_for_false)
                };
                self.candidates.and_not(falsified);
                for &conjunction in strengthened {
                    if !self.candidates.get(conjunction) {
                        continue;
                    }
                    self.true_literals[conjunction] += 1;
                    if self.true_literals[conjunction] == container.conjunctions()[conjunction].literal_count {
                        self.satisfy(container, conjunction);
                    }
                }
            }
        }
    }

    /// Mark `conjunction` satisfied, resolve its formulas and drop every
    /// candidate whose formulas are now all resolved.
    fn satisfy(&mut self, container: &CanonicalIndexContainer, conjunction: usize) {
        self.satisfied.set(conjunction);
        self.candidates.clear(conjunction);
        for &formula in &container.conjunctions()[conjunction].formulas {
            if self.resolved_formulas.get(formula) {
                continue;
            }
            self.resolved_formulas.set(formula);
            for &other in &container.formulas()[formula].conjunctions {
                if !self.candidates.get(other) {
                    continue;
                }
                self.eliminated_formulas[other] += 1;
                if self.eliminated_formulas[other] == container.conjunctions()[other].formulas.len() {
                    self.candidates.clear(other);
                }
            }
        }
    }

    /// Should this predicate be evaluated at all?
    pub fn is_relevant(&self, container: &CanonicalIndexContainer, predicate: usize) -> bool {
        self.candidates
            .intersects(&container.predicates()[predicate].conjunctions)
    }

    /// Collect the documents of every resolved formula.
    pub fn into_result(self, container: &CanonicalIndexContainer) -> MatchResult {
        let mut matched = Bitmask::new(container.document_count());
        for formula in self.resolved_formulas.iter_ones() {
            for &document in &container.formulas()[formula].documents {
                matched.set(document);
            }
        }
        tracing::trace!(
            satisfied = self.satisfied.count(),
            documents = matched.count(),
            errors = self.errors,
            "Target match finished"
        );
        MatchResult {
            documents: matched
                .iter_ones()
                .map(|d| Arc::clone(&container.documents()[d]))
                .collect(),
            errors_in_target: self.errors,
        }
    }
}

/// Match the subscription in `ctx` against `container`.
pub fn match_documents(container: &CanonicalIndexContainer, ctx: &EvaluationContext) -> MatchResult {
    match_with(container, |expr| expr.evaluate_static(ctx))
}

/// Match with a caller supplied literal evaluator, in the container's
/// predicate order.
pub fn match_with<F>(container: &CanonicalIndexContainer, evaluate: F) -> MatchResult
where
    F: FnMut(&Expr) -> Value,
{
    match_in_order(container, 0..container.predicate_count(), evaluate)
}

/// Match visiting predicates in the given order. Every predicate index must
/// appear at most once.
///
/// Each predicate is evaluated at most once. Predicates no remaining
/// candidate references are still evaluated while no error has been seen,
/// so `errors_in_target` is the same for every order: it is set iff some
/// predicate of the index errors.
pub fn match_in_order<I, F>(container: &CanonicalIndexContainer, order: I, mut evaluate: F) -> MatchResult
where
    I: IntoIterator<Item = usize>,
    F: FnMut(&Expr) -> Value,
{
    let mut ctx = MatchingContext::new(container);
    for predicate in order {
        let relevant = ctx.is_relevant(container, predicate);
        if !relevant && ctx.has_errors() {
            if !ctx.has_candidates() {
                break;
            }
            continue;
        }
        let value = evaluate(&container.predicates()[predicate].expr);
        if relevant {
            ctx.apply(container, predicate, &value);
        } else if let Err(message) = value.as_condition() {
            ctx.record_error(predicate, &message);
        }
    }
    ctx.into_result(container)
}
