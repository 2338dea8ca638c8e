//! The immutable compiled index snapshot.

use std::sync::Arc;

use super::bitmask::Bitmask;
use crate::document::Document;
use crate::expr::Expr;

/// A distinct target literal with its precomputed conjunction masks.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub expr: Expr,
    /// Every conjunction referencing this predicate in either polarity.
    pub conjunctions: Bitmask,
    /// Conjunctions falsified when the predicate evaluates to `true`.
    pub false_for_true: Bitmask,
    /// Conjunctions falsified when the predicate evaluates to `false`.
    pub false_for_false: Bitmask,
    /// Conjunctions gaining a true literal when the predicate is `true`.
    pub true_for_true: Vec<usize>,
    /// Conjunctions gaining a true literal when the predicate is `false`.
    pub true_for_false: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Conjunction {
    pub literal_count: usize,
    /// Formulas containing this conjunction.
    pub formulas: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Formula {
    pub conjunctions: Vec<usize>,
    /// Documents whose target normalizes to this formula.
    pub documents: Vec<usize>,
}

/// Compiled, read-only index over a document set.
///
/// Predicates are stored in evaluation order. All cross references are
/// indices into the vectors of the same container.
#[derive(Debug, Clone, Default)]
pub struct CanonicalIndexContainer {
    pub(crate) documents: Vec<Arc<Document>>,
    pub(crate) predicates: Vec<Predicate>,
    pub(crate) conjunctions: Vec<Conjunction>,
    pub(crate) formulas: Vec<Formula>,
}

impl CanonicalIndexContainer {
    /// Index over no documents.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Documents in load order.
    pub fn documents(&self) -> &[Arc<Document>] {
        &self.documents
    }

    /// Distinct predicates in evaluation order.
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn conjunctions(&self) -> &[Conjunction] {
        &self.conjunctions
    }

    pub fn formulas(&self) -> &[Formula] {
        &self.formulas
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn predicate_count(&self) -> usize {
        self.predicates.len()
    }

    pub fn conjunction_count(&self) -> usize {
        self.conjunctions.len()
    }

    pub fn formula_count(&self) -> usize {
        self.formulas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
