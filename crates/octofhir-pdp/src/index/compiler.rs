//! Compilation of document targets into a [`CanonicalIndexContainer`].

use std::collections::HashMap;
use std::sync::Arc;

use super::bitmask::Bitmask;
use super::container::{CanonicalIndexContainer, Conjunction, Formula, Predicate};
use super::dnf;
use crate::document::Document;
use crate::error::{PdpError, PdpResult};
use crate::expr::Expr;

/// A conjunction as a sorted list of `(predicate id, polarity)`.
type ClauseKey = Vec<(usize, bool)>;

/// Builds a container, unifying structurally equal predicates, conjunctions
/// and formulas across documents.
#[derive(Debug, Default)]
pub struct IndexCompiler {
    documents: Vec<Arc<Document>>,
    predicates: Vec<Expr>,
    predicate_ids: HashMap<Expr, usize>,
    conjunctions: Vec<ClauseKey>,
    conjunction_ids: HashMap<ClauseKey, usize>,
    formulas: Vec<Vec<usize>>,
    formula_ids: HashMap<Vec<usize>, usize>,
    formula_documents: Vec<Vec<usize>>,
}

impl IndexCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile all documents at once. Fails on the first target that cannot
    /// be normalized.
    pub fn compile(documents: Vec<Arc<Document>>) -> PdpResult<CanonicalIndexContainer> {
        let mut compiler = Self::new();
        for document in documents {
            compiler.add(document)?;
        }
        Ok(compiler.finish())
    }

    /// Add one document. A document whose target cannot be normalized is
    /// rejected and leaves the compiler unchanged.
    pub fn add(&mut self, document: Arc<Document>) -> PdpResult<()> {
        let dnf = dnf::normalize_target(document.target())
            .map_err(|reason| PdpError::compile(&document.id, reason))?;

        let mut formula: Vec<usize> = dnf
            .conjunctions
            .into_iter()
            .map(|clause| {
                let mut key: ClauseKey = clause
                    .into_iter()
                    .map(|literal| (self.predicate_id(literal.predicate), literal.positive))
                    .collect();
                key.sort_unstable();
                self.conjunction_id(key)
            })
            .collect();
        formula.sort_unstable();
        formula.dedup();

        let formula_id = self.formula_id(formula);
        self.formula_documents[formula_id].push(self.documents.len());
        self.documents.push(document);
        Ok(())
    }

    fn predicate_id(&mut self, expr: Expr) -> usize {
        if let Some(id) = self.predicate_ids.get(&expr) {
            return *id;
        }
        let id = self.predicates.len();
        self.predicates.push(expr.clone());
        self.predicate_ids.insert(expr, id);
        id
    }

    fn conjunction_id(&mut self, key: ClauseKey) -> usize {
        if let Some(id) = self.conjunction_ids.get(&key) {
            return *id;
        }
        let id = self.conjunctions.len();
        self.conjunctions.push(key.clone());
        self.conjunction_ids.insert(key, id);
        id
    }

    fn formula_id(&mut self, conjunctions: Vec<usize>) -> usize {
        if let Some(id) = self.formula_ids.get(&conjunctions) {
            return *id;
        }
        let id = self.formulas.len();
        self.formulas.push(conjunctions.clone());
        self.formula_ids.insert(conjunctions, id);
        self.formula_documents.push(Vec::new());
        id
    }

    /// Compute the per-predicate masks and the evaluation order.
    pub fn finish(self) -> CanonicalIndexContainer {
        let width = self.conjunctions.len();

        let mut references: Vec<Vec<(usize, bool)>> = vec![Vec::new(); self.predicates.len()];
        for (conjunction, key) in self.conjunctions.iter().enumerate() {
            for &(predicate, positive) in key {
                references[predicate].push((conjunction, positive));
            }
        }

        // Most shared predicates first; ties keep first appearance.
        let mut order: Vec<usize> = (0..self.predicates.len()).collect();
        order.sort_by_key(|&p| std::cmp::Reverse(references[p].len()));

        let predicates = order
            .into_iter()
            .map(|p| {
                let mut predicate = Predicate {
                    expr: self.predicates[p].clone(),
                    conjunctions: Bitmask::new(width),
                    false_for_true: Bitmask::new(width),
                    false_for_false: Bitmask::new(width),
                    true_for_true: Vec::new(),
                    true_for_false: Vec::new(),
                };
                for &(conjunction, positive) in &references[p] {
                    predicate.conjunctions.set(conjunction);
                    if positive {
                        predicate.false_for_false.set(conjunction);
                        predicate.true_for_true.push(conjunction);
                    } else {
                        predicate.false_for_true.set(conjunction);
                        predicate.true_for_false.push(conjunction);
                    }
                }
                predicate
            })
            .collect();

        let mut conjunctions: Vec<Conjunction> = self
            .conjunctions
            .iter()
            .map(|key| Conjunction {
                literal_count: key.len(),
                formulas: Vec::new(),
            })
            .collect();
        for (formula, members) in self.formulas.iter().enumerate() {
            for &conjunction in members {
                conjunctions[conjunction].formulas.push(formula);
            }
        }

        let formulas = self
            .formulas
            .into_iter()
            .zip(self.formula_documents)
            .map(|(conjunctions, documents)| Formula {
                conjunctions,
                documents,
            })
            .collect();

        CanonicalIndexContainer {
            documents: self.documents,
            predicates,
            conjunctions,
            formulas,
        }
    }
}
