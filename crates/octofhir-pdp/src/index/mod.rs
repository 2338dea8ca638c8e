//! Canonical target index.
//!
//! Every document target is normalized into disjunctive normal form and the
//! resulting predicates, conjunctions and formulas are unified across all
//! documents. Matching a subscription then evaluates each distinct predicate
//! at most once and folds the result into per-conjunction bitmasks:
//!
//! - an errored predicate removes every conjunction that references it,
//! - a definite predicate falsifies the conjunctions needing the opposite
//!   polarity and counts towards the others,
//! - a conjunction whose literals are all true resolves its formulas, and
//!   conjunctions left only in resolved formulas are dropped unevaluated.
//!
//! Predicates that no remaining candidate references are not folded into
//! the bitmasks. They are still evaluated until the first error is seen, so
//! whether a target errored never depends on evaluation order.

mod bitmask;
mod compiler;
mod container;
pub mod dnf;
mod matching;

pub use bitmask::Bitmask;
pub use compiler::IndexCompiler;
pub use container::{CanonicalIndexContainer, Conjunction, Formula, Predicate};
pub use matching::{MatchResult, MatchingContext, match_documents, match_in_order, match_with};
