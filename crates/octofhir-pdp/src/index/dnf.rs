//! Normalization of target expressions into disjunctive normal form.
//!
//! Boolean connectives (`and`, `or`, `not`) and boolean constants are
//! structural; every other node is an opaque literal that the index
//! evaluates as a whole. Negation is pushed down onto literals.

use crate::expr::{Constant, Expr};
use serde_json::Value as Json;

/// Upper bound on the number of conjunctions one target may expand into.
pub const MAX_CONJUNCTIONS: usize = 4096;

/// A predicate with the polarity a conjunction requires of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Literal {
    pub predicate: Expr,
    pub positive: bool,
}

/// OR of AND-clauses. No clauses means constant false, one empty clause
/// means constant true.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dnf {
    pub conjunctions: Vec<Vec<Literal>>,
}

impl Dnf {
    pub fn always_true() -> Self {
        Self {
            conjunctions: vec![Vec::new()],
        }
    }

    pub fn is_always_false(&self) -> bool {
        self.conjunctions.is_empty()
    }
}

/// Normalize an optional target. A missing target matches everything.
pub fn normalize_target(target: Option<&Expr>) -> Result<Dnf, String> {
    match target {
        None => Ok(Dnf::always_true()),
        Some(expr) => normalize(expr),
    }
}

pub fn normalize(expr: &Expr) -> Result<Dnf, String> {
    if expr.references_attributes() {
        return Err("Attribute access is not allowed in a target expression".to_string());
    }
    let conjunctions = expand(expr, false)?;
    Ok(Dnf { conjunctions })
}

fn expand(expr: &Expr, negated: bool) -> Result<Vec<Vec<Literal>>, String> {
    match expr {
        Expr::Const(Constant(Json::Bool(b))) => Ok(if *b != negated {
            vec![Vec::new()]
        } else {
            Vec::new()
        }),
        Expr::Const(Constant(other)) => Err(format!(
            "Target constant must be a boolean, but got {other}"
        )),
        Expr::Not(inner) => expand(inner, !negated),
        Expr::And(operands) | Expr::Or(operands) if operands.is_empty() => {
            Err("Boolean connective without operands".to_string())
        }
        // not(a and b) == not a or not b
        Expr::And(operands) if negated => union(operands, negated),
        Expr::And(operands) => product(operands, negated),
        Expr::Or(operands) if negated => product(operands, negated),
        Expr::Or(operands) => union(operands, negated),
        leaf => Ok(vec![vec![Literal {
            predicate: leaf.clone(),
            positive: !negated,
        }]]),
    }
}

fn union(operands: &[Expr], negated: bool) -> Result<Vec<Vec<Literal>>, String> {
    let mut result = Vec::new();
    for operand in operands {
        let expanded = expand(operand, negated)?;
        if expanded.iter().any(Vec::is_empty) {
            return Ok(vec![Vec::new()]);
        }
        result.extend(expanded);
        check_size(result.len())?;
    }
    Ok(result)
}

fn product(operands: &[Expr], negated: bool) -> Result<Vec<Vec<Literal>>, String> {
    let mut result: Vec<Vec<Literal>> = vec![Vec::new()];
    for operand in operands {
        let expanded = expand(operand, negated)?;
        check_size(result.len().saturating_mul(expanded.len()))?;
        let mut next = Vec::with_capacity(result.len() * expanded.len());
        for left in &result {
            for right in &expanded {
                if let Some(joined) = conjoin(left, right) {
                    next.push(joined);
                }
            }
        }
        result = next;
        if result.is_empty() {
            break;
        }
    }
    Ok(result)
}

/// AND of two clauses. Duplicate literals collapse; a literal required in
/// both polarities makes the clause unsatisfiable (`None`).
fn conjoin(left: &[Literal], right: &[Literal]) -> Option<Vec<Literal>> {
    let mut joined = left.to_vec();
    for literal in right {
        match joined.iter().find(|l| l.predicate == literal.predicate) {
            Some(existing) if existing.positive == literal.positive => {}
            Some(_) => return None,
            None => joined.push(literal.clone()),
        }
    }
    Some(joined)
}

fn check_size(conjunctions: usize) -> Result<(), String> {
    if conjunctions > MAX_CONJUNCTIONS {
        return Err(format!(
            "Target expands to more than {MAX_CONJUNCTIONS} conjunctions"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lit(name: &str, positive: bool) -> Literal {
        Literal {
            predicate: Expr::variable(name),
            positive,
        }
    }

    fn v(name: &str) -> Expr {
        Expr::variable(name)
    }

    #[test]
    fn test_distributes_and_over_or() {
        let expr = Expr::all(vec![Expr::any(vec![v("a"), v("b")]), v("c")]);
        let dnf = normalize(&expr).unwrap();
        assert_eq!(
            dnf.conjunctions,
            vec![
                vec![lit("a", true), lit("c", true)],
                vec![lit("b", true), lit("c", true)],
            ]
        );
    }

    #[test]
    fn test_pushes_negation_to_literals() {
        let expr = Expr::negate(Expr::all(vec![v("a"), Expr::negate(v("b"))]));
        let dnf = normalize(&expr).unwrap();
        assert_eq!(
            dnf.conjunctions,
            vec![vec![lit("a", false)], vec![lit("b", true)]]
        );
    }

    #[test]
    fn test_constants_fold() {
        assert!(normalize(&Expr::boolean(false)).unwrap().is_always_false());
        assert_eq!(normalize(&Expr::boolean(true)).unwrap(), Dnf::always_true());
        assert_eq!(
            normalize(&Expr::any(vec![v("a"), Expr::boolean(true)])).unwrap(),
            Dnf::always_true()
        );
        assert!(
            normalize(&Expr::all(vec![v("a"), Expr::boolean(false)]))
                .unwrap()
                .is_always_false()
        );
        assert_eq!(normalize_target(None).unwrap(), Dnf::always_true());
    }

    #[test]
    fn test_contradictions_and_duplicates() {
        let contradiction = Expr::all(vec![v("a"), Expr::negate(v("a"))]);
        assert!(normalize(&contradiction).unwrap().is_always_false());

        let duplicate = Expr::all(vec![v("a"), v("a"), v("b")]);
        assert_eq!(
            normalize(&duplicate).unwrap().conjunctions,
            vec![vec![lit("a", true), lit("b", true)]]
        );
    }

    #[test]
    fn test_rejects_malformed_targets() {
        assert!(normalize(&Expr::all(vec![])).is_err());
        assert!(normalize(&Expr::constant(json!("yes"))).is_err());
        assert!(normalize(&Expr::equals(Expr::attribute("x"), Expr::boolean(true))).is_err());
    }

    #[test]
    fn test_size_cap() {
        // (a0 or b0) and (a1 or b1) and ... expands to 2^13 clauses.
        let clauses = (0..13)
            .map(|i| Expr::any(vec![v(&format!("a{i}")), v(&format!("b{i}"))]))
            .collect();
        let err = normalize(&Expr::all(clauses)).unwrap_err();
        assert!(err.contains("4096"));
    }
}
