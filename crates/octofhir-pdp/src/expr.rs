//! Expression trees for targets, conditions and constraints.
//!
//! Expressions are plain data (deserialized from JSON documents). Structural
//! equality and hashing are what the target index uses to share identical
//! literals across documents.
//!
//! ```json
//! {"and": [
//!     {"eq": [{"subscription": {"element": "action"}}, {"const": "read"}]},
//!     {"in": {"needle": {"const": "doctor"},
//!             "haystack": {"subscription": {"element": "subject", "path": "/roles"}}}}
//! ]}
//! ```

use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use dashmap::DashMap;
use futures_util::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use regex::Regex;
use serde_json::Value as Json;

use crate::context::EvaluationContext;
use crate::decision::SubscriptionElement;
use crate::stream::{combine_latest, just};
use crate::value::Value;

/// A JSON constant with structural hashing.
///
/// Object keys are hashed in sorted order so the hash agrees with JSON
/// equality regardless of map ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Constant(pub Json);

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_json(&self.0, state);
    }
}

fn hash_json<H: Hasher>(json: &Json, state: &mut H) {
    match json {
        Json::Null => 0u8.hash(state),
        Json::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        Json::Number(n) => {
            2u8.hash(state);
            n.to_string().hash(state);
        }
        Json::String(s) => {
            3u8.hash(state);
            s.hash(state);
        }
        Json::Array(items) => {
            4u8.hash(state);
            items.len().hash(state);
            for item in items {
                hash_json(item, state);
            }
        }
        Json::Object(map) => {
            5u8.hash(state);
            map.len().hash(state);
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (key, value) in entries {
                key.hash(state);
                hash_json(value, state);
            }
        }
    }
}

/// Expression tree node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Expr {
    /// A JSON constant.
    Const(Constant),

    /// A value from the subscription, optionally narrowed by a JSON pointer.
    Subscription {
        element: SubscriptionElement,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },

    /// A global policy variable.
    Variable(String),

    /// A continuous attribute from the attribute provider. Not allowed in
    /// targets.
    Attribute { name: String },

    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Neq(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Lte(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Gte(Box<Expr>, Box<Expr>),

    /// Array membership, or substring test when both sides are strings.
    In { needle: Box<Expr>, haystack: Box<Expr> },

    /// Regular expression match of a string value.
    Regex { value: Box<Expr>, pattern: String },
}

impl Expr {
    pub fn constant(value: Json) -> Self {
        Self::Const(Constant(value))
    }

    pub fn boolean(value: bool) -> Self {
        Self::constant(Json::Bool(value))
    }

    pub fn subscription(element: SubscriptionElement, path: Option<&str>) -> Self {
        Self::Subscription {
            element,
            path: path.map(str::to_string),
        }
    }

    pub fn subject(path: &str) -> Self {
        Self::subscription(SubscriptionElement::Subject, Some(path))
    }

    pub fn action(path: &str) -> Self {
        Self::subscription(SubscriptionElement::Action, Some(path))
    }

    pub fn resource(path: &str) -> Self {
        Self::subscription(SubscriptionElement::Resource, Some(path))
    }

    pub fn environment(path: &str) -> Self {
        Self::subscription(SubscriptionElement::Environment, Some(path))
    }

    pub fn variable(name: &str) -> Self {
        Self::Variable(name.to_string())
    }

    pub fn attribute(name: &str) -> Self {
        Self::Attribute {
            name: name.to_string(),
        }
    }

    pub fn negate(inner: Expr) -> Self {
        Self::Not(Box::new(inner))
    }

    pub fn all(operands: Vec<Expr>) -> Self {
        Self::And(operands)
    }

    pub fn any(operands: Vec<Expr>) -> Self {
        Self::Or(operands)
    }

    pub fn equals(left: Expr, right: Expr) -> Self {
        Self::Eq(Box::new(left), Box::new(right))
    }

    pub fn not_equals(left: Expr, right: Expr) -> Self {
        Self::Neq(Box::new(left), Box::new(right))
    }

    pub fn less_than(left: Expr, right: Expr) -> Self {
        Self::Lt(Box::new(left), Box::new(right))
    }

    pub fn greater_than(left: Expr, right: Expr) -> Self {
        Self::Gt(Box::new(left), Box::new(right))
    }

    pub fn contains(haystack: Expr, needle: Expr) -> Self {
        Self::In {
            needle: Box::new(needle),
            haystack: Box::new(haystack),
        }
    }

    pub fn matches(value: Expr, pattern: &str) -> Self {
        Self::Regex {
            value: Box::new(value),
            pattern: pattern.to_string(),
        }
    }

    /// Direct operands of this node, in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Self::Const(_) | Self::Subscription { .. } | Self::Variable(_) | Self::Attribute { .. } => {
                Vec::new()
            }
            Self::Not(inner) => vec![inner.as_ref()],
            Self::And(operands) | Self::Or(operands) => operands.iter().collect(),
            Self::Eq(l, r)
            | Self::Neq(l, r)
            | Self::Lt(l, r)
            | Self::Lte(l, r)
            | Self::Gt(l, r)
            | Self::Gte(l, r) => vec![l.as_ref(), r.as_ref()],
            Self::In { needle, haystack } => vec![needle.as_ref(), haystack.as_ref()],
            Self::Regex { value, .. } => vec![value.as_ref()],
        }
    }

    /// `true` if any node of the tree reads a continuous attribute.
    pub fn references_attributes(&self) -> bool {
        matches!(self, Self::Attribute { .. })
            || self.children().iter().any(|child| child.references_attributes())
    }

    /// Evaluate once, without attribute access.
    ///
    /// Used for target literals, which must be decidable from the
    /// subscription and variables alone.
    pub fn evaluate_static(&self, ctx: &EvaluationContext) -> Value {
        match self {
            Self::Const(Constant(json)) => Value::Defined(json.clone()),
            Self::Subscription { element, path } => {
                let root = ctx.subscription().element(*element);
                match path.as_deref() {
                    None | Some("") => Value::Defined(root.clone()),
                    Some(pointer) => Value::from(root.pointer(pointer).cloned()),
                }
            }
            Self::Variable(name) => Value::from(ctx.variable(name).cloned()),
            Self::Attribute { name } => Value::error(format!(
                "Attribute '{name}' cannot be accessed in a static context"
            )),
            _ => {
                let operands: Vec<Value> = self
                    .children()
                    .into_iter()
                    .map(|child| child.evaluate_static(ctx))
                    .collect();
                self.apply(&operands)
            }
        }
    }

    /// Evaluate continuously.
    ///
    /// Sub-trees without attribute references emit exactly once. Composite
    /// nodes recompute from the latest value of each operand whenever any
    /// operand changes.
    pub fn evaluate(&self, ctx: &EvaluationContext) -> BoxStream<'static, Value> {
        if !self.references_attributes() {
            return just(self.evaluate_static(ctx));
        }
        if let Self::Attribute { name } = self {
            return ctx.attributes().attribute(name, ctx);
        }
        let operands = self
            .children()
            .into_iter()
            .map(|child| child.evaluate(ctx))
            .collect();
        let node = self.clone();
        combine_latest(operands)
            .map(move |values| node.apply(&values))
            .boxed()
    }

    /// Apply this node's operator to already evaluated operands.
    fn apply(&self, operands: &[Value]) -> Value {
        match (self, operands) {
            (Self::Not(_), [value]) => match value.as_condition() {
                Ok(b) => Value::boolean(!b),
                Err(message) => Value::Error(message),
            },
            (Self::And(_), values) => {
                for value in values {
                    match value.as_condition() {
                        Ok(false) => return Value::boolean(false),
                        Ok(true) => {}
                        Err(message) => return Value::Error(message),
                    }
                }
                Value::boolean(true)
            }
            (Self::Or(_), values) => {
                for value in values {
                    match value.as_condition() {
                        Ok(true) => return Value::boolean(true),
                        Ok(false) => {}
                        Err(message) => return Value::Error(message),
                    }
                }
                Value::boolean(false)
            }
            (Self::Eq(..), [left, right]) => propagate(left, right)
                .unwrap_or_else(|| Value::boolean(left == right)),
            (Self::Neq(..), [left, right]) => propagate(left, right)
                .unwrap_or_else(|| Value::boolean(left != right)),
            (Self::Lt(..), [left, right]) => compare(left, right, |a, b| a < b),
            (Self::Lte(..), [left, right]) => compare(left, right, |a, b| a <= b),
            (Self::Gt(..), [left, right]) => compare(left, right, |a, b| a > b),
            (Self::Gte(..), [left, right]) => compare(left, right, |a, b| a >= b),
            (Self::In { .. }, [needle, haystack]) => membership(needle, haystack),
            (Self::Regex { pattern, .. }, [value]) => regex_match(value, pattern),
            _ => Value::error(format!(
                "Operator received {} operand(s) it cannot apply",
                operands.len()
            )),
        }
    }
}

fn propagate(left: &Value, right: &Value) -> Option<Value> {
    [left, right].into_iter().find(|v| v.is_error()).cloned()
}

fn compare(left: &Value, right: &Value, op: fn(f64, f64) -> bool) -> Value {
    if let Some(error) = propagate(left, right) {
        return error;
    }
    match (
        left.as_json().and_then(Json::as_f64),
        right.as_json().and_then(Json::as_f64),
    ) {
        (Some(a), Some(b)) => Value::boolean(op(a, b)),
        _ => Value::error(format!(
            "Type mismatch. Number comparison requires numbers, but got {left} and {right}"
        )),
    }
}

fn membership(needle: &Value, haystack: &Value) -> Value {
    if let Some(error) = propagate(needle, haystack) {
        return error;
    }
    match (needle, haystack) {
        (Value::Undefined, _) | (_, Value::Undefined) => Value::boolean(false),
        (Value::Defined(item), Value::Defined(Json::Array(items))) => {
            Value::boolean(items.contains(item))
        }
        (Value::Defined(Json::String(part)), Value::Defined(Json::String(whole))) => {
            Value::boolean(whole.contains(part.as_str()))
        }
        _ => Value::error(format!(
            "Type mismatch. 'in' requires an array or two strings, but got {needle} in {haystack}"
        )),
    }
}

/// Compiled patterns keyed by source. Cleared when full.
static REGEX_CACHE: LazyLock<DashMap<String, Regex>> = LazyLock::new(DashMap::new);
const REGEX_CACHE_CAPACITY: usize = 1024;

fn compiled_regex(pattern: &str) -> Result<Regex, regex::Error> {
    if let Some(regex) = REGEX_CACHE.get(pattern) {
        return Ok(regex.value().clone());
    }
    let regex = Regex::new(pattern)?;
    if REGEX_CACHE.len() >= REGEX_CACHE_CAPACITY {
        REGEX_CACHE.clear();
    }
    REGEX_CACHE.insert(pattern.to_string(), regex.clone());
    Ok(regex)
}

fn regex_match(value: &Value, pattern: &str) -> Value {
    match value {
        Value::Error(_) => value.clone(),
        Value::Defined(Json::String(text)) => match compiled_regex(pattern) {
            Ok(re) => Value::boolean(re.is_match(text)),
            Err(e) => Value::error(format!("Invalid regular expression '{pattern}': {e}")),
        },
        _ => Value::boolean(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributeRepository, NoAttributes};
    use crate::decision::AuthorizationSubscription;
    use serde_json::json;
    use std::collections::hash_map::DefaultHasher;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn ctx() -> EvaluationContext {
        let subscription = AuthorizationSubscription::new(
            json!({"name": "alice", "roles": ["doctor", "admin"], "age": 42}),
            json!("read"),
            json!({"type": "Patient", "id": "p1"}),
        );
        let mut variables = serde_json::Map::new();
        variables.insert("tenant".to_string(), json!("acme"));
        EvaluationContext::new(
            Arc::new(subscription),
            Arc::new(variables),
            Arc::new(NoAttributes),
        )
    }

    fn hash_of(expr: &Expr) -> u64 {
        let mut hasher = DefaultHasher::new();
        expr.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_structural_equality_and_hash() {
        let a = Expr::constant(json!({"x": 1, "y": [true, null]}));
        let b: Expr =
            serde_json::from_value(json!({"const": {"y": [true, null], "x": 1}})).unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(Expr::constant(json!(1)), Expr::constant(json!(1.0)));
    }

    #[test]
    fn test_deserialize_tree() {
        let expr: Expr = serde_json::from_value(json!({
            "and": [
                {"eq": [{"subscription": {"element": "action"}}, {"const": "read"}]},
                {"not": {"variable": "locked"}}
            ]
        }))
        .unwrap();
        assert_eq!(
            expr,
            Expr::all(vec![
                Expr::equals(
                    Expr::subscription(SubscriptionElement::Action, None),
                    Expr::constant(json!("read"))
                ),
                Expr::negate(Expr::variable("locked")),
            ])
        );
    }

    #[test]
    fn test_static_lookups() {
        let ctx = ctx();
        assert_eq!(
            Expr::subject("/name").evaluate_static(&ctx),
            Value::from(json!("alice"))
        );
        assert_eq!(Expr::subject("/missing").evaluate_static(&ctx), Value::Undefined);
        assert_eq!(
            Expr::variable("tenant").evaluate_static(&ctx),
            Value::from(json!("acme"))
        );
        assert!(Expr::attribute("x").evaluate_static(&ctx).is_error());
    }

    #[test]
    fn test_operators() {
        let ctx = ctx();
        let t = Value::boolean(true);
        let f = Value::boolean(false);

        let is_doctor = Expr::contains(Expr::subject("/roles"), Expr::constant(json!("doctor")));
        assert_eq!(is_doctor.evaluate_static(&ctx), t);

        let adult = Expr::greater_than(Expr::subject("/age"), Expr::constant(json!(17)));
        assert_eq!(adult.evaluate_static(&ctx), t);

        let name = Expr::matches(Expr::subject("/name"), "^al");
        assert_eq!(name.evaluate_static(&ctx), t);

        let neq = Expr::not_equals(Expr::resource("/type"), Expr::constant(json!("Patient")));
        assert_eq!(neq.evaluate_static(&ctx), f);

        let short_circuit = Expr::all(vec![Expr::boolean(false), Expr::constant(json!(3))]);
        assert_eq!(short_circuit.evaluate_static(&ctx), f);
    }

    #[test]
    fn test_type_errors() {
        let ctx = ctx();
        assert!(Expr::negate(Expr::constant(json!(1))).evaluate_static(&ctx).is_error());
        assert!(
            Expr::less_than(Expr::subject("/name"), Expr::constant(json!(1)))
                .evaluate_static(&ctx)
                .is_error()
        );
        assert!(Expr::matches(Expr::subject("/name"), "(").evaluate_static(&ctx).is_error());
        assert!(Expr::any(vec![Expr::subject("/missing")]).evaluate_static(&ctx).is_error());
    }

    #[test]
    fn test_regex_compiled_once_per_pattern() {
        let ctx = ctx();
        let pattern = "^ali(ce)?$";
        let expr = Expr::matches(Expr::subject("/name"), pattern);
        assert_eq!(expr.evaluate_static(&ctx), Value::boolean(true));
        assert!(REGEX_CACHE.contains_key(pattern));
        assert_eq!(expr.evaluate_static(&ctx), Value::boolean(true));

        let invalid = "unclosed(group";
        assert!(Expr::matches(Expr::subject("/name"), invalid).evaluate_static(&ctx).is_error());
        assert!(!REGEX_CACHE.contains_key(invalid));
    }

    #[test]
    fn test_references_attributes() {
        assert!(!Expr::subject("/a").references_attributes());
        assert!(
            Expr::all(vec![Expr::boolean(true), Expr::negate(Expr::attribute("a"))])
                .references_attributes()
        );
    }

    #[tokio::test]
    async fn test_streaming_evaluation_follows_attribute() {
        let repository = Arc::new(AttributeRepository::new());
        let ctx = EvaluationContext::new(
            Arc::new(AuthorizationSubscription::default()),
            Arc::new(Default::default()),
            repository.clone(),
        );
        let expr = Expr::greater_than(Expr::attribute("hour"), Expr::constant(json!(8)));
        let mut values = expr.evaluate(&ctx);

        repository.publish("hour", Value::from(json!(7)));
        let first = timeout(Duration::from_secs(1), values.next()).await.unwrap();
        assert_eq!(first, Some(Value::boolean(false)));

        repository.publish("hour", Value::from(json!(9)));
        let second = timeout(Duration::from_secs(1), values.next()).await.unwrap();
        assert_eq!(second, Some(Value::boolean(true)));
    }
}
