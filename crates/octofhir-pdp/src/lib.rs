//! # octofhir-pdp
//!
//! Streaming policy decision point for the OctoFHIR server.
//!
//! This crate provides:
//! - A canonical target index that matches subscriptions against thousands
//!   of policy targets with each distinct literal evaluated at most once
//! - Combining algorithms merging per-document decisions into one
//! - A continuous decision pipeline that re-emits whenever attributes,
//!   documents or configuration change
//! - A file-system document source with hot reload
//!
//! ## Overview
//!
//! Documents are loaded into the [`PolicyRetrievalPoint`], which compiles
//! their targets into a [`CanonicalIndexContainer`]. The
//! [`EmbeddedPolicyDecisionPoint`] turns each [`AuthorizationSubscription`]
//! into a stream of [`AuthorizationDecision`]s. Runtime failures never end a
//! stream; they surface as `INDETERMINATE`.
//!
//! ```ignore
//! let (prp, report) = PolicyRetrievalPoint::with_documents(documents)?;
//! let pdp = EmbeddedPolicyDecisionPoint::from_config(&config, Arc::new(prp), attributes);
//! let mut decisions = pdp.decide(subscription);
//! while let Some(decision) = decisions.next().await {
//!     enforce(decision);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`index`] - DNF compilation and bitmask matching of targets
//! - [`combining`] - Combining algorithms
//! - [`pdp`] - Decision pipeline and interceptors
//! - [`prp`] - Policy retrieval point
//! - [`document`] - Policies, policy sets and body evaluation
//! - [`expr`] - Expression trees for targets and bodies
//! - [`source`] - File-system document source
//! - [`config`] - Configuration
//! - [`stream`] - Stream operators used by the pipeline

pub mod attributes;
pub mod combining;
pub mod config;
pub mod context;
pub mod decision;
pub mod document;
pub mod error;
pub mod expr;
pub mod index;
pub mod pdp;
pub mod prp;
pub mod source;
pub mod stream;
pub mod value;

pub use attributes::{AttributeProvider, AttributeRepository, NoAttributes};
pub use combining::{CombinedDecision, CombiningAlgorithm, combine_documents};
pub use config::{ConfigurationProvider, PdpConfig, PdpConfiguration, SourceConfig};
pub use context::{EvaluationContext, Variables};
pub use decision::{
    AuthorizationDecision, AuthorizationSubscription, Decision, IdentifiableAuthorizationDecision,
    MultiAuthorizationDecision, MultiAuthorizationSubscription, SubscriptionElement,
};
pub use document::{
    Document, DocumentEvaluationResult, Entitlement, Policy, PolicyElement, PolicySet,
};
pub use error::{PdpError, PdpResult};
pub use expr::Expr;
pub use index::{CanonicalIndexContainer, IndexCompiler, MatchResult, match_documents};
pub use pdp::{
    DecisionInterceptor, EmbeddedPolicyDecisionPoint, PdpDecision, SubscriptionInterceptor,
    TracingDecisionInterceptor,
};
pub use prp::{LoadReport, PolicyRetrievalPoint, PolicyRetrievalResult};
pub use source::{FileSystemSource, WatchHandle};
pub use value::Value;
