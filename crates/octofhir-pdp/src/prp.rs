//! Policy retrieval point.
//!
//! Holds the current compiled index as a copy-on-write snapshot. Loading a
//! new document set compiles a fresh container and replaces the snapshot as
//! a whole; matches already running keep reading the snapshot they started
//! with.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::watch;

use crate::context::EvaluationContext;
use crate::document::Document;
use crate::error::{PdpError, PdpResult};
use crate::index::{CanonicalIndexContainer, IndexCompiler, match_documents};
use crate::stream::watch_stream;

/// A published index together with its version.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    pub version: u64,
    pub container: Arc<CanonicalIndexContainer>,
}

/// Candidate documents for a subscription under one index version.
#[derive(Debug, Clone)]
pub struct PolicyRetrievalResult {
    /// Matching documents in load order.
    pub documents: Vec<Arc<Document>>,
    pub errors_in_target: bool,
    pub version: u64,
}

/// Outcome of [`PolicyRetrievalPoint::load`].
#[derive(Debug, Default)]
pub struct LoadReport {
    pub version: u64,
    pub loaded: usize,
    /// Documents excluded from the index, with the reason.
    pub rejected: Vec<PdpError>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

pub struct PolicyRetrievalPoint {
    snapshot: watch::Sender<Arc<IndexSnapshot>>,
}

impl PolicyRetrievalPoint {
    /// A retrieval point over an empty document set (version 0).
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(IndexSnapshot::default()));
        Self { snapshot }
    }

    /// Create a retrieval point and load `documents` into it.
    pub fn with_documents(documents: Vec<Document>) -> PdpResult<(Self, LoadReport)> {
        let prp = Self::new();
        let report = prp.load(documents)?;
        Ok((prp, report))
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn version(&self) -> u64 {
        self.snapshot.borrow().version
    }

    /// Replace the document set.
    ///
    /// Duplicate ids fail the whole load and leave the current snapshot in
    /// place. Documents whose target cannot be normalized are left out of the
    /// new index and listed in the report.
    pub fn load(&self, documents: Vec<Document>) -> PdpResult<LoadReport> {
        let mut seen = HashSet::new();
        for document in &documents {
            if !seen.insert(document.id.as_str()) {
                return Err(PdpError::DuplicateDocument(document.id.clone()));
            }
        }

        let mut compiler = IndexCompiler::new();
        let mut rejected = Vec::new();
        for document in documents {
            if let Err(e) = compiler.add(Arc::new(document)) {
                tracing::warn!(error = %e, "Excluding document from index");
                rejected.push(e);
            }
        }

        let container = Arc::new(compiler.finish());
        let loaded = container.document_count();
        let version = self.version() + 1;
        tracing::info!(
            version,
            documents = container.document_count(),
            predicates = container.predicate_count(),
            conjunctions = container.conjunction_count(),
            rejected = rejected.len(),
            "Policy index rebuilt"
        );
        self.snapshot
            .send_replace(Arc::new(IndexSnapshot { version, container }));

        Ok(LoadReport {
            version,
            loaded,
            rejected,
        })
    }

    /// Follow the candidate documents for `ctx`, re-matching on every index
    /// replacement.
    pub fn retrieve(&self, ctx: EvaluationContext) -> BoxStream<'static, PolicyRetrievalResult> {
        watch_stream(self.snapshot.subscribe())
            .map(move |snapshot| {
                let matched = match_documents(&snapshot.container, &ctx);
                PolicyRetrievalResult {
                    documents: matched.documents,
                    errors_in_target: matched.errors_in_target,
                    version: snapshot.version,
                }
            })
            .boxed()
    }
}

impl Default for PolicyRetrievalPoint {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::NoAttributes;
    use crate::decision::AuthorizationSubscription;
    use crate::document::{Entitlement, Policy};
    use crate::expr::Expr;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn doc(id: &str, target: Option<Expr>) -> Document {
        let mut policy = Policy::new(id, Entitlement::Permit);
        policy.target = target;
        Document::policy(id, policy)
    }

    fn ctx() -> EvaluationContext {
        EvaluationContext::new(
            Arc::new(AuthorizationSubscription::new(json!("bob"), json!("read"), json!({}))),
            Arc::new(Default::default()),
            Arc::new(NoAttributes),
        )
    }

    #[test]
    fn test_load_reports_rejected_documents() {
        let prp = PolicyRetrievalPoint::new();
        let report = prp
            .load(vec![
                doc("ok", None),
                doc("bad", Some(Expr::all(vec![]))),
            ])
            .unwrap();
        assert_eq!(report.version, 1);
        assert_eq!(report.loaded, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].document(), Some("bad"));
        assert!(!report.is_clean());
        assert_eq!(prp.snapshot().container.document_count(), 1);
    }

    #[test]
    fn test_duplicate_ids_keep_previous_snapshot() {
        let (prp, _) = PolicyRetrievalPoint::with_documents(vec![doc("a", None)]).unwrap();
        let err = prp.load(vec![doc("x", None), doc("x", None)]).unwrap_err();
        assert!(matches!(err, PdpError::DuplicateDocument(ref id) if id == "x"));
        assert_eq!(prp.version(), 1);
        assert_eq!(prp.snapshot().container.documents()[0].id, "a");
    }

    #[tokio::test]
    async fn test_retrieve_follows_reloads() {
        let prp = PolicyRetrievalPoint::new();
        let mut results = prp.retrieve(ctx());

        let first = timeout(Duration::from_secs(1), results.next()).await.unwrap().unwrap();
        assert_eq!(first.version, 0);
        assert!(first.documents.is_empty());

        prp.load(vec![
            doc("reads", Some(Expr::equals(Expr::action(""), Expr::constant(json!("read"))))),
            doc("writes", Some(Expr::equals(Expr::action(""), Expr::constant(json!("write"))))),
        ])
        .unwrap();
        let second = timeout(Duration::from_secs(1), results.next()).await.unwrap().unwrap();
        assert_eq!(second.version, 1);
        assert_eq!(second.documents.len(), 1);
        assert_eq!(second.documents[0].id, "reads");
        assert!(!second.errors_in_target);
    }
}
