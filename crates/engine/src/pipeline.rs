//! Filter/transform applier over a document batch.
//!
//! Single pass, input order preserved. A rejected document is dropped
//! silently; any filter or transformer error aborts the whole batch.

use kpipe_core::{Context, Document, Filter, FilterRef, Transformer, TransformerRef};
use kpipe_filter::And;
use kpipe_transform::Chain;
use tracing::trace;

use crate::error::PipelineError;

/// Keep documents passing every filter (AND semantics, short-circuit).
pub fn filter(ctx: &Context, docs: Vec<Document>, filters: &[FilterRef]) -> Result<Vec<Document>, PipelineError> {
    apply(ctx, docs, filters, &[])
}

/// Run every document through the transformers in order.
pub fn transform(
    ctx: &Context,
    docs: Vec<Document>,
    transformers: &[TransformerRef],
) -> Result<Vec<Document>, PipelineError> {
    apply(ctx, docs, &[], transformers)
}

/// Filter then transform each document. Transformers never see a document a
/// filter rejected or errored on.
pub fn apply(
    ctx: &Context,
    docs: Vec<Document>,
    filters: &[FilterRef],
    transformers: &[TransformerRef],
) -> Result<Vec<Document>, PipelineError> {
    if filters.is_empty() && transformers.is_empty() {
        ctx.check()?;
        return Ok(docs);
    }
    let all = And::new(filters.iter().cloned());
    let chain = Chain::new(transformers.iter().cloned());
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        ctx.check()?;
        let keep = all
            .matches(ctx, &doc)
            .map_err(|source| PipelineError::Filter { identity: doc.identity(), source })?;
        if !keep {
            trace!(doc = %doc.identity(), "dropped by filter");
            continue;
        }
        let identity = doc.identity();
        let doc = chain.transform(ctx, doc).map_err(|source| PipelineError::Transform { identity, source })?;
        out.push(doc);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use kpipe_core::{filter_fn, transformer_fn};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn doc(kind: &str, name: &str, ns: &str) -> Document {
        Document::from_value(json!({
            "apiVersion": "v1",
            "kind": kind,
            "metadata": { "name": name, "namespace": ns }
        }))
        .unwrap()
    }

    fn kind_is(kind: &'static str) -> FilterRef { filter_fn(move |_, d| Ok(d.kind() == kind)) }

    #[test]
    fn drops_rejected_documents_in_order() {
        let docs = vec![doc("Pod", "a", "x"), doc("Service", "b", "x"), doc("Pod", "c", "y")];
        let out = filter(&Context::new(), docs, &[kind_is("Pod")]).unwrap();
        let names: Vec<&str> = out.iter().map(|d| d.name()).collect();
        assert_eq!(names, ["a", "c"]);
    }

    #[test]
    fn no_filters_keeps_everything() {
        let docs = vec![doc("Pod", "a", "x"), doc("Service", "b", "x")];
        assert_eq!(apply(&Context::new(), docs.clone(), &[], &[]).unwrap(), docs);
    }

    #[test]
    fn filter_error_short_circuits_before_transformers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = {
            let calls = calls.clone();
            transformer_fn(move |_, d| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(d)
            })
        };
        let always = filter_fn(|_, _| Ok(true));
        let broken = filter_fn(|_, _| Err(anyhow!("selector exploded")));
        let err = apply(&Context::new(), vec![doc("Pod", "web", "prod")], &[always, broken], &[counter]).unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        match &err {
            PipelineError::Filter { identity, source } => {
                assert_eq!(identity, "Pod:web (prod)");
                assert_eq!(source.to_string(), "selector exploded");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(err.to_string().contains("Pod:web (prod)"));
    }

    #[test]
    fn transformer_error_carries_document_identity() {
        let boom = transformer_fn(|_, _| Err(anyhow!("no")));
        let err = transform(&Context::new(), vec![doc("Secret", "s", "")], &[boom]).unwrap_err();
        assert!(matches!(&err, PipelineError::Transform { identity, .. } if identity == "Secret:s (cluster)"));
        let root = std::error::Error::source(&err).expect("has source");
        assert_eq!(root.to_string(), "no");
    }

    #[test]
    fn transformers_apply_in_order() {
        let a = transformer_fn(|_, mut d| {
            d.set_name(format!("{}-a", d.name()));
            Ok(d)
        });
        let b = transformer_fn(|_, mut d| {
            d.set_name(format!("{}-b", d.name()));
            Ok(d)
        });
        let out = transform(&Context::new(), vec![doc("Pod", "p", "x")], &[a, b]).unwrap();
        assert_eq!(out[0].name(), "p-a-b");
    }

    #[test]
    fn cancelled_context_aborts_batch() {
        let ctx = Context::new();
        ctx.cancel();
        let err = filter(&ctx, vec![doc("Pod", "a", "x")], &[kind_is("Pod")]).unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }
}
