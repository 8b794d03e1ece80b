//! kpipe core types: documents, render context and the capability traits
//! (filter, transformer, generator) the rest of the workspace composes.

#![forbid(unsafe_code)]

use std::sync::Arc;

use serde_json::Value as Json;

mod context;
mod document;

pub use context::{Cancelled, Context};
pub use document::{Document, PathError, StringMap};

/// Predicate deciding whether a document survives.
///
/// Implementations hold no per-call state; configuration is captured at
/// construction time.
pub trait Filter: Send + Sync {
    fn matches(&self, ctx: &Context, doc: &Document) -> anyhow::Result<bool>;
}

/// Mutation applied to a document. Ownership moves through the call so the
/// returned document is the one later stages see.
pub trait Transformer: Send + Sync {
    fn transform(&self, ctx: &Context, doc: Document) -> anyhow::Result<Document>;
}

/// Source of documents (templates, charts, directories, in-memory lists...).
#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    /// Produce documents. `values` are optional override values for sources
    /// that are parameterized; others ignore them.
    async fn process(&self, ctx: &Context, values: Option<&Json>) -> anyhow::Result<Vec<Document>>;

    /// Name used in logs and error context.
    fn name(&self) -> &str { "generator" }
}

pub type FilterRef = Arc<dyn Filter>;
pub type TransformerRef = Arc<dyn Transformer>;
pub type GeneratorRef = Arc<dyn Generator>;

impl<F> Filter for F
where
    F: Fn(&Context, &Document) -> anyhow::Result<bool> + Send + Sync,
{
    fn matches(&self, ctx: &Context, doc: &Document) -> anyhow::Result<bool> { self(ctx, doc) }
}

impl<F> Transformer for F
where
    F: Fn(&Context, Document) -> anyhow::Result<Document> + Send + Sync,
{
    fn transform(&self, ctx: &Context, doc: Document) -> anyhow::Result<Document> { self(ctx, doc) }
}

/// Wrap a closure as a shared filter. Stating the bound here lets closures
/// infer their higher-ranked argument types.
pub fn filter_fn<F>(f: F) -> FilterRef
where
    F: Fn(&Context, &Document) -> anyhow::Result<bool> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn transformer_fn<F>(f: F) -> TransformerRef
where
    F: Fn(&Context, Document) -> anyhow::Result<Document> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub mod prelude {
    pub use super::{
        filter_fn, transformer_fn, Cancelled, Context, Document, Filter, FilterRef, Generator, GeneratorRef,
        StringMap, Transformer, TransformerRef,
    };
}
