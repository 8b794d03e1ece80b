//! Built-in generators and generator wrappers.
//!
//! Real sources (templates, charts, directories) live outside this crate and
//! only need to implement [`Generator`].

use async_trait::async_trait;
use kpipe_cache::{render_key, Cache, CacheConfig, RenderCache};
use kpipe_core::{Context, Document, FilterRef, Generator, GeneratorRef, TransformerRef};
use serde_json::Value as Json;
use tokio::sync::Mutex;
use tracing::debug;

use crate::pipeline;

/// In-memory source. Every call returns a fresh copy of the documents.
pub struct StaticGenerator {
    name: String,
    docs: Vec<Document>,
}

impl StaticGenerator {
    pub fn new(name: impl Into<String>, docs: Vec<Document>) -> Self { Self { name: name.into(), docs } }

    /// Parse a multi-document YAML stream up front.
    pub fn from_yaml(name: impl Into<String>, yaml: &str) -> anyhow::Result<Self> {
        Ok(Self::new(name, Document::from_yaml_stream(yaml)?))
    }
}

#[async_trait]
impl Generator for StaticGenerator {
    async fn process(&self, ctx: &Context, _values: Option<&Json>) -> anyhow::Result<Vec<Document>> {
        ctx.check()?;
        Ok(self.docs.clone())
    }

    fn name(&self) -> &str { &self.name }
}

/// Generator-owned filtering and transformation, applied to that
/// generator's output before the engine aggregates it.
pub struct GeneratorPipeline {
    inner: GeneratorRef,
    filters: Vec<FilterRef>,
    transformers: Vec<TransformerRef>,
}

impl GeneratorPipeline {
    pub fn new(inner: GeneratorRef) -> Self { Self { inner, filters: Vec::new(), transformers: Vec::new() } }

    pub fn filter(mut self, f: FilterRef) -> Self {
        self.filters.push(f);
        self
    }

    pub fn transformer(mut self, t: TransformerRef) -> Self {
        self.transformers.push(t);
        self
    }
}

#[async_trait]
impl Generator for GeneratorPipeline {
    async fn process(&self, ctx: &Context, values: Option<&Json>) -> anyhow::Result<Vec<Document>> {
        let docs = self.inner.process(ctx, values).await?;
        Ok(pipeline::apply(ctx, docs, &self.filters, &self.transformers)?)
    }

    fn name(&self) -> &str { self.inner.name() }
}

/// Memoizes an expensive generator per distinct set of values.
///
/// The key is derived from `identity` plus the canonical JSON of the values.
/// Misses are loaded under one lock per cached source, so concurrent renders
/// with the same values invoke the inner generator once.
pub struct CachedGenerator {
    inner: GeneratorRef,
    identity: String,
    cache: RenderCache,
    load: Mutex<()>,
}

impl CachedGenerator {
    pub fn new(inner: GeneratorRef, identity: impl Into<String>, config: CacheConfig) -> Self {
        Self::with_cache(inner, identity, RenderCache::new(config))
    }

    pub fn with_cache(inner: GeneratorRef, identity: impl Into<String>, cache: RenderCache) -> Self {
        Self { inner, identity: identity.into(), cache, load: Mutex::new(()) }
    }

    /// Drop expired entries.
    pub fn sync(&self) { self.cache.sync() }
}

#[async_trait]
impl Generator for CachedGenerator {
    async fn process(&self, ctx: &Context, values: Option<&Json>) -> anyhow::Result<Vec<Document>> {
        let key = render_key(&self.identity, values);
        if let Some(hit) = self.cache.get(&key) {
            debug!(generator = %self.identity, key = %key, "render cache hit");
            return Ok(hit);
        }
        let _guard = self.load.lock().await;
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let docs = self.inner.process(ctx, values).await?;
        self.cache.set_slice(&key, &docs);
        debug!(generator = %self.identity, key = %key, docs = docs.len(), "render cache fill");
        Ok(docs)
    }

    fn name(&self) -> &str { self.inner.name() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kpipe_core::{filter_fn, transformer_fn};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Generator for Counting {
        async fn process(&self, _ctx: &Context, values: Option<&Json>) -> anyhow::Result<Vec<Document>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let replicas = values.and_then(|v| v.get("replicas")).cloned().unwrap_or(json!(1));
            Ok(vec![Document::from_value(json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": { "name": format!("web-{}", n) },
                "spec": { "replicas": replicas }
            }))?])
        }
    }

    #[tokio::test]
    async fn static_generator_returns_copies() {
        let g = StaticGenerator::from_yaml("mem", "kind: ConfigMap\nmetadata:\n  name: a\n").unwrap();
        let mut first = g.process(&Context::new(), None).await.unwrap();
        first[0].set_name("changed");
        let second = g.process(&Context::new(), None).await.unwrap();
        assert_eq!(second[0].name(), "a");
        assert_eq!(g.name(), "mem");
    }

    #[tokio::test]
    async fn generator_pipeline_applies_own_stages() {
        let yaml = "kind: ConfigMap\nmetadata:\n  name: a\n---\nkind: Secret\nmetadata:\n  name: b\n";
        let g = GeneratorPipeline::new(Arc::new(StaticGenerator::from_yaml("mem", yaml).unwrap()))
            .filter(filter_fn(|_, d| Ok(d.kind() == "Secret")))
            .transformer(transformer_fn(|_, mut d| {
                d.set_namespace("vault");
                Ok(d)
            }));
        let out = g.process(&Context::new(), None).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].identity(), "Secret:b (vault)");
    }

    #[tokio::test]
    async fn cached_generator_invokes_inner_once_per_values() {
        let inner = Arc::new(Counting { calls: AtomicUsize::new(0) });
        let g = CachedGenerator::new(inner.clone(), "chart:web", CacheConfig { ttl: Duration::from_secs(60) });
        let ctx = Context::new();
        let vals = json!({ "replicas": 3 });

        let mut a = g.process(&ctx, Some(&vals)).await.unwrap();
        a[0].set_name("mutated-by-caller");
        let b = g.process(&ctx, Some(&vals)).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b[0].name(), "web-0");

        let c = g.process(&ctx, Some(&json!({ "replicas": 5 }))).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(c[0].get_path("spec.replicas").unwrap(), Some(&json!(5)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_misses_load_once() {
        let inner = Arc::new(Counting { calls: AtomicUsize::new(0) });
        let g = Arc::new(CachedGenerator::new(inner.clone(), "chart:web", CacheConfig::default()));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let g = Arc::clone(&g);
            handles.push(tokio::spawn(async move { g.process(&Context::new(), None).await }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap().len(), 1);
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
