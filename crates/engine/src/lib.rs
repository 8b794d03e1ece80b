//! kpipe engine: runs registered generators, aggregates their output in
//! registration order, then applies engine-level and render-time filters and
//! transformers.
//!
//! A render either returns the complete document set or a single
//! [`EngineError`]; partial results are never returned.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use kpipe_core::{Cancelled, Context, Document, FilterRef, Generator, GeneratorRef, TransformerRef};
use metrics::{counter, histogram};
use serde_json::Value as Json;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

mod error;
pub mod generator;
pub mod pipeline;

pub use error::{EngineError, PipelineError, Stage};
pub use generator::{CachedGenerator, GeneratorPipeline, StaticGenerator};

/// Engine execution settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineConfig {
    /// Run generators concurrently by default.
    pub parallel: bool,
    /// Upper bound on concurrently running generators; `None` means one
    /// slot per generator.
    pub max_parallelism: Option<usize>,
    /// Skip failing generators instead of failing the render.
    pub tolerate_generator_failures: bool,
}

impl EngineConfig {
    /// Defaults overridden by `KPIPE_PARALLEL` and `KPIPE_MAX_PARALLEL`.
    pub fn from_env() -> Self {
        let parallel = std::env::var("KPIPE_PARALLEL")
            .ok()
            .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        let max_parallelism =
            std::env::var("KPIPE_MAX_PARALLEL").ok().and_then(|s| s.parse::<usize>().ok()).filter(|n| *n > 0);
        Self { parallel, max_parallelism, tolerate_generator_failures: false }
    }
}

/// Per-call options. Filters and transformers are appended after the
/// engine-level ones; values replace the engine-level values when given.
#[derive(Clone, Default)]
pub struct RenderOptions {
    filters: Vec<FilterRef>,
    transformers: Vec<TransformerRef>,
    values: Option<Json>,
    parallel: Option<bool>,
}

impl RenderOptions {
    pub fn new() -> Self { Self::default() }

    pub fn filter(mut self, f: FilterRef) -> Self {
        self.filters.push(f);
        self
    }

    pub fn filters(mut self, fs: impl IntoIterator<Item = FilterRef>) -> Self {
        self.filters.extend(fs);
        self
    }

    pub fn transformer(mut self, t: TransformerRef) -> Self {
        self.transformers.push(t);
        self
    }

    pub fn transformers(mut self, ts: impl IntoIterator<Item = TransformerRef>) -> Self {
        self.transformers.extend(ts);
        self
    }

    pub fn values(mut self, v: Json) -> Self {
        self.values = Some(v);
        self
    }

    /// Override the engine's parallel setting for this call only.
    pub fn parallel(mut self, on: bool) -> Self {
        self.parallel = Some(on);
        self
    }
}

pub struct EngineBuilder {
    generators: Vec<GeneratorRef>,
    filters: Vec<FilterRef>,
    transformers: Vec<TransformerRef>,
    values: Option<Json>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new() -> Self { Self::with_config(EngineConfig::from_env()) }

    pub fn with_config(config: EngineConfig) -> Self {
        Self { generators: Vec::new(), filters: Vec::new(), transformers: Vec::new(), values: None, config }
    }

    pub fn generator(mut self, g: GeneratorRef) -> Self {
        self.generators.push(g);
        self
    }

    pub fn generators(mut self, gs: impl IntoIterator<Item = GeneratorRef>) -> Self {
        self.generators.extend(gs);
        self
    }

    pub fn filter(mut self, f: FilterRef) -> Self {
        self.filters.push(f);
        self
    }

    pub fn transformer(mut self, t: TransformerRef) -> Self {
        self.transformers.push(t);
        self
    }

    pub fn values(mut self, v: Json) -> Self {
        self.values = Some(v);
        self
    }

    pub fn parallel(mut self, on: bool) -> Self {
        self.config.parallel = on;
        self
    }

    pub fn max_parallelism(mut self, n: usize) -> Self {
        self.config.max_parallelism = Some(n.max(1));
        self
    }

    pub fn tolerate_generator_failures(mut self, on: bool) -> Self {
        self.config.tolerate_generator_failures = on;
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            generators: self.generators,
            filters: self.filters,
            transformers: self.transformers,
            values: self.values.map(Arc::new),
            config: self.config,
        }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self { Self::new() }
}

/// Immutable after [`EngineBuilder::build`]; cheap to share behind an `Arc`
/// and safe to render from several tasks at once.
pub struct Engine {
    generators: Vec<GeneratorRef>,
    filters: Vec<FilterRef>,
    transformers: Vec<TransformerRef>,
    values: Option<Arc<Json>>,
    config: EngineConfig,
}

impl Engine {
    pub fn builder() -> EngineBuilder { EngineBuilder::new() }

    pub fn config(&self) -> &EngineConfig { &self.config }

    pub fn generator_count(&self) -> usize { self.generators.len() }

    pub async fn render(&self, ctx: &Context, opts: RenderOptions) -> Result<Vec<Document>, EngineError> {
        let started = Instant::now();
        counter!("kpipe_render_total", 1u64);
        let res = self.render_inner(ctx, opts).await;
        histogram!("kpipe_render_ms", started.elapsed().as_secs_f64() * 1000.0);
        match &res {
            Ok(docs) => debug!(docs = docs.len(), took_ms = %started.elapsed().as_millis(), "render done"),
            Err(e) => {
                counter!("kpipe_render_errors_total", 1u64);
                debug!(error = %e, "render failed");
            }
        }
        res
    }

    async fn render_inner(&self, ctx: &Context, opts: RenderOptions) -> Result<Vec<Document>, EngineError> {
        ctx.check()?;
        let RenderOptions { filters, transformers, values, parallel } = opts;
        let values = values.map(Arc::new).or_else(|| self.values.clone());
        let parallel = parallel.unwrap_or(self.config.parallel);

        let docs = if parallel && self.generators.len() > 1 {
            self.generate_parallel(ctx, values).await?
        } else {
            self.generate_sequential(ctx, values.as_deref()).await?
        };
        debug!(docs = docs.len(), generators = self.generators.len(), parallel, "aggregated");

        let stages: [(Stage, &[FilterRef]); 2] =
            [(Stage::EngineFilter, self.filters.as_slice()), (Stage::RenderFilter, filters.as_slice())];
        let mut docs = docs;
        for (stage, fs) in stages {
            ctx.check()?;
            docs = pipeline::filter(ctx, docs, fs).map_err(|e| EngineError::at(stage, e))?;
        }
        let stages: [(Stage, &[TransformerRef]); 2] =
            [(Stage::EngineTransform, self.transformers.as_slice()), (Stage::RenderTransform, transformers.as_slice())];
        for (stage, ts) in stages {
            ctx.check()?;
            docs = pipeline::transform(ctx, docs, ts).map_err(|e| EngineError::at(stage, e))?;
        }
        Ok(docs)
    }

    async fn generate_sequential(&self, ctx: &Context, values: Option<&Json>) -> Result<Vec<Document>, EngineError> {
        let mut out = Vec::new();
        for (index, g) in self.generators.iter().enumerate() {
            let res = run_generator(g.as_ref(), ctx, values).await;
            self.settle(ctx, index, g.name(), res, &mut out)?;
        }
        Ok(out)
    }

    /// Fork-join: one task per generator bounded by a semaphore, results
    /// buffered and joined in registration order. Dropping the render future
    /// aborts every task still running.
    async fn generate_parallel(&self, ctx: &Context, values: Option<Arc<Json>>) -> Result<Vec<Document>, EngineError> {
        let slots = self.config.max_parallelism.unwrap_or(self.generators.len()).max(1);
        let sem = Arc::new(Semaphore::new(slots));
        let mut tasks = AbortGuard(Vec::with_capacity(self.generators.len()));
        for g in &self.generators {
            let g = Arc::clone(g);
            let ctx = ctx.clone();
            let values = values.clone();
            let sem = Arc::clone(&sem);
            tasks.0.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.map_err(anyhow::Error::from)?;
                run_generator(g.as_ref(), &ctx, values.as_deref()).await
            }));
        }

        let mut out = Vec::new();
        for index in 0..tasks.0.len() {
            let name = self.generators[index].name();
            match (&mut tasks.0[index]).await {
                Ok(res) => self.settle(ctx, index, name, res, &mut out)?,
                Err(e) => return Err(EngineError::Join { index, name: name.to_string(), reason: e.to_string() }),
            }
        }
        Ok(out)
    }

    fn settle(
        &self,
        ctx: &Context,
        index: usize,
        name: &str,
        res: anyhow::Result<Vec<Document>>,
        out: &mut Vec<Document>,
    ) -> Result<(), EngineError> {
        match res {
            Ok(docs) => {
                debug!(generator = %name, index, docs = docs.len(), "generator done");
                out.extend(docs);
                Ok(())
            }
            Err(e) if ctx.is_cancelled() || e.downcast_ref::<Cancelled>().is_some() => Err(EngineError::Cancelled),
            Err(e) if self.config.tolerate_generator_failures => {
                counter!("kpipe_generator_failures_total", 1u64);
                warn!(generator = %name, index, error = %format!("{:#}", e), "generator failed; skipping");
                Ok(())
            }
            Err(source) => Err(EngineError::Generator { index, name: name.to_string(), source }),
        }
    }
}

// Aborts the spawned generator tasks on drop: early return or a dropped render.
struct AbortGuard(Vec<JoinHandle<anyhow::Result<Vec<Document>>>>);

impl Drop for AbortGuard {
    fn drop(&mut self) {
        for h in &self.0 {
            h.abort();
        }
    }
}

/// Invoke one generator, returning early with [`Cancelled`] as soon as the
/// context is cancelled.
async fn run_generator(g: &dyn Generator, ctx: &Context, values: Option<&Json>) -> anyhow::Result<Vec<Document>> {
    ctx.check()?;
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(Cancelled.into()),
        res = g.process(ctx, values) => res,
    }
}
