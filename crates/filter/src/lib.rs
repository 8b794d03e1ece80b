//! kpipe filters: boolean/conditional combinators over [`Filter`] plus a set
//! of primitive metadata filters in [`meta`].
//!
//! Combinators evaluate left-to-right and stop at the first decisive result
//! or the first error. Errors are propagated untouched so callers can add
//! document context once, at the pipeline boundary.

#![forbid(unsafe_code)]

use std::sync::Arc;

use kpipe_core::{filter_fn, Context, Document, Filter, FilterRef};

pub mod meta;
mod selector;

pub use selector::{Requirement, Selector, SelectorError};

/// Passes iff every inner filter passes. No filters ⇒ passes.
pub struct And {
    filters: Vec<FilterRef>,
}

impl And {
    pub fn new(filters: impl IntoIterator<Item = FilterRef>) -> Self {
        Self { filters: filters.into_iter().collect() }
    }

    pub fn len(&self) -> usize { self.filters.len() }
    pub fn is_empty(&self) -> bool { self.filters.is_empty() }
}

impl Filter for And {
    fn matches(&self, ctx: &Context, doc: &Document) -> anyhow::Result<bool> {
        for f in &self.filters {
            if !f.matches(ctx, doc)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Passes iff any inner filter passes.
///
/// No filters ⇒ passes. This is intentionally not the boolean identity for
/// OR: an empty `Or` is used as a no-op filter and must keep documents.
pub struct Or {
    filters: Vec<FilterRef>,
}

impl Or {
    pub fn new(filters: impl IntoIterator<Item = FilterRef>) -> Self {
        Self { filters: filters.into_iter().collect() }
    }
}

impl Filter for Or {
    fn matches(&self, ctx: &Context, doc: &Document) -> anyhow::Result<bool> {
        if self.filters.is_empty() {
            return Ok(true);
        }
        for f in &self.filters {
            if f.matches(ctx, doc)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Inverts the inner result. Errors pass through unchanged.
pub struct Not {
    inner: FilterRef,
}

impl Not {
    pub fn new(inner: FilterRef) -> Self { Self { inner } }
}

impl Filter for Not {
    fn matches(&self, ctx: &Context, doc: &Document) -> anyhow::Result<bool> {
        Ok(!self.inner.matches(ctx, doc)?)
    }
}

/// Applies `then` only to documents matching `condition`; everything else passes.
pub struct If {
    condition: FilterRef,
    then: FilterRef,
}

impl If {
    pub fn new(condition: FilterRef, then: FilterRef) -> Self { Self { condition, then } }
}

impl Filter for If {
    fn matches(&self, ctx: &Context, doc: &Document) -> anyhow::Result<bool> {
        if !self.condition.matches(ctx, doc)? {
            return Ok(true);
        }
        self.then.matches(ctx, doc)
    }
}

pub fn and(filters: impl IntoIterator<Item = FilterRef>) -> FilterRef { Arc::new(And::new(filters)) }

pub fn or(filters: impl IntoIterator<Item = FilterRef>) -> FilterRef { Arc::new(Or::new(filters)) }

pub fn not(inner: FilterRef) -> FilterRef { Arc::new(Not::new(inner)) }

pub fn if_then(condition: FilterRef, then: FilterRef) -> FilterRef { Arc::new(If::new(condition, then)) }

/// Filter that keeps everything.
pub fn always() -> FilterRef { filter_fn(|_, _| Ok(true)) }

/// Filter that drops everything.
pub fn never() -> FilterRef { filter_fn(|_, _| Ok(false)) }
