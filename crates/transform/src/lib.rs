//! kpipe transformers: sequential and branching combinators over
//! [`Transformer`], plus primitive metadata mutators in [`meta`].

#![forbid(unsafe_code)]

use std::sync::Arc;

use kpipe_core::{transformer_fn, Context, Document, FilterRef, Transformer, TransformerRef};

pub mod meta;

/// Applies transformers in order, threading the document through each.
/// The first error aborts the chain; the partially transformed document is dropped.
pub struct Chain {
    steps: Vec<TransformerRef>,
}

impl Chain {
    pub fn new(steps: impl IntoIterator<Item = TransformerRef>) -> Self {
        Self { steps: steps.into_iter().collect() }
    }

    pub fn len(&self) -> usize { self.steps.len() }
    pub fn is_empty(&self) -> bool { self.steps.is_empty() }
}

impl Transformer for Chain {
    fn transform(&self, ctx: &Context, doc: Document) -> anyhow::Result<Document> {
        let mut cur = doc;
        for t in &self.steps {
            cur = t.transform(ctx, cur)?;
        }
        Ok(cur)
    }
}

/// Applies `then` only when `condition` matches the current document.
pub struct If {
    condition: FilterRef,
    then: TransformerRef,
}

impl If {
    pub fn new(condition: FilterRef, then: TransformerRef) -> Self { Self { condition, then } }
}

impl Transformer for If {
    fn transform(&self, ctx: &Context, doc: Document) -> anyhow::Result<Document> {
        if self.condition.matches(ctx, &doc)? {
            self.then.transform(ctx, doc)
        } else {
            Ok(doc)
        }
    }
}

/// One branch of a [`Switch`].
#[derive(Clone)]
pub struct Case {
    pub when: FilterRef,
    pub then: TransformerRef,
}

impl Case {
    pub fn new(when: FilterRef, then: TransformerRef) -> Self { Self { when, then } }
}

/// Single dispatch: the first case whose `when` matches runs, later cases are
/// not evaluated. No match runs `default`.
pub struct Switch {
    cases: Vec<Case>,
    default: TransformerRef,
}

impl Switch {
    /// `default` is required; pass [`identity()`] when unmatched documents stay as-is.
    pub fn new(cases: impl IntoIterator<Item = Case>, default: TransformerRef) -> Self {
        Self { cases: cases.into_iter().collect(), default }
    }
}

impl Transformer for Switch {
    fn transform(&self, ctx: &Context, doc: Document) -> anyhow::Result<Document> {
        for case in &self.cases {
            if case.when.matches(ctx, &doc)? {
                return case.then.transform(ctx, doc);
            }
        }
        self.default.transform(ctx, doc)
    }
}

pub fn chain(steps: impl IntoIterator<Item = TransformerRef>) -> TransformerRef { Arc::new(Chain::new(steps)) }

pub fn if_then(condition: FilterRef, then: TransformerRef) -> TransformerRef { Arc::new(If::new(condition, then)) }

pub fn switch(cases: impl IntoIterator<Item = Case>, default: TransformerRef) -> TransformerRef {
    Arc::new(Switch::new(cases, default))
}

/// Returns the document unchanged.
pub fn identity() -> TransformerRef { transformer_fn(|_, doc| Ok(doc)) }

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use kpipe_core::filter_fn;
    use serde_json::json;

    fn doc() -> Document {
        Document::from_value(json!({ "apiVersion": "v1", "kind": "Pod", "metadata": { "name": "a" } })).unwrap()
    }

    fn tag(value: &'static str) -> TransformerRef {
        transformer_fn(move |_, mut d| {
            let prev = d.label("trail").unwrap_or("").to_string();
            d.set_label("trail", format!("{}{}", prev, value));
            Ok(d)
        })
    }

    fn failing() -> TransformerRef { transformer_fn(|_, _| Err(anyhow!("transform failed"))) }

    fn yes() -> FilterRef { filter_fn(|_, _| Ok(true)) }
    fn no() -> FilterRef { filter_fn(|_, _| Ok(false)) }
    fn has_trail(v: &'static str) -> FilterRef { filter_fn(move |_, d| Ok(d.label("trail") == Some(v))) }

    #[test]
    fn chain_runs_in_order() {
        let out = chain([tag("a"), tag("b"), tag("c")]).transform(&Context::new(), doc()).unwrap();
        assert_eq!(out.label("trail"), Some("abc"));
        let empty = chain([]).transform(&Context::new(), doc()).unwrap();
        assert_eq!(empty, doc());
    }

    #[test]
    fn chain_stops_on_error() {
        let err = chain([tag("a"), failing(), tag("c")]).transform(&Context::new(), doc()).unwrap_err();
        assert_eq!(err.to_string(), "transform failed");
    }

    #[test]
    fn if_sees_current_document() {
        // the condition observes mutations made by the previous step
        let t = chain([tag("x"), if_then(has_trail("x"), tag("y"))]);
        assert_eq!(t.transform(&Context::new(), doc()).unwrap().label("trail"), Some("xy"));
        let skipped = if_then(no(), failing()).transform(&Context::new(), doc()).unwrap();
        assert_eq!(skipped, doc());
        let cond_err = if_then(filter_fn(|_, _| Err(anyhow!("cond"))), tag("a"));
        assert!(cond_err.transform(&Context::new(), doc()).is_err());
    }

    #[test]
    fn switch_first_match_wins() {
        let ab = switch([Case::new(yes(), tag("first")), Case::new(yes(), tag("second"))], failing());
        assert_eq!(ab.transform(&Context::new(), doc()).unwrap().label("trail"), Some("first"));
        let ba = switch([Case::new(yes(), tag("second")), Case::new(yes(), tag("first"))], failing());
        assert_eq!(ba.transform(&Context::new(), doc()).unwrap().label("trail"), Some("second"));
    }

    #[test]
    fn switch_falls_back_to_default() {
        let t = switch([Case::new(no(), tag("case"))], tag("default"));
        assert_eq!(t.transform(&Context::new(), doc()).unwrap().label("trail"), Some("default"));
        let untouched = switch([Case::new(no(), tag("case"))], identity()).transform(&Context::new(), doc()).unwrap();
        assert_eq!(untouched, doc());
    }
}
