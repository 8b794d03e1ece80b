//! Primitive filters over document metadata.
//!
//! Each filter is a plain struct (inspectable, no hidden state); the free
//! functions wrap them as [`FilterRef`] for use with the combinators.

use std::collections::BTreeSet;
use std::sync::Arc;

use kpipe_core::{Context, Document, Filter, FilterRef, StringMap};

use crate::selector::{Selector, SelectorError};

fn set_of<I, S>(items: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

pub mod gvk {
    use super::*;

    /// Which part of the type tag a [`GvkFilter`] looks at.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Field {
        Kind,
        ApiVersion,
        Group,
    }

    /// Keeps documents whose kind / apiVersion / group is one of `allowed` (exact match).
    #[derive(Debug, Clone)]
    pub struct GvkFilter {
        pub field: Field,
        pub allowed: BTreeSet<String>,
    }

    impl Filter for GvkFilter {
        fn matches(&self, _ctx: &Context, doc: &Document) -> anyhow::Result<bool> {
            let got = match self.field {
                Field::Kind => doc.kind(),
                Field::ApiVersion => doc.api_version(),
                Field::Group => doc.group(),
            };
            Ok(self.allowed.contains(got))
        }
    }

    pub fn kind<I: IntoIterator<Item = S>, S: Into<String>>(kinds: I) -> FilterRef {
        Arc::new(GvkFilter { field: Field::Kind, allowed: set_of(kinds) })
    }

    pub fn api_version<I: IntoIterator<Item = S>, S: Into<String>>(versions: I) -> FilterRef {
        Arc::new(GvkFilter { field: Field::ApiVersion, allowed: set_of(versions) })
    }

    /// Core-group resources have an empty group.
    pub fn group<I: IntoIterator<Item = S>, S: Into<String>>(groups: I) -> FilterRef {
        Arc::new(GvkFilter { field: Field::Group, allowed: set_of(groups) })
    }
}

pub mod namespace {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct NamespaceFilter {
        pub namespaces: BTreeSet<String>,
        pub exclude: bool,
    }

    impl Filter for NamespaceFilter {
        fn matches(&self, _ctx: &Context, doc: &Document) -> anyhow::Result<bool> {
            let hit = self.namespaces.contains(doc.namespace());
            Ok(hit != self.exclude)
        }
    }

    pub fn any_of<I: IntoIterator<Item = S>, S: Into<String>>(namespaces: I) -> FilterRef {
        Arc::new(NamespaceFilter { namespaces: set_of(namespaces), exclude: false })
    }

    pub fn none_of<I: IntoIterator<Item = S>, S: Into<String>>(namespaces: I) -> FilterRef {
        Arc::new(NamespaceFilter { namespaces: set_of(namespaces), exclude: true })
    }

    /// Documents without a namespace.
    pub fn cluster_scoped() -> FilterRef { any_of([""]) }
}

pub mod name {
    use super::*;
    use regex::Regex;

    #[derive(Debug, Clone)]
    pub enum NameFilter {
        Exact(BTreeSet<String>),
        Prefix(String),
        Suffix(String),
        Regex(Regex),
    }

    impl Filter for NameFilter {
        fn matches(&self, _ctx: &Context, doc: &Document) -> anyhow::Result<bool> {
            let n = doc.name();
            Ok(match self {
                NameFilter::Exact(names) => names.contains(n),
                NameFilter::Prefix(p) => n.starts_with(p.as_str()),
                NameFilter::Suffix(s) => n.ends_with(s.as_str()),
                NameFilter::Regex(re) => re.is_match(n),
            })
        }
    }

    pub fn exact<I: IntoIterator<Item = S>, S: Into<String>>(names: I) -> FilterRef {
        Arc::new(NameFilter::Exact(set_of(names)))
    }

    pub fn prefix(p: impl Into<String>) -> FilterRef { Arc::new(NameFilter::Prefix(p.into())) }

    pub fn suffix(s: impl Into<String>) -> FilterRef { Arc::new(NameFilter::Suffix(s.into())) }

    /// Fails at construction on an invalid pattern.
    pub fn regex(pattern: &str) -> Result<FilterRef, SelectorError> {
        let re = Regex::new(pattern)
            .map_err(|e| SelectorError::Pattern { pattern: pattern.to_string(), reason: e.to_string() })?;
        Ok(Arc::new(NameFilter::Regex(re)))
    }
}

/// Label/annotation filters share their shape; `Source` picks the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Labels,
    Annotations,
}

impl Source {
    fn read(self, doc: &Document) -> StringMap {
        match self {
            Source::Labels => doc.labels(),
            Source::Annotations => doc.annotations(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum MapFilter {
    /// Every key present.
    HasKeys(Source, BTreeSet<String>),
    /// Requirements evaluated against the map.
    Selector(Source, Selector),
}

impl Filter for MapFilter {
    fn matches(&self, _ctx: &Context, doc: &Document) -> anyhow::Result<bool> {
        Ok(match self {
            MapFilter::HasKeys(src, keys) => {
                let m = src.read(doc);
                keys.iter().all(|k| m.contains_key(k))
            }
            MapFilter::Selector(src, sel) => sel.matches(&src.read(doc)),
        })
    }
}

pub mod labels {
    use super::*;

    pub fn has_key<I: IntoIterator<Item = S>, S: Into<String>>(keys: I) -> FilterRef {
        Arc::new(MapFilter::HasKeys(Source::Labels, set_of(keys)))
    }

    /// All pairs must be present with equal values.
    pub fn matches(pairs: StringMap) -> FilterRef {
        Arc::new(MapFilter::Selector(Source::Labels, Selector::from_map(&pairs)))
    }

    /// Kubernetes selector syntax, e.g. `app=web,env in (prod,stage),!legacy`.
    pub fn selector(expr: &str) -> Result<FilterRef, SelectorError> {
        Ok(Arc::new(MapFilter::Selector(Source::Labels, Selector::parse(expr)?)))
    }
}

pub mod annotations {
    use super::*;

    pub fn has_key<I: IntoIterator<Item = S>, S: Into<String>>(keys: I) -> FilterRef {
        Arc::new(MapFilter::HasKeys(Source::Annotations, set_of(keys)))
    }

    pub fn matches(pairs: StringMap) -> FilterRef {
        Arc::new(MapFilter::Selector(Source::Annotations, Selector::from_map(&pairs)))
    }
}

pub mod path {
    use super::*;
    use serde_json::Value as Json;

    /// Nested-field filters. An invalid path is reported as an evaluation error.
    #[derive(Debug, Clone)]
    pub enum PathFilter {
        Exists(String),
        Equals(String, Json),
    }

    impl Filter for PathFilter {
        fn matches(&self, _ctx: &Context, doc: &Document) -> anyhow::Result<bool> {
            Ok(match self {
                PathFilter::Exists(p) => doc.get_path(p)?.is_some(),
                PathFilter::Equals(p, want) => doc.get_path(p)? == Some(want),
            })
        }
    }

    pub fn exists(path: impl Into<String>) -> FilterRef { Arc::new(PathFilter::Exists(path.into())) }

    pub fn equals(path: impl Into<String>, value: Json) -> FilterRef {
        Arc::new(PathFilter::Equals(path.into(), value))
    }
}
