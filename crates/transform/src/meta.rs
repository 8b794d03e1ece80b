//! Primitive metadata mutators.

use std::sync::Arc;

use kpipe_core::{Context, Document, StringMap, Transformer, TransformerRef};

/// Which metadata map a [`MapEdit`] touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Labels,
    Annotations,
}

pub type EntryPredicate = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum MapEdit {
    /// Insert or overwrite the given pairs; other entries are kept.
    Set(Target, StringMap),
    Remove(Target, Vec<String>),
    /// Remove every entry for which the predicate returns true.
    RemoveIf(Target, EntryPredicate),
}

impl Transformer for MapEdit {
    fn transform(&self, _ctx: &Context, mut doc: Document) -> anyhow::Result<Document> {
        match self {
            MapEdit::Set(target, pairs) => {
                for (k, v) in pairs {
                    match target {
                        Target::Labels => doc.set_label(k.clone(), v.clone()),
                        Target::Annotations => doc.set_annotation(k.clone(), v.clone()),
                    }
                }
            }
            MapEdit::Remove(target, keys) => {
                for k in keys {
                    match target {
                        Target::Labels => doc.remove_label(k),
                        Target::Annotations => doc.remove_annotation(k),
                    };
                }
            }
            MapEdit::RemoveIf(target, pred) => {
                let current = match target {
                    Target::Labels => doc.labels(),
                    Target::Annotations => doc.annotations(),
                };
                let kept: StringMap = current.into_iter().filter(|(k, v)| !pred(k.as_str(), v.as_str())).collect();
                match target {
                    Target::Labels => doc.set_labels(kept),
                    Target::Annotations => doc.set_annotations(kept),
                }
            }
        }
        Ok(doc)
    }
}

fn keys<I: IntoIterator<Item = S>, S: Into<String>>(items: I) -> Vec<String> {
    items.into_iter().map(Into::into).collect()
}

pub mod labels {
    use super::*;

    pub fn set(pairs: StringMap) -> TransformerRef { Arc::new(MapEdit::Set(Target::Labels, pairs)) }

    pub fn remove<I: IntoIterator<Item = S>, S: Into<String>>(names: I) -> TransformerRef {
        Arc::new(MapEdit::Remove(Target::Labels, keys(names)))
    }

    pub fn remove_if(pred: impl Fn(&str, &str) -> bool + Send + Sync + 'static) -> TransformerRef {
        Arc::new(MapEdit::RemoveIf(Target::Labels, Arc::new(pred)))
    }
}

pub mod annotations {
    use super::*;

    pub fn set(pairs: StringMap) -> TransformerRef { Arc::new(MapEdit::Set(Target::Annotations, pairs)) }

    pub fn remove<I: IntoIterator<Item = S>, S: Into<String>>(names: I) -> TransformerRef {
        Arc::new(MapEdit::Remove(Target::Annotations, keys(names)))
    }

    pub fn remove_if(pred: impl Fn(&str, &str) -> bool + Send + Sync + 'static) -> TransformerRef {
        Arc::new(MapEdit::RemoveIf(Target::Annotations, Arc::new(pred)))
    }
}

pub mod name {
    use super::*;

    #[derive(Debug, Clone)]
    pub enum NameEdit {
        Prefix(String),
        Suffix(String),
        /// Replace every occurrence of the first string with the second.
        Replace(String, String),
    }

    impl Transformer for NameEdit {
        fn transform(&self, _ctx: &Context, mut doc: Document) -> anyhow::Result<Document> {
            let next = match self {
                NameEdit::Prefix(p) => format!("{}{}", p, doc.name()),
                NameEdit::Suffix(s) => format!("{}{}", doc.name(), s),
                NameEdit::Replace(from, to) => doc.name().replace(from.as_str(), to),
            };
            doc.set_name(next);
            Ok(doc)
        }
    }

    pub fn prefix(p: impl Into<String>) -> TransformerRef { Arc::new(NameEdit::Prefix(p.into())) }

    pub fn suffix(s: impl Into<String>) -> TransformerRef { Arc::new(NameEdit::Suffix(s.into())) }

    pub fn replace(from: impl Into<String>, to: impl Into<String>) -> TransformerRef {
        Arc::new(NameEdit::Replace(from.into(), to.into()))
    }
}

pub mod namespace {
    use super::*;

    #[derive(Debug, Clone)]
    pub struct SetNamespace {
        pub namespace: String,
        /// Only fill in documents that have no namespace yet.
        pub only_if_empty: bool,
    }

    impl Transformer for SetNamespace {
        fn transform(&self, _ctx: &Context, mut doc: Document) -> anyhow::Result<Document> {
            if !self.only_if_empty || doc.namespace().is_empty() {
                doc.set_namespace(self.namespace.clone());
            }
            Ok(doc)
        }
    }

    pub fn set(ns: impl Into<String>) -> TransformerRef {
        Arc::new(SetNamespace { namespace: ns.into(), only_if_empty: false })
    }

    pub fn ensure_default(ns: impl Into<String>) -> TransformerRef {
        Arc::new(SetNamespace { namespace: ns.into(), only_if_empty: true })
    }
}

pub mod path {
    use super::*;
    use anyhow::Context as _;
    use serde_json::Value as Json;

    #[derive(Debug, Clone)]
    pub enum PathEdit {
        Set(String, Json),
        Remove(String),
    }

    impl Transformer for PathEdit {
        fn transform(&self, _ctx: &Context, mut doc: Document) -> anyhow::Result<Document> {
            match self {
                PathEdit::Set(p, v) => doc.set_path(p, v.clone()).with_context(|| format!("setting {}", p))?,
                PathEdit::Remove(p) => {
                    doc.remove_path(p).with_context(|| format!("removing {}", p))?;
                }
            }
            Ok(doc)
        }
    }

    pub fn set(path: impl Into<String>, value: Json) -> TransformerRef { Arc::new(PathEdit::Set(path.into(), value)) }

    pub fn remove(path: impl Into<String>) -> TransformerRef { Arc::new(PathEdit::Remove(path.into())) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Document {
        Document::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "labels": { "app": "web", "helm.sh/chart": "web-1.0" },
                "annotations": { "note": "keep", "tmp/one": "x" }
            },
            "spec": { "replicas": 1 }
        }))
        .unwrap()
    }

    fn run(t: &TransformerRef, d: Document) -> Document { t.transform(&Context::new(), d).unwrap() }

    fn map(pairs: &[(&str, &str)]) -> StringMap {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn label_edits() {
        let d = run(&labels::set(map(&[("tier", "fe"), ("app", "web2")])), doc());
        assert_eq!(d.label("tier"), Some("fe"));
        assert_eq!(d.label("app"), Some("web2"));
        let d = run(&labels::remove(["tier", "missing"]), d);
        assert_eq!(d.label("tier"), None);
        let d = run(&labels::remove_if(|k, _| k.starts_with("helm.sh/")), d);
        assert_eq!(d.labels(), map(&[("app", "web2")]));
    }

    #[test]
    fn label_set_on_bare_document() {
        let bare = Document::from_value(json!({ "kind": "ConfigMap" })).unwrap();
        let d = run(&labels::set(map(&[("a", "b")])), bare);
        assert_eq!(d.label("a"), Some("b"));
    }

    #[test]
    fn annotation_edits() {
        let d = run(&annotations::remove_if(|k, _| k.starts_with("tmp/")), doc());
        assert_eq!(d.annotations(), map(&[("note", "keep")]));
        let d = run(&annotations::set(map(&[("owner", "me")])), d);
        let d = run(&annotations::remove(["note"]), d);
        assert_eq!(d.annotations(), map(&[("owner", "me")]));
    }

    #[test]
    fn name_edits() {
        assert_eq!(run(&name::prefix("prod-"), doc()).name(), "prod-web");
        assert_eq!(run(&name::suffix("-v2"), doc()).name(), "web-v2");
        assert_eq!(run(&name::replace("we", "Y"), doc()).name(), "Yb");
    }

    #[test]
    fn namespace_edits() {
        let d = run(&namespace::ensure_default("default"), doc());
        assert_eq!(d.namespace(), "default");
        let d = run(&namespace::ensure_default("other"), d);
        assert_eq!(d.namespace(), "default");
        assert_eq!(run(&namespace::set("prod"), d).namespace(), "prod");
    }

    #[test]
    fn path_edits() {
        let d = run(&path::set("spec.replicas", json!(3)), doc());
        assert_eq!(d.get_path("spec.replicas").unwrap(), Some(&json!(3)));
        let d = run(&path::remove("spec.replicas"), d);
        assert_eq!(d.get_path("spec.replicas").unwrap(), None);
        assert!(path::set("spec..x", json!(1)).transform(&Context::new(), doc()).is_err());
    }
}
