//! Document accessor: named helpers over a Kubernetes-style object.
//!
//! Everything outside this module reads and writes documents through these
//! accessors; nothing else walks the raw JSON tree.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context as _, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// Flat string→string mapping used for labels and annotations.
pub type StringMap = BTreeMap<String, String>;

/// One resource record flowing through the pipeline.
///
/// Always backed by a JSON object. `Clone` is a deep copy, which is what the
/// render cache relies on to hand out isolated results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Json", into = "Json")]
pub struct Document(Json);

/// Errors raised by dotted-path accessors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("invalid path {0:?} (expect e.g. spec.template.spec.containers[0].image)")]
    Invalid(String),
    #[error("path {path:?}: segment {segment:?} is not an object")]
    NotAnObject { path: String, segment: String },
    #[error("path {path:?}: index {index} out of bounds for {segment:?}")]
    OutOfBounds { path: String, segment: String, index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    key: String,
    index: Option<usize>,
}

// Accepts simple paths like .spec.foo.bar[0]; one optional [index] per segment.
fn parse_path(path: &str) -> Result<Vec<Segment>, PathError> {
    let invalid = || PathError::Invalid(path.to_string());
    let s = path.strip_prefix('.').unwrap_or(path);
    if s.is_empty() { return Err(invalid()); }
    let mut out = Vec::new();
    for seg in s.split('.') {
        let (key, index) = match seg.split_once('[') {
            Some((key, rest)) => {
                let digits = rest.strip_suffix(']').ok_or_else(invalid)?;
                if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) { return Err(invalid()); }
                (key, Some(digits.parse::<usize>().map_err(|_| invalid())?))
            }
            None => (seg, None),
        };
        if key.is_empty() || key.contains(']') { return Err(invalid()); }
        out.push(Segment { key: key.to_string(), index });
    }
    Ok(out)
}

impl Document {
    /// Wrap a JSON value. Non-object values are rejected.
    pub fn from_value(v: Json) -> Result<Self> {
        if !v.is_object() {
            return Err(anyhow!("document must be an object, got {}", json_type(&v)));
        }
        Ok(Self(v))
    }

    /// Parse a multi-document YAML stream (`---` separated). Empty documents are skipped.
    pub fn from_yaml_stream(yaml: &str) -> Result<Vec<Self>> {
        let mut out = Vec::new();
        for (i, de) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
            let val = serde_yaml::Value::deserialize(de).with_context(|| format!("parsing YAML document #{}", i))?;
            if val.is_null() { continue; }
            let json = serde_json::to_value(val).with_context(|| format!("converting YAML document #{} to JSON", i))?;
            out.push(Self::from_value(json).with_context(|| format!("YAML document #{}", i))?);
        }
        Ok(out)
    }

    pub fn as_value(&self) -> &Json { &self.0 }
    pub fn into_value(self) -> Json { self.0 }

    fn str_field(&self, key: &str) -> &str {
        self.0.get(key).and_then(|v| v.as_str()).unwrap_or("")
    }

    fn meta_str(&self, key: &str) -> &str {
        self.0.get("metadata").and_then(|m| m.get(key)).and_then(|v| v.as_str()).unwrap_or("")
    }

    fn root_mut(&mut self) -> &mut Map<String, Json> {
        if !self.0.is_object() { self.0 = Json::Object(Map::new()); }
        match &mut self.0 {
            Json::Object(m) => m,
            _ => unreachable!("document root is always an object"),
        }
    }

    // Materializes `metadata` as an object, replacing a non-object value.
    fn meta_mut(&mut self) -> &mut Map<String, Json> {
        let meta = self.root_mut().entry("metadata").or_insert_with(|| Json::Object(Map::new()));
        if !meta.is_object() { *meta = Json::Object(Map::new()); }
        match meta {
            Json::Object(m) => m,
            _ => unreachable!("metadata was just materialized"),
        }
    }

    fn string_map(&self, key: &str) -> StringMap {
        self.0
            .get("metadata")
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn string_map_mut(&mut self, key: &str) -> &mut Map<String, Json> {
        let slot = self.meta_mut().entry(key).or_insert_with(|| Json::Object(Map::new()));
        if !slot.is_object() { *slot = Json::Object(Map::new()); }
        match slot {
            Json::Object(m) => m,
            _ => unreachable!("string map was just materialized"),
        }
    }

    pub fn kind(&self) -> &str { self.str_field("kind") }
    pub fn api_version(&self) -> &str { self.str_field("apiVersion") }

    /// API group part of `apiVersion`; empty for the core group.
    pub fn group(&self) -> &str {
        self.api_version().split_once('/').map(|(g, _)| g).unwrap_or("")
    }

    /// Version part of `apiVersion`.
    pub fn version(&self) -> &str {
        let av = self.api_version();
        av.split_once('/').map(|(_, v)| v).unwrap_or(av)
    }

    pub fn name(&self) -> &str { self.meta_str("name") }

    /// Namespace; empty means cluster-scoped (or not yet assigned).
    pub fn namespace(&self) -> &str { self.meta_str("namespace") }

    pub fn labels(&self) -> StringMap { self.string_map("labels") }
    pub fn annotations(&self) -> StringMap { self.string_map("annotations") }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.0.get("metadata")?.get("labels")?.get(key)?.as_str()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.0.get("metadata")?.get("annotations")?.get(key)?.as_str()
    }

    pub fn set_kind(&mut self, kind: impl Into<String>) {
        self.root_mut().insert("kind".into(), Json::String(kind.into()));
    }

    pub fn set_api_version(&mut self, api_version: impl Into<String>) {
        self.root_mut().insert("apiVersion".into(), Json::String(api_version.into()));
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.meta_mut().insert("name".into(), Json::String(name.into()));
    }

    /// Set the namespace; an empty value removes the field.
    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        let ns = namespace.into();
        let meta = self.meta_mut();
        if ns.is_empty() {
            meta.remove("namespace");
        } else {
            meta.insert("namespace".into(), Json::String(ns));
        }
    }

    pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.string_map_mut("labels").insert(key.into(), Json::String(value.into()));
    }

    pub fn remove_label(&mut self, key: &str) -> Option<String> {
        remove_entry(&mut self.0, "labels", key)
    }

    /// Replace all labels.
    pub fn set_labels(&mut self, labels: StringMap) {
        let obj = labels.into_iter().map(|(k, v)| (k, Json::String(v))).collect();
        self.meta_mut().insert("labels".into(), Json::Object(obj));
    }

    pub fn set_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.string_map_mut("annotations").insert(key.into(), Json::String(value.into()));
    }

    pub fn remove_annotation(&mut self, key: &str) -> Option<String> {
        remove_entry(&mut self.0, "annotations", key)
    }

    /// Replace all annotations.
    pub fn set_annotations(&mut self, annotations: StringMap) {
        let obj = annotations.into_iter().map(|(k, v)| (k, Json::String(v))).collect();
        self.meta_mut().insert("annotations".into(), Json::Object(obj));
    }

    /// Read a nested field by dotted path (`spec.containers[0].image`).
    pub fn get_path(&self, path: &str) -> Result<Option<&Json>, PathError> {
        let segs = parse_path(path)?;
        let mut cur = &self.0;
        for seg in &segs {
            cur = match cur.get(&seg.key) {
                Some(v) => v,
                None => return Ok(None),
            };
            if let Some(i) = seg.index {
                cur = match cur.get(i) {
                    Some(v) => v,
                    None => return Ok(None),
                };
            }
        }
        Ok(Some(cur))
    }

    /// Write a nested field, creating intermediate objects. Array indices
    /// must already exist.
    pub fn set_path(&mut self, path: &str, value: Json) -> Result<(), PathError> {
        let segs = parse_path(path)?;
        let last = segs.len() - 1;
        let mut cur = &mut self.0;
        for (pos, seg) in segs.iter().enumerate() {
            let obj = cur.as_object_mut().ok_or_else(|| PathError::NotAnObject {
                path: path.to_string(),
                segment: seg.key.clone(),
            })?;
            if pos == last && seg.index.is_none() {
                obj.insert(seg.key.clone(), value);
                return Ok(());
            }
            let next = obj.entry(seg.key.clone()).or_insert_with(|| Json::Object(Map::new()));
            cur = match seg.index {
                Some(i) => {
                    let oob = || PathError::OutOfBounds { path: path.to_string(), segment: seg.key.clone(), index: i };
                    next.as_array_mut().ok_or_else(oob)?.get_mut(i).ok_or_else(oob)?
                }
                None => next,
            };
            if pos == last {
                *cur = value;
                return Ok(());
            }
        }
        Ok(())
    }

    /// Remove a nested field; returns the removed value if it existed.
    pub fn remove_path(&mut self, path: &str) -> Result<Option<Json>, PathError> {
        let segs = parse_path(path)?;
        let (leaf, parents) = segs.split_last().ok_or_else(|| PathError::Invalid(path.to_string()))?;
        let mut cur = &mut self.0;
        for seg in parents {
            cur = match cur.get_mut(&seg.key) {
                Some(v) => v,
                None => return Ok(None),
            };
            if let Some(i) = seg.index {
                cur = match cur.get_mut(i) {
                    Some(v) => v,
                    None => return Ok(None),
                };
            }
        }
        match leaf.index {
            None => Ok(cur.as_object_mut().and_then(|m| m.remove(&leaf.key))),
            Some(i) => {
                let arr = match cur.get_mut(&leaf.key).and_then(|v| v.as_array_mut()) {
                    Some(a) => a,
                    None => return Ok(None),
                };
                Ok(if i < arr.len() { Some(arr.remove(i)) } else { None })
            }
        }
    }

    /// Human-readable identity used in error context: `Kind:name (namespace)`.
    pub fn identity(&self) -> String {
        let ns = self.namespace();
        if ns.is_empty() {
            format!("{}:{} (cluster)", self.kind(), self.name())
        } else {
            format!("{}:{} ({})", self.kind(), self.name(), ns)
        }
    }
}

impl TryFrom<Json> for Document {
    type Error = anyhow::Error;
    fn try_from(v: Json) -> Result<Self> { Self::from_value(v) }
}

impl From<Document> for Json {
    fn from(d: Document) -> Self { d.0 }
}

fn remove_entry(root: &mut Json, map_key: &str, key: &str) -> Option<String> {
    let obj = root.get_mut("metadata")?.get_mut(map_key)?.as_object_mut()?;
    obj.remove(key).and_then(|v| v.as_str().map(|s| s.to_string()))
}

fn json_type(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod() -> Document {
        Document::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "web", "namespace": "prod", "labels": { "app": "web" } },
            "spec": { "containers": [ { "name": "c", "image": "nginx:1" } ] }
        }))
        .unwrap()
    }

    #[test]
    fn reads_well_known_fields() {
        let d = pod();
        assert_eq!(d.kind(), "Pod");
        assert_eq!(d.api_version(), "v1");
        assert_eq!(d.group(), "");
        assert_eq!(d.version(), "v1");
        assert_eq!(d.name(), "web");
        assert_eq!(d.namespace(), "prod");
        assert_eq!(d.label("app"), Some("web"));
        assert!(d.annotations().is_empty());
        assert_eq!(d.identity(), "Pod:web (prod)");
    }

    #[test]
    fn group_and_version_split() {
        let d = Document::from_value(json!({ "apiVersion": "apps/v1", "kind": "Deployment" })).unwrap();
        assert_eq!(d.group(), "apps");
        assert_eq!(d.version(), "v1");
        assert_eq!(d.name(), "");
        assert_eq!(d.identity(), "Deployment: (cluster)");
    }

    #[test]
    fn mutators_materialize_missing_maps() {
        let mut d = Document::from_value(json!({ "kind": "ConfigMap" })).unwrap();
        assert!(d.labels().is_empty());
        d.set_label("tier", "backend");
        d.set_annotation("note", "x");
        assert_eq!(d.as_value()["metadata"]["labels"]["tier"], "backend");
        assert_eq!(d.annotation("note"), Some("x"));
        assert_eq!(d.remove_label("tier").as_deref(), Some("backend"));
        // removing the last entry keeps an empty mapping in storage
        assert_eq!(d.as_value()["metadata"]["labels"], json!({}));
        assert!(d.labels().is_empty());
    }

    #[test]
    fn set_namespace_empty_removes_field() {
        let mut d = pod();
        d.set_namespace("");
        assert_eq!(d.namespace(), "");
        assert!(d.as_value()["metadata"].get("namespace").is_none());
    }

    #[test]
    fn non_object_values_are_rejected() {
        assert!(Document::from_value(json!([1, 2])).is_err());
        assert!(Document::from_value(json!("x")).is_err());
        assert!(serde_json::from_value::<Document>(json!([1])).is_err());
        assert!(serde_json::from_str::<Document>("null").is_err());
    }

    #[test]
    fn serde_round_trips_as_plain_object() {
        let d = pod();
        let text = serde_json::to_string(&d).unwrap();
        assert!(text.starts_with('{'));
        assert_eq!(serde_json::from_str::<Document>(&text).unwrap(), d);
    }

    #[test]
    fn path_get_set_remove() {
        let mut d = pod();
        assert_eq!(d.get_path("spec.containers[0].image").unwrap(), Some(&json!("nginx:1")));
        assert_eq!(d.get_path(".spec.missing").unwrap(), None);
        d.set_path("spec.containers[0].image", json!("nginx:2")).unwrap();
        d.set_path("spec.replicas.value", json!(3)).unwrap();
        assert_eq!(d.as_value()["spec"]["containers"][0]["image"], "nginx:2");
        assert_eq!(d.as_value()["spec"]["replicas"]["value"], 3);
        assert!(matches!(d.set_path("spec.containers[5].image", json!("x")), Err(PathError::OutOfBounds { .. })));
        assert_eq!(d.remove_path("spec.replicas").unwrap(), Some(json!({ "value": 3 })));
        assert_eq!(d.remove_path("spec.nothing.here").unwrap(), None);
    }

    #[test]
    fn invalid_paths_are_errors() {
        let d = pod();
        for p in ["", ".", "spec..x", "spec[a]", "spec[0", "spec.[0]"] {
            assert!(matches!(d.get_path(p), Err(PathError::Invalid(_))), "path {:?}", p);
        }
    }

    #[test]
    fn yaml_stream_skips_empty_documents() {
        let yaml = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n---\n---\napiVersion: v1\nkind: Secret\nmetadata:\n  name: b\n";
        let docs = Document::from_yaml_stream(yaml).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].kind(), "ConfigMap");
        assert_eq!(docs[1].name(), "b");
        assert!(Document::from_yaml_stream("- a\n- b\n").is_err());
    }
}
