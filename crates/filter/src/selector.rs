//! Kubernetes label selector syntax: `app=web,tier!=db,env in (prod,stage),!legacy`.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use smallvec::SmallVec;

use kpipe_core::StringMap;

static KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9]([-A-Za-z0-9.]*[A-Za-z0-9])?/)?[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$")
        .expect("static key regex")
});

static VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?)?$").expect("static value regex"));

static SET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\S+)\s+(in|notin)\s*\((.*)\)$").expect("static set regex"));

/// Configuration errors raised while building filters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("selector {selector:?}: invalid requirement {requirement:?}")]
    Requirement { selector: String, requirement: String },
    #[error("selector {selector:?}: invalid key {key:?}")]
    Key { selector: String, key: String },
    #[error("selector {selector:?}: invalid value {value:?}")]
    Value { selector: String, value: String },
    #[error("selector {selector:?}: unbalanced parentheses")]
    Unbalanced { selector: String },
    #[error("invalid pattern {pattern:?}: {reason}")]
    Pattern { pattern: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Exists(String),
    NotExists(String),
}

impl Requirement {
    pub fn key(&self) -> &str {
        match self {
            Requirement::Equals(k, _)
            | Requirement::NotEquals(k, _)
            | Requirement::In(k, _)
            | Requirement::NotIn(k, _)
            | Requirement::Exists(k)
            | Requirement::NotExists(k) => k,
        }
    }

    /// Negative requirements also match when the key is absent.
    pub fn matches(&self, labels: &StringMap) -> bool {
        let got = labels.get(self.key());
        match self {
            Requirement::Equals(_, v) => got == Some(v),
            Requirement::NotEquals(_, v) => got != Some(v),
            Requirement::In(_, set) => got.map(|g| set.contains(g)).unwrap_or(false),
            Requirement::NotIn(_, set) => got.map(|g| !set.contains(g)).unwrap_or(true),
            Requirement::Exists(_) => got.is_some(),
            Requirement::NotExists(_) => got.is_none(),
        }
    }
}

/// Parsed selector: a conjunction of requirements. Empty selects everything.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selector {
    requirements: SmallVec<[Requirement; 4]>,
}

impl Selector {
    pub fn parse(expr: &str) -> Result<Self, SelectorError> {
        let mut requirements = SmallVec::new();
        for raw in split_top_level(expr)? {
            let r = raw.trim();
            if r.is_empty() {
                if expr.trim().is_empty() { continue; }
                return Err(SelectorError::Requirement { selector: expr.to_string(), requirement: raw.to_string() });
            }
            requirements.push(parse_requirement(expr, r)?);
        }
        Ok(Self { requirements })
    }

    /// Exact key=value match for every pair.
    pub fn from_map(pairs: &StringMap) -> Self {
        let requirements = pairs.iter().map(|(k, v)| Requirement::Equals(k.clone(), v.clone())).collect();
        Self { requirements }
    }

    pub fn requirements(&self) -> &[Requirement] { &self.requirements }

    pub fn is_empty(&self) -> bool { self.requirements.is_empty() }

    pub fn matches(&self, labels: &StringMap) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl std::str::FromStr for Selector {
    type Err = SelectorError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

// Commas inside `in (...)` groups belong to the value set, not the selector.
fn split_top_level(expr: &str) -> Result<Vec<&str>, SelectorError> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, ch) in expr.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 { return Err(SelectorError::Unbalanced { selector: expr.to_string() }); }
            }
            ',' if depth == 0 => {
                out.push(&expr[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 { return Err(SelectorError::Unbalanced { selector: expr.to_string() }); }
    out.push(&expr[start..]);
    Ok(out)
}

fn parse_requirement(selector: &str, r: &str) -> Result<Requirement, SelectorError> {
    let key = |k: &str| -> Result<String, SelectorError> {
        let k = k.trim();
        if KEY_RE.is_match(k) { Ok(k.to_string()) } else { Err(SelectorError::Key { selector: selector.to_string(), key: k.to_string() }) }
    };
    let value = |v: &str| -> Result<String, SelectorError> {
        let v = v.trim();
        if VALUE_RE.is_match(v) { Ok(v.to_string()) } else { Err(SelectorError::Value { selector: selector.to_string(), value: v.to_string() }) }
    };

    if let Some(rest) = r.strip_prefix('!') {
        return Ok(Requirement::NotExists(key(rest)?));
    }
    if let Some(caps) = SET_RE.captures(r) {
        let k = key(&caps[1])?;
        let mut set = BTreeSet::new();
        for v in caps[3].split(',') {
            let v = value(v)?;
            if v.is_empty() {
                return Err(SelectorError::Requirement { selector: selector.to_string(), requirement: r.to_string() });
            }
            set.insert(v);
        }
        return Ok(match &caps[2] {
            "in" => Requirement::In(k, set),
            _ => Requirement::NotIn(k, set),
        });
    }
    if r.contains('(') || r.contains(')') {
        return Err(SelectorError::Requirement { selector: selector.to_string(), requirement: r.to_string() });
    }
    if let Some((k, v)) = r.split_once("!=") {
        return Ok(Requirement::NotEquals(key(k)?, value(v)?));
    }
    if let Some((k, v)) = r.split_once("==") {
        return Ok(Requirement::Equals(key(k)?, value(v)?));
    }
    if let Some((k, v)) = r.split_once('=') {
        return Ok(Requirement::Equals(key(k)?, value(v)?));
    }
    Ok(Requirement::Exists(key(r)?))
}
