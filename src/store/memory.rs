//! In-process evaluation of [`Stage`] pipelines over JSON collections.
//!
//! Backs the `--fixture` mode and the view tests. Collections keep insertion
//! order, which stands in for the store's natural order.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use super::ejson::{compare, get_path, parse_date};
use super::pipeline::{
    Accumulator, Direction, Filter, Group, GroupKey, Lookup, Project, ProjectField, Sort, Stage,
};
use super::{Document, EventStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("cannot read fixture {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid fixture JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("fixture collection '{0}' must be an array of objects")]
    Shape(String),
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    collections: HashMap<String, Vec<Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collection: &str, doc: Document) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(doc);
    }

    /// Build from `{"<collection>": [ {...}, ... ], ...}`.
    pub fn from_json(root: Value) -> Result<Self, FixtureError> {
        let Value::Object(root) = root else {
            return Err(FixtureError::Shape("<root>".into()));
        };
        let mut store = Self::new();
        for (name, docs) in root {
            let Value::Array(docs) = docs else {
                return Err(FixtureError::Shape(name));
            };
            for doc in docs {
                let Value::Object(doc) = doc else {
                    return Err(FixtureError::Shape(name));
                };
                store.insert(&name, doc);
            }
        }
        Ok(store)
    }

    pub async fn from_fixture(path: &Path) -> Result<Self, FixtureError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| FixtureError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let store = Self::from_json(serde_json::from_str(&raw)?)?;
        debug!(
            path = %path.display(),
            collections = store.collections.len(),
            "fixture loaded"
        );
        Ok(store)
    }

    fn docs(&self, collection: &str) -> &[Document] {
        self.collections
            .get(collection)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Evaluate `pipeline` against `collection`. Unknown collections are empty.
    pub fn run(&self, collection: &str, pipeline: &[Stage]) -> Vec<Document> {
        let mut docs = self.docs(collection).to_vec();
        for stage in pipeline {
            docs = match stage {
                Stage::Match(filter) => docs.into_iter().filter(|d| matches(d, filter)).collect(),
                Stage::Sort(sort) => {
                    sort_docs(&mut docs, sort);
                    docs
                }
                Stage::Skip(n) => docs.into_iter().skip(*n as usize).collect(),
                Stage::Limit(n) => docs.into_iter().take(*n as usize).collect(),
                Stage::Group(group) => group_docs(docs, group),
                Stage::Lookup(lookup) => self.lookup(docs, lookup),
                Stage::Project(project) => docs.iter().map(|d| project_doc(d, project)).collect(),
            };
        }
        docs
    }

    fn lookup(&self, docs: Vec<Document>, lookup: &Lookup) -> Vec<Document> {
        let foreign = self.docs(&lookup.from);
        docs.into_iter()
            .map(|mut doc| {
                let local = get_path(&doc, &lookup.local_field).unwrap_or(Value::Null);
                let joined: Vec<Value> = foreign
                    .iter()
                    .filter(|f| {
                        get_path(f, &lookup.foreign_field).unwrap_or(Value::Null) == local
                    })
                    .map(|f| Value::Object(f.clone()))
                    .collect();
                doc.insert(lookup.as_field.clone(), Value::Array(joined));
                doc
            })
            .collect()
    }
}

fn field_equals(doc: &Document, field: &str, expected: Option<&String>) -> bool {
    match expected {
        None => true,
        Some(expected) => doc.get(field).and_then(Value::as_str) == Some(expected.as_str()),
    }
}

fn matches(doc: &Document, filter: &Filter) -> bool {
    if !field_equals(doc, "lang", filter.lang.as_ref())
        || !field_equals(doc, "label", filter.label.as_ref())
        || !field_equals(doc, "semanticId", filter.semantic_id.as_ref())
    {
        return false;
    }
    match filter.when {
        None => true,
        Some(bound) => doc
            .get("when")
            .and_then(parse_date)
            .is_some_and(|when| bound.admits(when)),
    }
}

fn sort_docs(docs: &mut [Document], sort: &Sort) {
    docs.sort_by(|a, b| {
        for (field, direction) in &sort.0 {
            let (va, vb) = (get_path(a, field), get_path(b, field));
            let ord = compare(va.as_ref(), vb.as_ref());
            let ord = match direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Groups are emitted in order of first appearance of their key.
fn group_docs(docs: Vec<Document>, group: &Group) -> Vec<Document> {
    let mut order: Vec<Document> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for doc in &docs {
        let key = match &group.key {
            GroupKey::Field(path) => get_path(doc, path).unwrap_or(Value::Null),
            GroupKey::Constant(v) => v.clone(),
        };
        let slot = *index.entry(key.to_string()).or_insert_with(|| {
            let mut out = Document::new();
            out.insert("_id".into(), key.clone());
            order.push(out);
            order.len() - 1
        });
        let out = &mut order[slot];

        for (name, acc) in &group.fields {
            match acc {
                Accumulator::First(path) => {
                    if !out.contains_key(name) {
                        out.insert(name.clone(), get_path(doc, path).unwrap_or(Value::Null));
                    }
                }
                Accumulator::Sum(n) => {
                    let total = out.get(name).and_then(Value::as_i64).unwrap_or(0) + n;
                    out.insert(name.clone(), Value::from(total));
                }
                Accumulator::AddToSet(path) => {
                    let set = out
                        .entry(name.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let (Some(value), Value::Array(items)) = (get_path(doc, path), set)
                        && !items.contains(&value)
                    {
                        items.push(value);
                    }
                }
            }
        }
    }
    order
}

fn project_doc(doc: &Document, project: &Project) -> Document {
    let mut out = Document::new();
    if !project.exclude_id
        && let Some(id) = doc.get("_id")
    {
        out.insert("_id".into(), id.clone());
    }
    for (name, field) in &project.fields {
        let value = match field {
            ProjectField::Keep => doc.get(name).cloned(),
            ProjectField::From(path) => get_path(doc, path),
        };
        if let Some(value) = value {
            out.insert(name.clone(), value);
        }
    }
    out
}

impl EventStore for MemoryStore {
    async fn read_page(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &Sort,
        limit: u64,
        skip: u64,
    ) -> Result<Vec<Document>, StoreError> {
        Ok(self.run(
            collection,
            &[
                Stage::Match(filter.clone()),
                Stage::Sort(sort.clone()),
                Stage::Skip(skip),
                Stage::Limit(limit),
            ],
        ))
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Stage],
    ) -> Result<Vec<Document>, StoreError> {
        Ok(self.run(collection, pipeline))
    }

    async fn read_all(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        Ok(self.run(collection, &[Stage::Match(filter.clone())]))
    }
}
