//! Typed aggregation stages.
//!
//! Stages are plain data: the Data API client renders them to MongoDB
//! aggregation syntax with [`Stage::to_json`], the in-memory store evaluates
//! them directly. Only the operators the views need are modelled.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use super::ejson;

/// Equality and time-bound predicates, AND-ed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub lang: Option<String>,
    pub label: Option<String>,
    pub semantic_id: Option<String>,
    pub when: Option<TimeBound>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeBound {
    /// `when < ts`
    Before(DateTime<Utc>),
    /// `when > ts`
    After(DateTime<Utc>),
}

impl TimeBound {
    pub fn admits(self, when: DateTime<Utc>) -> bool {
        match self {
            TimeBound::Before(ts) => when < ts,
            TimeBound::After(ts) => when > ts,
        }
    }
}

impl Filter {
    pub fn lang(lang: impl Into<String>) -> Self {
        Self {
            lang: Some(lang.into()),
            ..Self::default()
        }
    }

    pub fn semantic_id(id: impl Into<String>) -> Self {
        Self {
            semantic_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_when(mut self, bound: TimeBound) -> Self {
        self.when = Some(bound);
        self
    }

    pub fn to_json(&self) -> Value {
        let mut doc = Map::new();
        if let Some(lang) = &self.lang {
            doc.insert("lang".into(), json!(lang));
        }
        if let Some(label) = &self.label {
            doc.insert("label".into(), json!(label));
        }
        if let Some(id) = &self.semantic_id {
            doc.insert("semanticId".into(), json!(id));
        }
        match self.when {
            Some(TimeBound::Before(ts)) => {
                doc.insert("when".into(), json!({ "$lt": ejson::date_value(ts) }));
            }
            Some(TimeBound::After(ts)) => {
                doc.insert("when".into(), json!({ "$gt": ejson::date_value(ts) }));
            }
            None => {}
        }
        Value::Object(doc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn as_i32(self) -> i32 {
        match self {
            Direction::Asc => 1,
            Direction::Desc => -1,
        }
    }
}

/// Ordered sort keys; earlier keys take precedence.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort(pub Vec<(String, Direction)>);

impl Sort {
    pub fn by(field: &str, direction: Direction) -> Self {
        Self(vec![(field.to_string(), direction)])
    }

    pub fn then(mut self, field: &str, direction: Direction) -> Self {
        self.0.push((field.to_string(), direction));
        self
    }

    pub fn newest_first() -> Self {
        Self::by("when", Direction::Desc)
    }

    pub fn to_json(&self) -> Value {
        let mut doc = Map::new();
        for (field, dir) in &self.0 {
            doc.insert(field.clone(), json!(dir.as_i32()));
        }
        Value::Object(doc)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    Field(String),
    Constant(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    First(String),
    Sum(i64),
    AddToSet(String),
}

impl Accumulator {
    fn to_json(&self) -> Value {
        match self {
            Accumulator::First(path) => json!({ "$first": format!("${path}") }),
            Accumulator::Sum(n) => json!({ "$sum": n }),
            Accumulator::AddToSet(path) => json!({ "$addToSet": format!("${path}") }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub key: GroupKey,
    pub fields: Vec<(String, Accumulator)>,
}

impl Group {
    pub fn by_field(field: &str) -> Self {
        Self {
            key: GroupKey::Field(field.to_string()),
            fields: Vec::new(),
        }
    }

    pub fn by_constant(key: Value) -> Self {
        Self {
            key: GroupKey::Constant(key),
            fields: Vec::new(),
        }
    }

    pub fn with(mut self, name: &str, acc: Accumulator) -> Self {
        self.fields.push((name.to_string(), acc));
        self
    }
}

/// Left outer join: every input document gains an array field `as_field`
/// holding the foreign documents whose `foreign_field` equals `local_field`.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub from: String,
    pub local_field: String,
    pub foreign_field: String,
    pub as_field: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectField {
    Keep,
    From(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub fields: Vec<(String, ProjectField)>,
    pub exclude_id: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Sort(Sort),
    Skip(u64),
    Limit(u64),
    Group(Group),
    Lookup(Lookup),
    Project(Project),
}

impl Stage {
    pub fn to_json(&self) -> Value {
        match self {
            Stage::Match(filter) => json!({ "$match": filter.to_json() }),
            Stage::Sort(sort) => json!({ "$sort": sort.to_json() }),
            Stage::Skip(n) => json!({ "$skip": n }),
            Stage::Limit(n) => json!({ "$limit": n }),
            Stage::Group(group) => {
                let mut doc = Map::new();
                let id = match &group.key {
                    GroupKey::Field(f) => json!(format!("${f}")),
                    GroupKey::Constant(v) => v.clone(),
                };
                doc.insert("_id".into(), id);
                for (name, acc) in &group.fields {
                    doc.insert(name.clone(), acc.to_json());
                }
                json!({ "$group": doc })
            }
            Stage::Lookup(l) => json!({
                "$lookup": {
                    "from": l.from,
                    "localField": l.local_field,
                    "foreignField": l.foreign_field,
                    "as": l.as_field,
                }
            }),
            Stage::Project(p) => {
                let mut doc = Map::new();
                for (name, field) in &p.fields {
                    let rendered = match field {
                        ProjectField::Keep => json!(true),
                        ProjectField::From(path) => json!(format!("${path}")),
                    };
                    doc.insert(name.clone(), rendered);
                }
                if p.exclude_id {
                    doc.insert("_id".into(), json!(false));
                }
                json!({ "$project": doc })
            }
        }
    }
}

pub type Pipeline = Vec<Stage>;

pub fn to_json(pipeline: &[Stage]) -> Value {
    Value::Array(pipeline.iter().map(Stage::to_json).collect())
}
