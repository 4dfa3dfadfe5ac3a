//! Query shapes over the label collections. Every builder is a pure function
//! of its inputs; `now` is passed in so window arithmetic is testable.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use super::types::Paging;
use crate::lang::Language;
use crate::store::Collections;
use crate::store::pipeline::{
    Accumulator, Direction, Filter, Group, Lookup, Pipeline, Project, ProjectField, Sort, Stage,
    TimeBound,
};

/// The enrich listing skips the freshest records, which are usually not
/// enriched yet.
pub const ENRICH_LAG_DAYS: i64 = 2;
pub const LOUD_WINDOW_HOURS: u32 = 48;
/// Ceiling on events scanned by the ranked listing.
pub const LOUD_MAX_ENTRIES: u64 = 2_000;
/// Ceiling on events scanned by each snapshot gather.
pub const SNAPSHOT_MAX_ENTRIES: u64 = 60_000;
/// Labels kept in a snapshot's `most` list.
pub const SNAPSHOT_TOP: u32 = 13;

pub fn window_start(now: DateTime<Utc>, hours: u32) -> DateTime<Utc> {
    now - Duration::hours(i64::from(hours))
}

pub fn enrich_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(ENRICH_LAG_DAYS)
}

/// Plain `find` over full history, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct PageQuery {
    pub filter: Filter,
    pub sort: Sort,
    pub limit: u64,
    pub skip: u64,
}

pub fn paged_window(lang: Language, paging: Paging) -> PageQuery {
    PageQuery {
        filter: Filter::lang(lang.code()),
        sort: Sort::newest_first(),
        limit: u64::from(paging.amount),
        skip: u64::from(paging.skip),
    }
}

fn join(from: &str, local_field: &str, as_field: &str) -> Stage {
    Stage::Lookup(Lookup {
        from: from.to_string(),
        local_field: local_field.to_string(),
        foreign_field: "semanticId".to_string(),
        as_field: as_field.to_string(),
    })
}

fn page(paging: Paging) -> [Stage; 2] {
    [
        Stage::Skip(u64::from(paging.skip)),
        Stage::Limit(u64::from(paging.amount)),
    ]
}

/// Label events older than the enrich lag, newest first, each joined with
/// its metadata documents as `summary`.
pub fn enrich(lang: Language, now: DateTime<Utc>, paging: Paging, metadata: &str) -> Pipeline {
    let mut stages = vec![
        Stage::Match(
            Filter::lang(lang.code()).with_when(TimeBound::Before(enrich_cutoff(now))),
        ),
        Stage::Sort(Sort::newest_first()),
    ];
    stages.extend(page(paging));
    stages.push(join(metadata, "semanticId", "summary"));
    stages
}

/// Labels ranked by occurrences since `since`. The scan is capped before
/// grouping; paging applies to the ranked groups. Equal counts fall back to
/// label order.
pub fn loud(lang: Language, since: DateTime<Utc>, max_entries: u64, paging: Paging) -> Pipeline {
    let mut stages = vec![
        Stage::Match(Filter::lang(lang.code()).with_when(TimeBound::After(since))),
        Stage::Limit(max_entries),
        Stage::Group(
            Group::by_field("label")
                .with("wp", Accumulator::First("wp".into()))
                .with("count", Accumulator::Sum(1)),
        ),
        Stage::Sort(Sort::by("count", Direction::Desc).then("_id", Direction::Asc)),
    ];
    stages.extend(page(paging));
    stages.push(Stage::Project(Project {
        fields: vec![
            ("label".into(), ProjectField::From("_id".into())),
            ("wp".into(), ProjectField::Keep),
            ("count".into(), ProjectField::Keep),
        ],
        exclude_id: true,
    }));
    stages
}

/// Distinct content ids carrying `label`, most recently labelled first, each
/// joined with its metadata (`summary`) and its label documents (`labels`).
pub fn noogle(lang: Language, label: &str, paging: Paging, collections: &Collections) -> Pipeline {
    let mut stages = vec![
        Stage::Sort(Sort::newest_first()),
        Stage::Match(Filter::lang(lang.code()).with_label(label)),
        Stage::Group(Group::by_field("semanticId").with("latest", Accumulator::First("when".into()))),
        Stage::Sort(Sort::by("latest", Direction::Desc).then("_id", Direction::Asc)),
    ];
    stages.extend(page(paging));
    stages.push(join(&collections.metadata, "_id", "summary"));
    stages.push(join(&collections.labels, "_id", "labels"));
    stages
}

fn recent(lang: Language, since: DateTime<Utc>, max_entries: u64) -> [Stage; 3] {
    [
        Stage::Sort(Sort::newest_first()),
        Stage::Match(Filter::lang(lang.code()).with_when(TimeBound::After(since))),
        Stage::Limit(max_entries),
    ]
}

/// Single document `{amount}` with the number of distinct labels since `since`.
pub fn distinct_labels(lang: Language, since: DateTime<Utc>, max_entries: u64) -> Pipeline {
    let mut stages = recent(lang, since, max_entries).to_vec();
    stages.push(Stage::Group(Group::by_field("label")));
    stages.push(Stage::Group(
        Group::by_constant(Value::Null).with("amount", Accumulator::Sum(1)),
    ));
    stages
}

/// Single document `{profiles}`: the set of `pseudo` arrays reached through
/// the metadata join. Callers flatten and deduplicate.
pub fn contributors(
    lang: Language,
    since: DateTime<Utc>,
    max_entries: u64,
    metadata: &str,
) -> Pipeline {
    let mut stages = recent(lang, since, max_entries).to_vec();
    stages.push(join(metadata, "semanticId", "summary"));
    stages.push(Stage::Group(
        Group::by_constant(Value::from("dummy"))
            .with("profiles", Accumulator::AddToSet("summary.pseudo".into())),
    ));
    stages
}
