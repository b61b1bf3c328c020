//! Sorting, projection and aggregation stages for the in-memory backend

use std::cmp::Ordering;

use bson::{Bson, Document};

use super::filter::{resolve, Filter};
use super::BackendError;
use crate::document::{as_whole_number, compare_values, count_value, is_truthy, type_name};
use crate::error::ErrorCode;

/// Sort keys with their directions (`true` = ascending)
#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec(Vec<(String, bool)>);

impl SortSpec {
    pub fn parse(spec: &Document) -> Result<Self, BackendError> {
        spec.iter()
            .map(|(key, value)| match as_whole_number(value) {
                Some(1) => Ok((key.clone(), true)),
                Some(-1) => Ok((key.clone(), false)),
                _ => Err(BackendError::new(
                    ErrorCode::Location(15975),
                    "$sort key ordering must be 1 (for ascending) or -1 (for descending)",
                )),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(SortSpec)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stable sort; missing fields sort as null
    pub fn apply(&self, docs: &mut [Document]) {
        docs.sort_by(|a, b| self.compare(a, b));
    }

    fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for (path, ascending) in &self.0 {
            let ord = compare_values(sort_key(a, path, *ascending), sort_key(b, path, *ascending));
            let ord = if *ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Arrays sort by their smallest element ascending and largest descending
fn sort_key<'a>(doc: &'a Document, path: &str, ascending: bool) -> &'a Bson {
    const NULL: &Bson = &Bson::Null;
    let mut keys = resolve(doc, path).into_iter().flat_map(|v: &'a Bson| match v {
        Bson::Array(items) if !items.is_empty() => items.iter().collect::<Vec<_>>(),
        other => vec![other],
    });
    let picked = if ascending {
        keys.min_by(|a, b| compare_values(a, b))
    } else {
        keys.max_by(|a, b| compare_values(a, b))
    };
    picked.unwrap_or(NULL)
}

/// Top-level inclusion or exclusion projection
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    fields: Vec<String>,
    include: bool,
    include_id: bool,
}

impl Projection {
    pub fn parse(spec: &Document) -> Result<Self, BackendError> {
        let mut fields = Vec::new();
        let mut include: Option<bool> = None;
        let mut include_id = true;

        for (key, value) in spec {
            let flag = match value {
                Bson::Boolean(_) | Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => {
                    is_truthy(value)
                }
                other => {
                    return Err(BackendError::bad_value(format!(
                        "unsupported projection value of type {} for field '{}'",
                        type_name(other),
                        key
                    )))
                }
            };
            if key == "_id" {
                include_id = flag;
                continue;
            }
            match include {
                Some(mode) if mode != flag => {
                    let (code, message) = if mode {
                        (31254, format!("Cannot do exclusion on field {} in inclusion projection", key))
                    } else {
                        (31253, format!("Cannot do inclusion on field {} in exclusion projection", key))
                    };
                    return Err(BackendError::new(ErrorCode::Location(code), message));
                }
                _ => include = Some(flag),
            }
            fields.push(key.clone());
        }

        Ok(Self {
            fields,
            // `{_id: 0}` alone excludes, `{_id: 1}` alone includes only `_id`
            include: include.unwrap_or(!spec.is_empty() && include_id),
            include_id,
        })
    }

    #[must_use]
    pub fn apply(&self, doc: Document) -> Document {
        if self.include {
            doc.into_iter()
                .filter(|(k, _)| {
                    if k == "_id" {
                        self.include_id
                    } else {
                        self.fields.contains(k)
                    }
                })
                .collect()
        } else {
            doc.into_iter()
                .filter(|(k, _)| {
                    if k == "_id" {
                        self.include_id
                    } else {
                        !self.fields.contains(k)
                    }
                })
                .collect()
        }
    }
}

/// One parsed aggregation stage
#[derive(Debug, Clone)]
pub enum Stage {
    Match(Filter),
    Sort(SortSpec),
    Skip(u64),
    Limit(u64),
    Project(Projection),
    Count(String),
    Documents(Vec<Document>),
}

impl Stage {
    pub fn parse(stage: &Document) -> Result<Self, BackendError> {
        let mut fields = stage.iter();
        let (Some((name, spec)), None) = (fields.next(), fields.next()) else {
            return Err(BackendError::new(
                ErrorCode::Location(40323),
                "A pipeline stage specification object must contain exactly one field.",
            ));
        };

        match name.as_str() {
            "$match" => match spec {
                Bson::Document(filter) => Ok(Stage::Match(Filter::parse(filter)?)),
                _ => Err(BackendError::new(
                    ErrorCode::Location(15959),
                    "the match filter must be an expression in an object",
                )),
            },
            "$sort" => match spec {
                Bson::Document(keys) if !keys.is_empty() => Ok(Stage::Sort(SortSpec::parse(keys)?)),
                Bson::Document(_) => Err(BackendError::new(
                    ErrorCode::Location(15976),
                    "$sort stage must have at least one sort key",
                )),
                _ => Err(BackendError::new(
                    ErrorCode::Location(15973),
                    "the $sort key specification must be an object",
                )),
            },
            "$skip" => match as_whole_number(spec) {
                Some(n) if n >= 0 => Ok(Stage::Skip(n.unsigned_abs())),
                _ => Err(BackendError::new(
                    ErrorCode::Location(15956),
                    format!("invalid argument to $skip stage: {}", spec),
                )),
            },
            "$limit" => match as_whole_number(spec) {
                Some(n) if n > 0 => Ok(Stage::Limit(n.unsigned_abs())),
                _ => Err(BackendError::new(
                    ErrorCode::Location(15958),
                    "the limit must be positive",
                )),
            },
            "$project" => match spec {
                Bson::Document(fields) if !fields.is_empty() => {
                    Ok(Stage::Project(Projection::parse(fields)?))
                }
                _ => Err(BackendError::new(
                    ErrorCode::Location(51272),
                    "$project specification must be a non-empty object",
                )),
            },
            "$count" => match spec {
                Bson::String(field) if field.is_empty() => Err(BackendError::new(
                    ErrorCode::Location(40156),
                    "the count field must be a non-empty string",
                )),
                Bson::String(field) if field.starts_with('$') => Err(BackendError::new(
                    ErrorCode::Location(40158),
                    "the count field cannot be a $-prefixed path",
                )),
                Bson::String(field) if field.contains('.') => Err(BackendError::new(
                    ErrorCode::Location(40160),
                    "the count field cannot contain '.'",
                )),
                Bson::String(field) => Ok(Stage::Count(field.clone())),
                _ => Err(BackendError::new(
                    ErrorCode::Location(40156),
                    "the count field must be a non-empty string",
                )),
            },
            "$documents" => match spec {
                Bson::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        Bson::Document(doc) => Ok(doc.clone()),
                        other => Err(BackendError::new(
                            ErrorCode::TypeMismatch,
                            format!("$documents elements must be objects, got {}", type_name(other)),
                        )),
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Stage::Documents),
                _ => Err(BackendError::new(
                    ErrorCode::Location(5858203),
                    "an array is expected for $documents",
                )),
            },
            other => Err(BackendError::new(
                ErrorCode::Location(40324),
                format!("Unrecognized pipeline stage name: '{}'", other),
            )),
        }
    }

    /// Name as it appears in the pipeline
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Sort(_) => "$sort",
            Stage::Skip(_) => "$skip",
            Stage::Limit(_) => "$limit",
            Stage::Project(_) => "$project",
            Stage::Count(_) => "$count",
            Stage::Documents(_) => "$documents",
        }
    }
}

/// Parse and check a whole pipeline.
///
/// `$documents` is only valid as the first stage, and a pipeline without a
/// collection must start with it.
pub fn parse_pipeline(stages: &[Document], has_collection: bool) -> Result<Vec<Stage>, BackendError> {
    let stages = stages.iter().map(Stage::parse).collect::<Result<Vec<_>, _>>()?;

    if stages.iter().skip(1).any(|s| matches!(s, Stage::Documents(_))) {
        return Err(BackendError::new(
            ErrorCode::Location(40602),
            "$documents is only valid as the first stage in a pipeline",
        ));
    }
    if !has_collection {
        match stages.first() {
            Some(Stage::Documents(_)) => {}
            Some(first) => {
                return Err(BackendError::new(
                    ErrorCode::InvalidNamespace,
                    format!(
                        "{{aggregate: 1}} is not valid for '{}'; a collection is required.",
                        first.name()
                    ),
                ))
            }
            None => {
                return Err(BackendError::new(
                    ErrorCode::InvalidNamespace,
                    "{aggregate: 1} is not valid for an empty pipeline.",
                ))
            }
        }
    }
    Ok(stages)
}

/// Run parsed stages over an input snapshot
#[must_use]
pub fn run(mut docs: Vec<Document>, stages: &[Stage]) -> Vec<Document> {
    for stage in stages {
        docs = match stage {
            Stage::Match(filter) => docs.into_iter().filter(|d| filter.matches(d)).collect(),
            Stage::Sort(spec) => {
                spec.apply(&mut docs);
                docs
            }
            Stage::Skip(n) => docs.into_iter().skip(to_usize(*n)).collect(),
            Stage::Limit(n) => docs.into_iter().take(to_usize(*n)).collect(),
            Stage::Project(projection) => docs.into_iter().map(|d| projection.apply(d)).collect(),
            Stage::Count(field) => {
                if docs.is_empty() {
                    Vec::new()
                } else {
                    let mut counted = Document::new();
                    counted.insert(field.clone(), count_value(docs.len() as u64));
                    vec![counted]
                }
            }
            Stage::Documents(items) => items.clone(),
        };
    }
    docs
}

pub(crate) fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}
