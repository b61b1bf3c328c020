//! Query filter matching for the in-memory backend

use std::cmp::Ordering;

use bson::{Bson, Document};

use super::BackendError;
use crate::document::{compare_values, is_truthy, same_bracket, type_name, values_equal};

/// A parsed query filter
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Field { path: String, conditions: Vec<Condition> },
}

/// A single predicate on one field
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Bson),
    Ne(Bson),
    Cmp(Ordering, bool, Bson),
    In(Vec<Bson>),
    Nin(Vec<Bson>),
    Exists(bool),
}

impl Filter {
    /// Parse a filter document, rejecting unknown operators up front
    pub fn parse(filter: &Document) -> Result<Self, BackendError> {
        let mut clauses = Vec::with_capacity(filter.len());
        for (key, value) in filter {
            clauses.push(match key.as_str() {
                "$and" => Filter::And(parse_list(key, value)?),
                "$or" => Filter::Or(parse_list(key, value)?),
                "$nor" => Filter::Nor(parse_list(key, value)?),
                op if op.starts_with('$') => {
                    return Err(BackendError::bad_value(format!(
                        "unknown top level operator: {}",
                        op
                    )))
                }
                path => Filter::Field {
                    path: path.to_string(),
                    conditions: parse_conditions(value)?,
                },
            });
        }
        Ok(if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            Filter::And(clauses)
        })
    }

    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::And(all) => all.iter().all(|f| f.matches(doc)),
            Filter::Or(any) => any.iter().any(|f| f.matches(doc)),
            Filter::Nor(none) => !none.iter().any(|f| f.matches(doc)),
            Filter::Field { path, conditions } => {
                let values = resolve(doc, path);
                conditions.iter().all(|c| c.matches(&values))
            }
        }
    }
}

impl Condition {
    fn matches(&self, values: &[&Bson]) -> bool {
        match self {
            Condition::Eq(expected) => equals_any(values, expected),
            Condition::Ne(expected) => !equals_any(values, expected),
            Condition::Cmp(ordering, or_equal, bound) => candidates(values).any(|v| {
                if !same_bracket(v, bound) {
                    return false;
                }
                let ord = compare_values(v, bound);
                ord == *ordering || (*or_equal && ord == Ordering::Equal)
            }),
            Condition::In(options) => options.iter().any(|o| equals_any(values, o)),
            Condition::Nin(options) => !options.iter().any(|o| equals_any(values, o)),
            Condition::Exists(expected) => values.is_empty() != *expected,
        }
    }
}

fn parse_list(op: &str, value: &Bson) -> Result<Vec<Filter>, BackendError> {
    let Bson::Array(items) = value else {
        return Err(BackendError::bad_value(format!("{} must be an array", op)));
    };
    if items.is_empty() {
        return Err(BackendError::bad_value(
            "$and/$or/$nor must be a nonempty array",
        ));
    }
    items
        .iter()
        .map(|item| match item {
            Bson::Document(doc) => Filter::parse(doc),
            _ => Err(BackendError::bad_value(
                "$or/$and/$nor entries need to be full objects",
            )),
        })
        .collect()
}

fn parse_conditions(value: &Bson) -> Result<Vec<Condition>, BackendError> {
    let operators = match value {
        Bson::Document(doc) if doc.keys().next().is_some_and(|k| k.starts_with('$')) => doc,
        other => return Ok(vec![Condition::Eq(other.clone())]),
    };

    let mut conditions = Vec::with_capacity(operators.len());
    for (op, arg) in operators {
        conditions.push(match op.as_str() {
            "$eq" => Condition::Eq(arg.clone()),
            "$ne" => Condition::Ne(arg.clone()),
            "$gt" => Condition::Cmp(Ordering::Greater, false, arg.clone()),
            "$gte" => Condition::Cmp(Ordering::Greater, true, arg.clone()),
            "$lt" => Condition::Cmp(Ordering::Less, false, arg.clone()),
            "$lte" => Condition::Cmp(Ordering::Less, true, arg.clone()),
            "$in" => Condition::In(array_arg(op, arg)?),
            "$nin" => Condition::Nin(array_arg(op, arg)?),
            "$exists" => Condition::Exists(is_truthy(arg)),
            other => {
                return Err(BackendError::bad_value(format!("unknown operator: {}", other)));
            }
        });
    }
    Ok(conditions)
}

fn array_arg(op: &str, arg: &Bson) -> Result<Vec<Bson>, BackendError> {
    match arg {
        Bson::Array(items) => Ok(items.clone()),
        other => Err(BackendError::bad_value(format!(
            "{} needs an array, got {}",
            op,
            type_name(other)
        ))),
    }
}

/// Values reachable through `path`, fanning out over arrays of documents
#[must_use]
pub fn resolve<'a>(doc: &'a Document, path: &str) -> Vec<&'a Bson> {
    let mut parts = path.split('.');
    let mut out = Vec::new();
    if let Some(value) = parts.next().and_then(|head| doc.get(head)) {
        let rest: Vec<&str> = parts.collect();
        descend(value, &rest, &mut out);
    }
    out
}

fn descend<'a>(value: &'a Bson, rest: &[&str], out: &mut Vec<&'a Bson>) {
    let Some((head, tail)) = rest.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Bson::Document(doc) => {
            if let Some(next) = doc.get(*head) {
                descend(next, tail, out);
            }
        }
        Bson::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(next) = items.get(index) {
                    descend(next, tail, out);
                }
            } else {
                for item in items {
                    if let Bson::Document(doc) = item {
                        if let Some(next) = doc.get(*head) {
                            descend(next, tail, out);
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

/// Resolved values plus the elements of any resolved arrays
fn candidates<'a>(values: &'a [&'a Bson]) -> impl Iterator<Item = &'a Bson> {
    values.iter().flat_map(|v| {
        let elements: &[Bson] = match v {
            Bson::Array(items) => items,
            _ => &[],
        };
        std::iter::once(*v).chain(elements.iter())
    })
}

fn equals_any(values: &[&Bson], expected: &Bson) -> bool {
    if values.is_empty() {
        return matches!(expected, Bson::Null);
    }
    candidates(values).any(|v| values_equal(v, expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use rstest::rstest;

    fn matches(filter: Document, doc: Document) -> bool {
        Filter::parse(&filter).unwrap().matches(&doc)
    }

    #[rstest]
    #[case(doc! { "v": 42 }, true)]
    #[case(doc! { "v": 42.0 }, true)]
    #[case(doc! { "v": { "$gt": 40 } }, true)]
    #[case(doc! { "v": { "$gte": 42, "$lt": 43 } }, true)]
    #[case(doc! { "v": { "$lt": 42 } }, false)]
    #[case(doc! { "v": { "$ne": 42 } }, false)]
    #[case(doc! { "v": { "$in": [1, 42] } }, true)]
    #[case(doc! { "v": { "$nin": [1, 42] } }, false)]
    #[case(doc! { "v": { "$gt": "a" } }, false)]
    #[case(doc! { "missing": null }, true)]
    #[case(doc! { "missing": { "$exists": false } }, true)]
    #[case(doc! { "v": { "$exists": 1 } }, true)]
    #[case(doc! { "$or": [ { "v": 1 }, { "name": "x" } ] }, true)]
    #[case(doc! { "$nor": [ { "v": 42 } ] }, false)]
    #[case(doc! { "$and": [ { "v": 42 }, { "name": "y" } ] }, false)]
    fn test_operators(#[case] filter: Document, #[case] expected: bool) {
        assert_eq!(matches(filter, doc! { "v": 42, "name": "x" }), expected);
    }

    #[test]
    fn test_arrays_and_dotted_paths() {
        let doc = doc! { "tags": ["a", "b"], "items": [ { "qty": 5 }, { "qty": 15 } ], "meta": { "n": 3 } };
        assert!(matches(doc! { "tags": "b" }, doc.clone()));
        assert!(matches(doc! { "tags": ["a", "b"] }, doc.clone()));
        assert!(matches(doc! { "items.qty": { "$gt": 10 } }, doc.clone()));
        assert!(matches(doc! { "items.0.qty": 5 }, doc.clone()));
        assert!(matches(doc! { "meta.n": 3 }, doc.clone()));
        assert!(!matches(doc! { "meta.n.x": 3 }, doc));
    }

    #[test]
    fn test_invalid_filters() {
        for filter in [
            doc! { "v": { "$regexp": "a" } },
            doc! { "$where": "1" },
            doc! { "$or": [] },
            doc! { "$and": [1] },
            doc! { "v": { "$in": 5 } },
        ] {
            let err = Filter::parse(&filter).unwrap_err();
            assert_eq!(err.code, crate::error::ErrorCode::BadValue);
        }
    }
}
