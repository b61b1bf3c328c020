//! In-memory reference backend

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use tracing::debug;

use super::filter::Filter;
use super::pipeline::{parse_pipeline, run, to_usize, Projection, SortSpec, Stage};
use super::{Backend, BackendError, CountSpec, DocumentStream, FindSpec, InsertOutcome, Operation};
use crate::document::count_value;
use crate::error::ErrorCode;

/// Documents of one collection in insertion order
#[derive(Debug, Default)]
struct Collection {
    docs: Vec<Document>,
    ids: HashSet<String>,
}

/// Key under which an `_id` is tracked for uniqueness.
///
/// Numbers compare by value, so `1`, `1i64` and `1.0` collide. Integers
/// keep their exact value; only fractional doubles are keyed as floats.
fn id_key(id: &Bson) -> String {
    match id {
        Bson::Int32(n) => format!("number:{}", n),
        Bson::Int64(n) => format!("number:{}", n),
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        Bson::Double(d) if d.fract() == 0.0 && (i64::MIN as f64..i64::MAX as f64).contains(d) => {
            format!("number:{}", *d as i64)
        }
        Bson::Double(d) => format!("number:{}", d),
        other => other.clone().into_canonical_extjson().to_string(),
    }
}

/// Backend keeping every collection in process memory.
///
/// Reads work on a snapshot taken under a short read lock, so a cursor never
/// holds a collection lock while it is being paged.
#[derive(Default)]
pub struct MemoryBackend {
    collections: DashMap<String, Arc<RwLock<Collection>>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(database: &str, collection: &str) -> String {
        format!("{}.{}", database, collection)
    }

    fn get(&self, database: &str, collection: &str) -> Option<Arc<RwLock<Collection>>> {
        self.collections
            .get(&Self::key(database, collection))
            .map(|entry| Arc::clone(entry.value()))
    }

    fn snapshot(&self, database: &str, collection: Option<&str>) -> Vec<Document> {
        collection
            .and_then(|coll| self.get(database, coll))
            .map(|coll| coll.read().docs.clone())
            .unwrap_or_default()
    }

    fn find_stream(&self, database: &str, collection: &str, spec: FindSpec) -> Result<DocumentStream, BackendError> {
        let filter = Filter::parse(&spec.filter)?;
        let sort = spec.sort.as_ref().map(SortSpec::parse).transpose()?;
        let projection = spec.projection.as_ref().map(Projection::parse).transpose()?;

        let mut docs = self.snapshot(database, Some(collection));
        let limit = if spec.limit == 0 { usize::MAX } else { to_usize(spec.limit) };
        let skip = to_usize(spec.skip);

        if let Some(sort) = sort.filter(|s| !s.is_empty()) {
            docs.retain(|d| filter.matches(d));
            sort.apply(&mut docs);
            let docs = docs.into_iter().skip(skip).take(limit);
            return Ok(project_stream(docs, projection));
        }

        let docs = docs.into_iter().filter(move |d| filter.matches(d)).skip(skip).take(limit);
        Ok(project_stream(docs, projection))
    }

    fn count(&self, database: &str, collection: &str, spec: &CountSpec) -> Result<u64, BackendError> {
        let filter = Filter::parse(&spec.query)?;
        let Some(coll) = self.get(database, collection) else {
            return Ok(0);
        };
        let matched = coll.read().docs.iter().filter(|d| filter.matches(d)).count() as u64;
        let n = matched.saturating_sub(spec.skip);
        Ok(if spec.limit == 0 { n } else { n.min(spec.limit) })
    }
}

fn project_stream<I>(docs: I, projection: Option<Projection>) -> DocumentStream
where
    I: Iterator<Item = Document> + Send + 'static,
{
    match projection {
        Some(projection) => stream::iter(docs.map(move |d| Ok(projection.apply(d)))).boxed(),
        None => stream::iter(docs.map(Ok)).boxed(),
    }
}

fn collscan(filter: &Document) -> Document {
    doc! {
        "stage": "COLLSCAN",
        "filter": filter.clone(),
        "direction": "forward",
    }
}

fn wrap(stage: &str, input: Document, extra: Document) -> Document {
    let mut plan = doc! { "stage": stage };
    plan.extend(extra);
    plan.insert("inputStage", input);
    plan
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn execute(
        &self,
        database: &str,
        collection: Option<&str>,
        operation: Operation,
    ) -> Result<DocumentStream, BackendError> {
        debug!(database, ?collection, op = operation.name(), "Executing operation");
        match operation {
            Operation::Find(spec) => {
                let collection = collection.ok_or_else(|| {
                    BackendError::new(ErrorCode::InvalidNamespace, "find requires a collection")
                })?;
                self.find_stream(database, collection, spec)
            }
            Operation::Aggregate(stages) => {
                let stages = parse_pipeline(&stages, collection.is_some())?;
                let input = if matches!(stages.first(), Some(Stage::Documents(_))) {
                    Vec::new()
                } else {
                    self.snapshot(database, collection)
                };
                let docs = run(input, &stages);
                Ok(stream::iter(docs.into_iter().map(Ok)).boxed())
            }
            Operation::Count(spec) => {
                let collection = collection.ok_or_else(|| {
                    BackendError::new(ErrorCode::InvalidNamespace, "count requires a collection")
                })?;
                let n = self.count(database, collection, &spec)?;
                Ok(stream::iter(std::iter::once(Ok(doc! { "n": count_value(n) }))).boxed())
            }
        }
    }

    async fn explain(
        &self,
        database: &str,
        collection: Option<&str>,
        operation: &Operation,
    ) -> Result<Document, BackendError> {
        let namespace = format!("{}.{}", database, collection.unwrap_or("$cmd.aggregate"));
        let exists = collection.is_some_and(|coll| self.get(database, coll).is_some());

        let (parsed_query, winning_plan) = match operation {
            Operation::Find(spec) => {
                Filter::parse(&spec.filter)?;
                let sort = spec.sort.as_ref().map(SortSpec::parse).transpose()?;
                if let Some(projection) = &spec.projection {
                    Projection::parse(projection)?;
                }

                let mut plan = if exists {
                    collscan(&spec.filter)
                } else {
                    doc! { "stage": "EOF" }
                };
                if let (Some(pattern), Some(parsed)) = (&spec.sort, &sort) {
                    if !parsed.is_empty() {
                        plan = wrap("SORT", plan, doc! { "sortPattern": pattern.clone() });
                    }
                }
                if spec.skip > 0 {
                    plan = wrap("SKIP", plan, doc! { "skipAmount": count_value(spec.skip) });
                }
                if spec.limit > 0 {
                    plan = wrap("LIMIT", plan, doc! { "limitAmount": count_value(spec.limit) });
                }
                if let Some(projection) = &spec.projection {
                    plan = wrap("PROJECTION_SIMPLE", plan, doc! { "transformBy": projection.clone() });
                }
                (spec.filter.clone(), plan)
            }
            Operation::Aggregate(stages) => {
                let parsed = parse_pipeline(stages, collection.is_some())?;
                let filter = match stages.first().zip(parsed.first()) {
                    Some((raw, Stage::Match(_))) => raw.get_document("$match").cloned().unwrap_or_default(),
                    _ => Document::new(),
                };
                let plan = match parsed.first() {
                    Some(Stage::Documents(_)) => doc! { "stage": "QUEUED_DATA" },
                    _ if exists => collscan(&filter),
                    _ => doc! { "stage": "EOF" },
                };
                (filter, plan)
            }
            Operation::Count(spec) => {
                Filter::parse(&spec.query)?;
                let input = if exists {
                    collscan(&spec.query)
                } else {
                    doc! { "stage": "EOF" }
                };
                (spec.query.clone(), wrap("COUNT", input, Document::new()))
            }
        };

        Ok(doc! {
            "namespace": namespace,
            "parsedQuery": parsed_query,
            "winningPlan": winning_plan,
            "rejectedPlans": [],
        })
    }

    async fn insert(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
        ordered: bool,
    ) -> Result<InsertOutcome, BackendError> {
        let coll = Arc::clone(
            self.collections
                .entry(Self::key(database, collection))
                .or_default()
                .value(),
        );
        let mut coll = coll.write();
        let mut outcome = InsertOutcome::default();

        for (index, mut document) in documents.into_iter().enumerate() {
            if !document.contains_key("_id") {
                let mut with_id = doc! { "_id": ObjectId::new() };
                with_id.extend(document);
                document = with_id;
            }

            let result = match document.get("_id") {
                Some(Bson::Array(_)) => Err(BackendError::bad_value("can't use an array for _id")),
                Some(id) => {
                    let key = id_key(id);
                    if coll.ids.contains(&key) {
                        Err(BackendError::new(
                            ErrorCode::DuplicateKey,
                            format!(
                                "E11000 duplicate key error collection: {}.{} index: _id_ dup key: {{ _id: {} }}",
                                database, collection, id
                            ),
                        ))
                    } else {
                        Ok(key)
                    }
                }
                None => Err(BackendError::internal("document lost its _id")),
            };

            match result {
                Ok(key) => {
                    coll.ids.insert(key);
                    coll.docs.push(document);
                    outcome.inserted += 1;
                }
                Err(err) => {
                    outcome.errors.push((index, err));
                    if ordered {
                        break;
                    }
                }
            }
        }

        debug!(database, collection, inserted = outcome.inserted, "Inserted documents");
        Ok(outcome)
    }

    async fn delete(
        &self,
        database: &str,
        collection: &str,
        filter: &Document,
        limit_one: bool,
    ) -> Result<u64, BackendError> {
        let filter = Filter::parse(filter)?;
        let Some(coll) = self.get(database, collection) else {
            return Ok(0);
        };
        let mut coll = coll.write();

        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(coll.docs.len());
        for doc in std::mem::take(&mut coll.docs) {
            if (!limit_one || removed.is_empty()) && filter.matches(&doc) {
                removed.push(doc);
            } else {
                kept.push(doc);
            }
        }
        coll.docs = kept;
        for doc in &removed {
            if let Some(id) = doc.get("_id") {
                coll.ids.remove(&id_key(id));
            }
        }
        Ok(removed.len() as u64)
    }

    async fn create_collection(&self, database: &str, collection: &str) -> Result<(), BackendError> {
        match self.collections.entry(Self::key(database, collection)) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(BackendError::new(
                ErrorCode::NamespaceExists,
                format!("Collection {}.{} already exists.", database, collection),
            )),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::default());
                Ok(())
            }
        }
    }

    async fn drop_collection(&self, database: &str, collection: &str) -> Result<bool, BackendError> {
        Ok(self.collections.remove(&Self::key(database, collection)).is_some())
    }

    async fn list_collections(&self, database: &str) -> Result<Vec<String>, BackendError> {
        let prefix = format!("{}.", database);
        let mut names: Vec<String> = self
            .collections
            .iter()
            .filter_map(|entry| entry.key().strip_prefix(&prefix).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn list_databases(&self) -> Result<Vec<(String, u64)>, BackendError> {
        let mut sizes: std::collections::BTreeMap<String, u64> = std::collections::BTreeMap::new();
        for entry in self.collections.iter() {
            let Some((database, _)) = entry.key().split_once('.') else {
                continue;
            };
            let bytes: u64 = entry
                .value()
                .read()
                .docs
                .iter()
                .map(|d| bson::to_vec(d).map(|v| v.len() as u64).unwrap_or_default())
                .sum();
            *sizes.entry(database.to_string()).or_default() += bytes;
        }
        Ok(sizes.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn seeded() -> MemoryBackend {
        let backend = MemoryBackend::new();
        let docs = (1..=5).map(|i| doc! { "_id": i, "v": i * 10 }).collect();
        backend.insert("test", "c", docs, true).await.unwrap();
        backend
    }

    async fn collect(stream: DocumentStream) -> Vec<Document> {
        stream.try_collect().await.unwrap()
    }

    #[tokio::test]
    async fn test_find_with_sort_skip_limit() {
        let backend = seeded().await;
        let spec = FindSpec {
            filter: doc! { "v": { "$gte": 20 } },
            sort: Some(doc! { "v": -1 }),
            projection: Some(doc! { "_id": 1 }),
            skip: 1,
            limit: 2,
        };
        let docs = collect(backend.execute("test", Some("c"), Operation::Find(spec)).await.unwrap()).await;
        assert_eq!(docs, vec![doc! { "_id": 4 }, doc! { "_id": 3 }]);
    }

    #[tokio::test]
    async fn test_missing_collection_reads_empty() {
        let backend = MemoryBackend::new();
        let docs = collect(
            backend
                .execute("test", Some("none"), Operation::Find(FindSpec::default()))
                .await
                .unwrap(),
        )
        .await;
        assert!(docs.is_empty());

        let count = collect(
            backend
                .execute("test", Some("none"), Operation::Count(CountSpec::default()))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(count, vec![doc! { "n": 0 }]);
    }

    #[tokio::test]
    async fn test_duplicate_ids() {
        let backend = seeded().await;
        let outcome = backend
            .insert("test", "c", vec![doc! { "_id": 6 }, doc! { "_id": 1.0 }, doc! { "_id": 7 }], true)
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].0, 1);
        assert_eq!(outcome.errors[0].1.code, ErrorCode::DuplicateKey);

        let outcome = backend
            .insert("test", "c", vec![doc! { "_id": 2 }, doc! { "_id": 8 }], false)
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_large_integer_ids_stay_distinct() {
        let backend = MemoryBackend::new();
        let outcome = backend
            .insert(
                "test",
                "c",
                vec![
                    doc! { "_id": 9_007_199_254_740_992_i64 },
                    doc! { "_id": 9_007_199_254_740_993_i64 },
                ],
                false,
            )
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 2);
        assert!(outcome.errors.is_empty());

        let outcome = backend
            .insert("test", "c", vec![doc! { "_id": 9_007_199_254_740_993_i64 }], false)
            .await
            .unwrap();
        assert_eq!(outcome.errors[0].1.code, ErrorCode::DuplicateKey);

        // Whole doubles still collide with the equal integer
        let outcome = backend
            .insert("test", "d", vec![doc! { "_id": 7_i64 }, doc! { "_id": 7.0 }, doc! { "_id": 7.5 }], false)
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.errors[0].0, 1);
    }

    #[tokio::test]
    async fn test_delete_and_reinsert() {
        let backend = seeded().await;
        assert_eq!(backend.delete("test", "c", &doc! { "v": { "$gt": 20 } }, true).await.unwrap(), 1);
        assert_eq!(backend.delete("test", "c", &doc! { "v": { "$gt": 20 } }, false).await.unwrap(), 2);
        let outcome = backend.insert("test", "c", vec![doc! { "_id": 3 }], true).await.unwrap();
        assert_eq!(outcome.inserted, 1);
    }

    #[tokio::test]
    async fn test_namespaces() {
        let backend = seeded().await;
        backend.create_collection("test", "d").await.unwrap();
        let err = backend.create_collection("test", "d").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NamespaceExists);

        assert_eq!(backend.list_collections("test").await.unwrap(), vec!["c", "d"]);
        assert!(backend.drop_collection("test", "d").await.unwrap());
        assert!(!backend.drop_collection("test", "d").await.unwrap());

        let dbs = backend.list_databases().await.unwrap();
        assert_eq!(dbs.len(), 1);
        assert_eq!(dbs[0].0, "test");
        assert!(dbs[0].1 > 0);
    }

    #[tokio::test]
    async fn test_explain_plans() {
        let backend = seeded().await;
        let find = Operation::Find(FindSpec {
            filter: doc! { "v": 42 },
            sort: Some(doc! { "v": 1 }),
            limit: 1,
            ..FindSpec::default()
        });
        let plan = backend.explain("test", Some("c"), &find).await.unwrap();
        assert_eq!(plan.get_str("namespace").unwrap(), "test.c");
        let winning = plan.get_document("winningPlan").unwrap();
        assert_eq!(winning.get_str("stage").unwrap(), "LIMIT");
        let sort = winning.get_document("inputStage").unwrap();
        assert_eq!(sort.get_str("stage").unwrap(), "SORT");
        assert_eq!(sort.get_document("inputStage").unwrap().get_str("stage").unwrap(), "COLLSCAN");

        let plan = backend.explain("test", Some("missing"), &find).await.unwrap();
        let leaf = plan
            .get_document("winningPlan")
            .and_then(|p| p.get_document("inputStage"))
            .and_then(|p| p.get_document("inputStage"))
            .unwrap();
        assert_eq!(leaf.get_str("stage").unwrap(), "EOF");

        let bad = Operation::Aggregate(vec![doc! { "$bogus": 1 }]);
        let err = backend.explain("test", Some("c"), &bad).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Location(40324));
    }

    #[tokio::test]
    async fn test_aggregate_documents_without_collection() {
        let backend = MemoryBackend::new();
        let stages = vec![doc! { "$documents": [ { "a": 1 }, { "a": 2 } ] }, doc! { "$count": "n" }];
        let docs = collect(backend.execute("test", None, Operation::Aggregate(stages)).await.unwrap()).await;
        assert_eq!(docs, vec![doc! { "n": 2 }]);
    }
}
