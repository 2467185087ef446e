//! In-process document store used when no database is configured.
use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;
use uuid::Uuid;

use super::{
    StoreError,
    query::{Filter, FindQuery},
};

type Collection = HashMap<Uuid, Value>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<&'static str, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, collection: &'static str, f: impl FnOnce(Option<&Collection>) -> T) -> Result<T, StoreError> {
        let guard = self
            .collections
            .read()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))?;
        Ok(f(guard.get(collection)))
    }

    fn write<T>(
        &self,
        collection: &'static str,
        f: impl FnOnce(&mut Collection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self
            .collections
            .write()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))?;
        f(guard.entry(collection).or_default())
    }

    pub fn insert(
        &self,
        collection: &'static str,
        unique: &[&[&str]],
        id: Uuid,
        doc: Value,
    ) -> Result<Value, StoreError> {
        self.write(collection, |docs| {
            if docs.contains_key(&id) {
                return Err(StoreError::Duplicate {
                    value: id.to_string(),
                });
            }
            check_unique(docs, unique, id, &doc)?;
            docs.insert(id, doc.clone());
            Ok(doc)
        })
    }

    pub fn find_by_id(
        &self,
        collection: &'static str,
        id: Uuid,
        scope: &[Filter],
    ) -> Result<Option<Value>, StoreError> {
        self.read(collection, |docs| {
            docs.and_then(|docs| docs.get(&id))
                .filter(|doc| scope.iter().all(|f| f.matches(doc)))
                .cloned()
        })
    }

    pub fn find(&self, collection: &'static str, query: &FindQuery) -> Result<Vec<Value>, StoreError> {
        self.read(collection, |docs| {
            let mut matched: Vec<(&Uuid, &Value)> = docs
                .into_iter()
                .flatten()
                .filter(|(_, doc)| query.filters.iter().all(|f| f.matches(doc)))
                .collect();

            matched.sort_by(|(a_id, a), (b_id, b)| {
                query
                    .sort
                    .iter()
                    .map(|key| key.compare(a, b))
                    .find(|ordering| ordering.is_ne())
                    .unwrap_or_else(|| a_id.cmp(b_id))
            });

            matched
                .into_iter()
                .skip(query.skip)
                .take(query.limit.unwrap_or(usize::MAX))
                .map(|(_, doc)| doc.clone())
                .collect()
        })
    }

    pub fn count(&self, collection: &'static str, filters: &[Filter]) -> Result<u64, StoreError> {
        self.read(collection, |docs| {
            docs.into_iter()
                .flatten()
                .filter(|(_, doc)| filters.iter().all(|f| f.matches(doc)))
                .count() as u64
        })
    }

    pub fn replace(
        &self,
        collection: &'static str,
        unique: &[&[&str]],
        id: Uuid,
        doc: Value,
    ) -> Result<Option<Value>, StoreError> {
        self.write(collection, |docs| {
            if !docs.contains_key(&id) {
                return Ok(None);
            }
            check_unique(docs, unique, id, &doc)?;
            docs.insert(id, doc.clone());
            Ok(Some(doc))
        })
    }

    pub fn delete(&self, collection: &'static str, id: Uuid) -> Result<Option<Value>, StoreError> {
        self.write(collection, |docs| Ok(docs.remove(&id)))
    }
}

/// A key set is only enforced when every one of its fields is present.
fn check_unique(
    docs: &Collection,
    unique: &[&[&str]],
    id: Uuid,
    doc: &Value,
) -> Result<(), StoreError> {
    for key in unique {
        let Some(values) = key_values(doc, key) else {
            continue;
        };
        let taken = docs
            .iter()
            .any(|(other_id, other)| *other_id != id && key_values(other, key).as_ref() == Some(&values));
        if taken {
            let value = values
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", ");
            return Err(StoreError::Duplicate { value });
        }
    }
    Ok(())
}

fn key_values(doc: &Value, key: &[&str]) -> Option<Vec<Value>> {
    key.iter()
        .map(|field| match doc.get(*field) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.clone()),
        })
        .collect()
}
