use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use sqlx::{Pool, Postgres};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;
pub mod query;

mod booking;
pub use booking::BookingExt;

mod review;
pub use review::ReviewExt;

mod tour;
pub use tour::{DistanceUnit, TourExt, public_scope};

mod user;
pub use user::{UserExt, active_scope};

use memory::MemoryStore;
use postgres::PgStore;
use query::{Field, Filter, FindQuery};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("cannot read {value:?} as {field}")]
    Cast { field: String, value: String },
    #[error("duplicate key value ({value})")]
    Duplicate { value: String },
    #[error("document does not match its model: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("{0}")]
    Backend(String),
}

/// A model persisted as a JSON document in its own collection.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: &'static str;
    /// Top-level fields, as the query layer sees them.
    const FIELDS: &'static [Field];
    /// Key sets that must be unique across the collection.
    const UNIQUE: &'static [&'static [&'static str]] = &[];

    fn id(&self) -> Uuid;
}

pub fn parse_id(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|_| StoreError::InvalidId(raw.to_string()))
}

#[derive(Debug, Clone)]
enum Backend {
    Postgres(PgStore),
    Memory(Arc<MemoryStore>),
}

/// Typed facade over the document store.
///
/// Every write goes through [`DBClient::insert`] or [`DBClient::replace`];
/// the latter bumps the document's `__v` revision.
#[derive(Debug, Clone)]
pub struct DBClient {
    backend: Backend,
}

impl DBClient {
    pub fn new(pool: Pool<Postgres>) -> Self {
        DBClient {
            backend: Backend::Postgres(PgStore::new(pool)),
        }
    }

    pub fn memory() -> Self {
        DBClient {
            backend: Backend::Memory(Arc::new(MemoryStore::new())),
        }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        match &self.backend {
            Backend::Postgres(store) => store.migrate().await,
            Backend::Memory(_) => Ok(()),
        }
    }

    pub async fn insert<D: Document>(&self, doc: &D) -> Result<D, StoreError> {
        let value = serde_json::to_value(doc)?;
        let stored = match &self.backend {
            Backend::Postgres(store) => store.insert(D::COLLECTION, doc.id(), value).await?,
            Backend::Memory(store) => store.insert(D::COLLECTION, D::UNIQUE, doc.id(), value)?,
        };
        Ok(serde_json::from_value(stored)?)
    }

    pub async fn find_by_id<D: Document>(&self, id: Uuid, scope: &[Filter]) -> Result<Option<D>, StoreError> {
        let found = match &self.backend {
            Backend::Postgres(store) => store.find_by_id(D::COLLECTION, id, scope).await?,
            Backend::Memory(store) => store.find_by_id(D::COLLECTION, id, scope)?,
        };
        found.map(decode).transpose()
    }

    pub async fn find<D: Document>(&self, query: &FindQuery) -> Result<Vec<D>, StoreError> {
        let found = match &self.backend {
            Backend::Postgres(store) => store.find(D::COLLECTION, query).await?,
            Backend::Memory(store) => store.find(D::COLLECTION, query)?,
        };
        found.into_iter().map(decode).collect()
    }

    pub async fn find_one<D: Document>(&self, filters: Vec<Filter>) -> Result<Option<D>, StoreError> {
        let query = FindQuery {
            filters,
            limit: Some(1),
            ..FindQuery::default()
        };
        Ok(self.find(&query).await?.into_iter().next())
    }

    pub async fn count<D: Document>(&self, filters: &[Filter]) -> Result<u64, StoreError> {
        match &self.backend {
            Backend::Postgres(store) => store.count(D::COLLECTION, filters).await,
            Backend::Memory(store) => store.count(D::COLLECTION, filters),
        }
    }

    /// Overwrite a stored document. `None` when it no longer exists.
    pub async fn replace<D: Document>(&self, doc: &D) -> Result<Option<D>, StoreError> {
        let mut value = serde_json::to_value(doc)?;
        if let Some(object) = value.as_object_mut() {
            let revision = object.get("__v").and_then(Value::as_i64).unwrap_or(0);
            object.insert("__v".to_string(), Value::from(revision + 1));
        }

        let stored = match &self.backend {
            Backend::Postgres(store) => store.replace(D::COLLECTION, doc.id(), value).await?,
            Backend::Memory(store) => store.replace(D::COLLECTION, D::UNIQUE, doc.id(), value)?,
        };
        stored.map(decode).transpose()
    }

    pub async fn delete<D: Document>(&self, id: Uuid) -> Result<Option<D>, StoreError> {
        let removed = match &self.backend {
            Backend::Postgres(store) => store.delete(D::COLLECTION, id).await?,
            Backend::Memory(store) => store.delete(D::COLLECTION, id)?,
        };
        removed.map(decode).transpose()
    }
}

fn decode<D: DeserializeOwned>(value: Value) -> Result<D, StoreError> {
    Ok(serde_json::from_value(value)?)
}
