//! JSONB document tables: one `(id UUID PRIMARY KEY, doc JSONB)` table per
//! collection, with expression indexes for the unique keys.
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use sqlx::{Pool, Postgres, QueryBuilder, postgres::PgDatabaseError};
use uuid::Uuid;

use super::{
    StoreError,
    query::{Condition, Field, FieldKind, Filter, FilterValue, FindQuery},
};

static DUPLICATE_VALUE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\)=\((.*)\) already exists").ok());

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        PgStore { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn insert(&self, collection: &'static str, id: Uuid, doc: Value) -> Result<Value, StoreError> {
        let sql = format!("INSERT INTO {} (id, doc) VALUES ($1, $2) RETURNING doc", collection);
        sqlx::query_scalar::<_, Value>(&sql)
            .bind(id)
            .bind(doc)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)
    }

    pub async fn find_by_id(
        &self,
        collection: &'static str,
        id: Uuid,
        scope: &[Filter],
    ) -> Result<Option<Value>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT doc FROM {} WHERE id = ", collection));
        qb.push_bind(id);
        push_filters(&mut qb, scope);

        qb.build_query_scalar::<Value>()
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)
    }

    pub async fn find(&self, collection: &'static str, query: &FindQuery) -> Result<Vec<Value>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT doc FROM {} WHERE TRUE", collection));
        push_filters(&mut qb, &query.filters);

        qb.push(" ORDER BY ");
        for key in &query.sort {
            push_scalar(&mut qb, &key.field);
            qb.push(if key.descending { " DESC" } else { " ASC" });
            qb.push(" NULLS LAST, ");
        }
        qb.push("id");

        if let Some(limit) = query.limit {
            qb.push(" LIMIT ");
            qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        if query.skip > 0 {
            qb.push(" OFFSET ");
            qb.push_bind(i64::try_from(query.skip).unwrap_or(i64::MAX));
        }

        qb.build_query_scalar::<Value>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)
    }

    pub async fn count(&self, collection: &'static str, filters: &[Filter]) -> Result<u64, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*) FROM {} WHERE TRUE", collection));
        push_filters(&mut qb, filters);

        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(count.max(0) as u64)
    }

    pub async fn replace(
        &self,
        collection: &'static str,
        id: Uuid,
        doc: Value,
    ) -> Result<Option<Value>, StoreError> {
        let sql = format!("UPDATE {} SET doc = $2 WHERE id = $1 RETURNING doc", collection);
        sqlx::query_scalar::<_, Value>(&sql)
            .bind(id)
            .bind(doc)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)
    }

    pub async fn delete(&self, collection: &'static str, id: Uuid) -> Result<Option<Value>, StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = $1 RETURNING doc", collection);
        sqlx::query_scalar::<_, Value>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)
    }
}

fn map_db_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let detail = db_err
                .try_downcast_ref::<PgDatabaseError>()
                .and_then(|e| e.detail())
                .unwrap_or_default();
            let value = DUPLICATE_VALUE
                .as_ref()
                .and_then(|re| re.captures(detail))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| db_err.message().to_string());
            return StoreError::Duplicate { value };
        }
    }
    StoreError::Database(err)
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filters: &[Filter]) {
    for filter in filters {
        qb.push(" AND ");
        push_filter(qb, filter);
    }
}

// Field names come from static descriptors, never from request input, so
// they are safe to splice into the statement.
fn push_scalar(qb: &mut QueryBuilder<'_, Postgres>, field: &Field) {
    let expr = match field.kind {
        FieldKind::Number => format!("((doc->>'{}')::float8)", field.name),
        FieldKind::Bool => format!("((doc->>'{}')::boolean)", field.name),
        FieldKind::Time => format!("((doc->>'{}')::timestamptz)", field.name),
        FieldKind::Text | FieldKind::Id => format!("((doc->>'{}') COLLATE \"C\")", field.name),
    };
    qb.push(expr);
}

fn element_expr(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Number => "(e.v)::float8",
        FieldKind::Bool => "(e.v)::boolean",
        FieldKind::Time => "(e.v)::timestamptz",
        FieldKind::Text | FieldKind::Id => "(e.v COLLATE \"C\")",
    }
}

fn push_value(qb: &mut QueryBuilder<'_, Postgres>, value: &FilterValue) {
    match value {
        FilterValue::Text(v) => qb.push_bind(v.clone()),
        FilterValue::Number(v) => qb.push_bind(*v),
        FilterValue::Bool(v) => qb.push_bind(*v),
        FilterValue::Time(v) => qb.push_bind(*v),
    };
}

fn push_comparison(qb: &mut QueryBuilder<'_, Postgres>, condition: &Condition) {
    let (op, value) = match condition {
        Condition::Eq(v) => (" = ", v),
        Condition::Ne(v) => (" IS DISTINCT FROM ", v),
        Condition::Gt(v) => (" > ", v),
        Condition::Gte(v) => (" >= ", v),
        Condition::Lt(v) => (" < ", v),
        Condition::Lte(v) => (" <= ", v),
        Condition::In(values) => {
            if values.is_empty() {
                qb.push(" IS NOT NULL AND FALSE");
                return;
            }
            qb.push(" IN (");
            let mut separated = qb.separated(", ");
            for value in values {
                match value {
                    FilterValue::Text(v) => separated.push_bind(v.clone()),
                    FilterValue::Number(v) => separated.push_bind(*v),
                    FilterValue::Bool(v) => separated.push_bind(*v),
                    FilterValue::Time(v) => separated.push_bind(*v),
                };
            }
            separated.push_unseparated(")");
            return;
        }
    };
    qb.push(op);
    push_value(qb, value);
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    if !filter.field.many {
        push_scalar(qb, &filter.field);
        push_comparison(qb, &filter.condition);
        return;
    }

    // List fields: "some element satisfies", or "no element equals" for Ne.
    let condition = match &filter.condition {
        Condition::Ne(v) => {
            qb.push("NOT ");
            Condition::Eq(v.clone())
        }
        other => other.clone(),
    };
    qb.push(format!(
        "EXISTS (SELECT 1 FROM jsonb_array_elements_text(COALESCE(doc->'{}', '[]'::jsonb)) AS e(v) WHERE ",
        filter.field.name
    ));
    qb.push(element_expr(filter.field.kind));
    push_comparison(qb, &condition);
    qb.push(")");
}
