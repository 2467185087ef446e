//! Translate a list query string into a store query.
//!
//! ```text
//! ?difficulty=easy&price[lt]=1500&sort=-ratingsAverage,price&fields=name,price&page=2&limit=10
//! ```
//!
//! The stages run in a fixed order:
//! `QueryFeatures::new(..).filter()?.sort()?.limit_fields().paginate().finish()`.
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    db::{
        StoreError,
        query::{Condition, Field, FieldKind, Filter, FilterValue, FindQuery, SortKey, lookup},
    },
    error::HttpError,
};

pub const DEFAULT_PAGE: usize = 1;
pub const DEFAULT_LIMIT: usize = 100;

const RESERVED: [&str; 4] = ["page", "sort", "limit", "fields"];

/// Which fields of the rendered document a list response keeps.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Everything except the `__v` revision.
    Default,
    /// Only these fields, plus `id`.
    Include(Vec<String>),
    /// Everything except these fields.
    Exclude(Vec<String>),
}

impl Projection {
    pub fn apply(&self, view: Value) -> Value {
        let Value::Object(mut object) = view else {
            return view;
        };
        match self {
            Projection::Default => {
                object.remove("__v");
            }
            Projection::Include(fields) => {
                object.retain(|key, _| key == "id" || fields.iter().any(|f| f == key));
            }
            Projection::Exclude(fields) => {
                object.retain(|key, _| key == "id" || !fields.iter().any(|f| f == key));
            }
        }
        Value::Object(object)
    }
}

/// Output of the builder.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    pub find: FindQuery,
    pub projection: Projection,
    /// `page` was given explicitly, so paging past the end is an error.
    pub page_requested: bool,
}

pub struct QueryFeatures {
    fields: &'static [Field],
    params: Vec<(String, String)>,
    find: FindQuery,
    projection: Projection,
    page_requested: bool,
}

impl QueryFeatures {
    /// `scope` is always part of the filter, whatever the client asks for.
    pub fn new(scope: Vec<Filter>, params: Vec<(String, String)>, fields: &'static [Field]) -> Self {
        QueryFeatures {
            fields,
            params,
            find: FindQuery {
                filters: scope,
                sort: Vec::new(),
                skip: 0,
                limit: Some(DEFAULT_LIMIT),
            },
            projection: Projection::Default,
            page_requested: false,
        }
    }

    fn values(&self, key: &str) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Comma-separated values of a key, repeated occurrences joined.
    fn list(&self, key: &str) -> Vec<String> {
        self.values(key)
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn filter(mut self) -> Result<Self, HttpError> {
        // (field, operator) -> values, in first-seen order
        let mut groups: Vec<((String, Option<String>), Vec<String>)> = Vec::new();
        for (key, value) in &self.params {
            if RESERVED.contains(&key.as_str()) {
                continue;
            }
            let parsed = parse_key(key)?;
            match groups.iter_mut().find(|(k, _)| *k == parsed) {
                Some((_, values)) => values.push(value.clone()),
                None => groups.push((parsed, vec![value.clone()])),
            }
        }

        for ((name, op), values) in groups {
            let field = lookup(self.fields, &name)
                .filter(|f| f.queryable)
                .ok_or_else(|| HttpError::bad_request(format!("Invalid filter field: {}", name)))?;

            let mut coerced = values
                .iter()
                .map(|v| coerce(field, v))
                .collect::<Result<Vec<_>, StoreError>>()?;

            match op.as_deref() {
                None if coerced.len() > 1 => self
                    .find
                    .filters
                    .push(Filter::new(*field, Condition::In(coerced))),
                None => {
                    if let Some(value) = coerced.pop() {
                        self.find.filters.push(Filter::new(*field, Condition::Eq(value)));
                    }
                }
                Some(op) => {
                    for value in coerced {
                        let condition = match op {
                            "gte" => Condition::Gte(value),
                            "gt" => Condition::Gt(value),
                            "lte" => Condition::Lte(value),
                            "lt" => Condition::Lt(value),
                            "ne" => Condition::Ne(value),
                            other => {
                                return Err(HttpError::bad_request(format!(
                                    "Invalid filter operator: {}",
                                    other
                                )));
                            }
                        };
                        self.find.filters.push(Filter::new(*field, condition));
                    }
                }
            }
        }

        Ok(self)
    }

    pub fn sort(mut self) -> Result<Self, HttpError> {
        let keys = self.list("sort");
        if keys.is_empty() {
            self.find.sort = vec![SortKey::desc(Field::time("createdAt"))];
            return Ok(self);
        }

        let mut sort = Vec::with_capacity(keys.len());
        for key in keys {
            let (name, descending) = match key.strip_prefix('-') {
                Some(name) => (name, true),
                None => (key.as_str(), false),
            };
            let field = lookup(self.fields, name)
                .filter(|f| f.queryable && !f.many)
                .ok_or_else(|| HttpError::bad_request(format!("Invalid sort field: {}", name)))?;
            sort.push(SortKey {
                field: *field,
                descending,
            });
        }
        self.find.sort = sort;
        Ok(self)
    }

    pub fn limit_fields(mut self) -> Self {
        let fields = self.list("fields");
        if fields.is_empty() {
            return self;
        }

        let (excluded, included): (Vec<String>, Vec<String>) =
            fields.into_iter().partition(|f| f.starts_with('-'));
        self.projection = if included.is_empty() {
            Projection::Exclude(
                excluded
                    .into_iter()
                    .map(|f| f.trim_start_matches('-').to_string())
                    .collect(),
            )
        } else {
            Projection::Include(included)
        };
        self
    }

    /// Malformed, zero or out-of-range values fall back to the defaults.
    pub fn paginate(mut self) -> Self {
        let number = |key: &str, default: usize| {
            self.values(key)
                .last()
                .and_then(|v| v.trim().parse::<i64>().ok())
                .filter(|n| *n > 0)
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(default)
        };
        let page = number("page", DEFAULT_PAGE);
        let limit = number("limit", DEFAULT_LIMIT);
        let requested = self.values("page").next().is_some();

        self.page_requested = requested;
        self.find.skip = (page - 1).saturating_mul(limit);
        self.find.limit = Some(limit);
        self
    }

    pub fn finish(self) -> PreparedQuery {
        PreparedQuery {
            find: self.find,
            projection: self.projection,
            page_requested: self.page_requested,
        }
    }
}

/// `price[gte]` -> (`price`, `Some("gte")`)
fn parse_key(key: &str) -> Result<(String, Option<String>), HttpError> {
    match key.split_once('[') {
        None => Ok((key.to_string(), None)),
        Some((name, rest)) => match rest.strip_suffix(']') {
            Some(op) if !op.is_empty() && !op.contains(['[', ']']) => {
                Ok((name.to_string(), Some(op.to_string())))
            }
            _ => Err(HttpError::bad_request(format!("Invalid filter field: {}", key))),
        },
    }
}

fn coerce(field: &Field, raw: &str) -> Result<FilterValue, StoreError> {
    let cast_error = || StoreError::Cast {
        field: field.name.to_string(),
        value: raw.to_string(),
    };
    let value = raw.trim();

    match field.kind {
        FieldKind::Text => Ok(FilterValue::Text(value.to_string())),
        FieldKind::Id => Uuid::parse_str(value)
            .map(FilterValue::from)
            .map_err(|_| cast_error()),
        FieldKind::Number => value
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(FilterValue::Number)
            .ok_or_else(cast_error),
        FieldKind::Bool => match value {
            "true" => Ok(FilterValue::Bool(true)),
            "false" => Ok(FilterValue::Bool(false)),
            _ => Err(cast_error()),
        },
        FieldKind::Time => parse_time(value).map(FilterValue::Time).ok_or_else(cast_error),
    }
}

/// RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Some(time.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|time| time.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use serde_json::json;

    const FIELDS: &[Field] = &[
        Field::id("id"),
        Field::text("name"),
        Field::text("difficulty"),
        Field::number("price"),
        Field::number("duration"),
        Field::text("images").list(),
        Field::boolean("secretTour").internal(),
        Field::time("createdAt"),
    ];

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn prepare(pairs: &[(&str, &str)]) -> Result<PreparedQuery, HttpError> {
        Ok(QueryFeatures::new(Vec::new(), params(pairs), FIELDS)
            .filter()?
            .sort()?
            .limit_fields()
            .paginate()
            .finish())
    }

    #[test]
    fn empty_query_selects_everything_newest_first() {
        let prepared = prepare(&[]).unwrap();
        assert!(prepared.find.filters.is_empty());
        assert_eq!(prepared.find.sort, vec![SortKey::desc(Field::time("createdAt"))]);
        assert_eq!(prepared.find.skip, 0);
        assert_eq!(prepared.find.limit, Some(DEFAULT_LIMIT));
        assert_eq!(prepared.projection, Projection::Default);
        assert!(!prepared.page_requested);
    }

    #[test]
    fn operators_and_repeated_keys_become_conditions() {
        let prepared = prepare(&[
            ("duration[gte]", "5"),
            ("price[lt]", "1500"),
            ("difficulty", "easy"),
            ("difficulty", "medium"),
            ("name[ne]", "The Sea Explorer"),
            ("sort", "price"),
        ])
        .unwrap();

        let filters = prepared.find.filters;
        assert_eq!(filters.len(), 4);
        assert_eq!(filters[0], Filter::gte(Field::number("duration"), 5.0));
        assert_eq!(filters[1].condition, Condition::Lt(FilterValue::Number(1500.0)));
        assert_eq!(
            filters[2].condition,
            Condition::In(vec!["easy".into(), "medium".into()])
        );
        assert_eq!(filters[3].condition, Condition::Ne("The Sea Explorer".into()));
    }

    #[test]
    fn scope_is_kept_in_front_of_client_filters() {
        let scope = vec![Filter::ne(Field::boolean("secretTour"), true)];
        let prepared = QueryFeatures::new(scope.clone(), params(&[("difficulty", "easy")]), FIELDS)
            .filter()
            .unwrap()
            .finish();
        assert_eq!(prepared.find.filters[0], scope[0]);
        assert_eq!(prepared.find.filters.len(), 2);
    }

    #[test]
    fn unknown_and_internal_fields_are_rejected() {
        for key in ["rating", "secretTour", "price[between]", "price[gte"] {
            let err = prepare(&[(key, "1")]).err().unwrap();
            assert_eq!(err.status, StatusCode::BAD_REQUEST, "{}", key);
        }
        let err = prepare(&[("whatever", "1")]).err().unwrap();
        assert_eq!(err.message, "Invalid filter field: whatever");
    }

    #[test]
    fn uncoercible_values_are_cast_errors() {
        let err = prepare(&[("price[gte]", "cheap")]).err().unwrap();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Invalid price: cheap.");

        let err = prepare(&[("id", "abc")]).err().unwrap();
        assert_eq!(err.message, "Invalid id: abc.");
    }

    #[test]
    fn dates_accept_plain_days() {
        let prepared = prepare(&[("createdAt[gte]", "2021-04-25")]).unwrap();
        let expected = NaiveDate::from_ymd_opt(2021, 4, 25)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        assert_eq!(prepared.find.filters[0].condition, Condition::Gte(expected.into()));
    }

    #[test]
    fn sort_keys_keep_order_and_direction() {
        let prepared = prepare(&[("sort", "-price, name"), ("sort", "duration")]).unwrap();
        assert_eq!(
            prepared.find.sort,
            vec![
                SortKey::desc(Field::number("price")),
                SortKey::asc(Field::text("name")),
                SortKey::asc(Field::number("duration")),
            ]
        );

        assert!(prepare(&[("sort", "images")]).is_err());
        assert!(prepare(&[("sort", "-unknown")]).is_err());
    }

    #[test]
    fn pagination_falls_back_to_defaults() {
        let prepared = prepare(&[("page", "3"), ("limit", "10")]).unwrap();
        assert_eq!(prepared.find.skip, 20);
        assert_eq!(prepared.find.limit, Some(10));
        assert!(prepared.page_requested);

        for (page, limit) in [("0", "0"), ("-1", "abc"), ("two", "")] {
            let prepared = prepare(&[("page", page), ("limit", limit)]).unwrap();
            assert_eq!(prepared.find.skip, 0);
            assert_eq!(prepared.find.limit, Some(DEFAULT_LIMIT));
        }
    }

    #[test]
    fn oversized_numbers_are_treated_as_malformed() {
        let prepared = prepare(&[("limit", "18446744073709551615")]).unwrap();
        assert_eq!(prepared.find.limit, Some(DEFAULT_LIMIT));
        assert!(!prepared.page_requested);

        let prepared = prepare(&[("page", "9223372036854775807"), ("limit", "9223372036854775807")]).unwrap();
        assert_eq!(prepared.find.limit, Some(9_223_372_036_854_775_807));
        assert_eq!(prepared.find.skip, usize::MAX);
    }

    #[test]
    fn projection_keeps_id_and_drops_revision_by_default() {
        let view = json!({ "id": "1", "name": "a", "price": 2, "__v": 0 });

        assert_eq!(
            Projection::Default.apply(view.clone()),
            json!({ "id": "1", "name": "a", "price": 2 })
        );

        let prepared = prepare(&[("fields", "name,durationWeeks")]).unwrap();
        assert_eq!(
            prepared.projection.apply(view.clone()),
            json!({ "id": "1", "name": "a" })
        );

        let prepared = prepare(&[("fields", "-price")]).unwrap();
        assert_eq!(
            prepared.projection.apply(view),
            json!({ "id": "1", "name": "a", "__v": 0 })
        );
    }
}
