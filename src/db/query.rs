//! Storage-neutral description of a document query.
//!
//! Both backends interpret the same [`Filter`] and [`SortKey`] values, so a
//! query built from a request behaves identically on Postgres and in memory.
use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Bool,
    Time,
    /// UUID reference, stored as its hyphenated string.
    Id,
}

/// Descriptor of one top-level document field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    /// The field holds an array of `kind` values.
    pub many: bool,
    /// Clients may filter and sort on the field.
    pub queryable: bool,
}

impl Field {
    const fn of(name: &'static str, kind: FieldKind) -> Self {
        Field {
            name,
            kind,
            many: false,
            queryable: true,
        }
    }

    pub const fn text(name: &'static str) -> Self {
        Field::of(name, FieldKind::Text)
    }

    pub const fn number(name: &'static str) -> Self {
        Field::of(name, FieldKind::Number)
    }

    pub const fn boolean(name: &'static str) -> Self {
        Field::of(name, FieldKind::Bool)
    }

    pub const fn time(name: &'static str) -> Self {
        Field::of(name, FieldKind::Time)
    }

    pub const fn id(name: &'static str) -> Self {
        Field::of(name, FieldKind::Id)
    }

    pub const fn list(mut self) -> Self {
        self.many = true;
        self
    }

    /// Hidden from client queries; still usable by server-side filters.
    pub const fn internal(mut self) -> Self {
        self.queryable = false;
        self
    }
}

pub fn lookup(fields: &'static [Field], name: &str) -> Option<&'static Field> {
    fields.iter().find(|f| f.name == name)
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Time(DateTime<Utc>),
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<Uuid> for FilterValue {
    fn from(value: Uuid) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Number(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        FilterValue::Time(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(FilterValue),
    Ne(FilterValue),
    Gt(FilterValue),
    Gte(FilterValue),
    Lt(FilterValue),
    Lte(FilterValue),
    In(Vec<FilterValue>),
}

/// One predicate on a field. For list fields a predicate holds when any
/// element satisfies it, except `Ne` which requires that no element equals
/// the value. Missing and null fields only satisfy `Ne`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: Field,
    pub condition: Condition,
}

impl Filter {
    pub fn new(field: Field, condition: Condition) -> Self {
        Filter { field, condition }
    }

    pub fn eq(field: Field, value: impl Into<FilterValue>) -> Self {
        Filter::new(field, Condition::Eq(value.into()))
    }

    pub fn ne(field: Field, value: impl Into<FilterValue>) -> Self {
        Filter::new(field, Condition::Ne(value.into()))
    }

    pub fn gt(field: Field, value: impl Into<FilterValue>) -> Self {
        Filter::new(field, Condition::Gt(value.into()))
    }

    pub fn gte(field: Field, value: impl Into<FilterValue>) -> Self {
        Filter::new(field, Condition::Gte(value.into()))
    }

    pub fn is_in<V: Into<FilterValue>>(field: Field, values: impl IntoIterator<Item = V>) -> Self {
        Filter::new(
            field,
            Condition::In(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Evaluate the predicate against a JSON document.
    pub fn matches(&self, doc: &Value) -> bool {
        let kind = self.field.kind;
        let present: Vec<&Value> = match doc.get(self.field.name) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) if self.field.many => items.iter().collect(),
            Some(value) => vec![value],
        };

        let any = |pred: &dyn Fn(Ordering) -> bool, expected: &FilterValue| {
            present
                .iter()
                .any(|v| compare_json(v, expected, kind).is_some_and(pred))
        };

        match &self.condition {
            Condition::Eq(v) => any(&|o| o == Ordering::Equal, v),
            Condition::Ne(v) => !any(&|o| o == Ordering::Equal, v),
            Condition::Gt(v) => any(&|o| o == Ordering::Greater, v),
            Condition::Gte(v) => any(&|o| o != Ordering::Less, v),
            Condition::Lt(v) => any(&|o| o == Ordering::Less, v),
            Condition::Lte(v) => any(&|o| o != Ordering::Greater, v),
            Condition::In(values) => values.iter().any(|v| any(&|o| o == Ordering::Equal, v)),
        }
    }
}

/// Compare a stored JSON value, read as `kind`, with a filter operand.
/// `None` when either side cannot be read as `kind`.
fn compare_json(stored: &Value, expected: &FilterValue, kind: FieldKind) -> Option<Ordering> {
    match (kind, expected) {
        (FieldKind::Number, FilterValue::Number(expected)) => stored.as_f64()?.partial_cmp(expected),
        (FieldKind::Bool, FilterValue::Bool(expected)) => Some(stored.as_bool()?.cmp(expected)),
        (FieldKind::Time, FilterValue::Time(expected)) => Some(json_time(stored)?.cmp(expected)),
        (FieldKind::Text | FieldKind::Id, FilterValue::Text(expected)) => {
            Some(stored.as_str()?.cmp(expected.as_str()))
        }
        _ => None,
    }
}

fn json_time(value: &Value) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortKey {
    pub field: Field,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(field: Field) -> Self {
        SortKey {
            field,
            descending: false,
        }
    }

    pub fn desc(field: Field) -> Self {
        SortKey {
            field,
            descending: true,
        }
    }

    /// Order two documents by this key. Missing values sort last in both
    /// directions.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let read = |doc: &Value| match doc.get(self.field.name) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.clone()),
        };

        match (read(a), read(b)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => {
                let ordering = compare_values(&a, &b, self.field.kind);
                if self.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            }
        }
    }
}

fn compare_values(a: &Value, b: &Value, kind: FieldKind) -> Ordering {
    match kind {
        FieldKind::Number => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        FieldKind::Bool => a.as_bool().cmp(&b.as_bool()),
        FieldKind::Time => json_time(a).cmp(&json_time(b)),
        FieldKind::Text | FieldKind::Id => a.as_str().cmp(&b.as_str()),
    }
}

/// Filters are conjunctive. Results are always ordered by `sort` and then
/// by id.
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    pub filters: Vec<Filter>,
    pub sort: Vec<SortKey>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl FindQuery {
    pub fn filtered(filters: Vec<Filter>) -> Self {
        FindQuery {
            filters,
            ..FindQuery::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_fields_only_satisfy_ne() {
        let doc = json!({ "name": "The Forest Hiker" });
        let secret = Field::boolean("secretTour");
        assert!(Filter::ne(secret, true).matches(&doc));
        assert!(!Filter::eq(secret, true).matches(&doc));
        assert!(!Filter::gte(Field::number("price"), 0.0).matches(&doc));
    }

    #[test]
    fn list_fields_match_any_element() {
        let doc = json!({ "guides": ["a", "b"] });
        let guides = Field::id("guides").list();
        assert!(Filter::eq(guides, "b").matches(&doc));
        assert!(!Filter::ne(guides, "b").matches(&doc));
        assert!(Filter::ne(guides, "c").matches(&doc));
        assert!(Filter::is_in(guides, ["x", "a"]).matches(&doc));
    }

    #[test]
    fn comparisons_use_the_field_kind() {
        let doc = json!({ "price": 497, "createdAt": "2024-03-01T10:00:00Z" });
        assert!(Filter::gte(Field::number("price"), 497.0).matches(&doc));
        assert!(!Filter::gt(Field::number("price"), 497.0).matches(&doc));

        let cutoff = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(Filter::gt(Field::time("createdAt"), cutoff).matches(&doc));
    }

    #[test]
    fn sort_puts_missing_values_last() {
        let key = SortKey::desc(Field::number("price"));
        let cheap = json!({ "price": 10 });
        let dear = json!({ "price": 20 });
        let unknown = json!({});
        assert_eq!(key.compare(&dear, &cheap), Ordering::Less);
        assert_eq!(key.compare(&unknown, &cheap), Ordering::Greater);
        assert_eq!(SortKey::asc(key.field).compare(&unknown, &cheap), Ordering::Greater);
    }
}
