//! Pure filter evaluation over decoded documents.
//!
//! A [`Filter`] is a stateless predicate tree; evaluating it never
//! touches storage. The storage manager loads candidate documents and
//! asks the filter which ones qualify.

use foliodb_codec::Document;
use serde_json::Value;
use std::cmp::Ordering;

/// A predicate over one document.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Field equals the value.
    Eq(String, Value),
    /// Field differs from the value (a missing field differs).
    Ne(String, Value),
    /// Field is strictly greater than the value.
    Gt(String, Value),
    /// Field is greater than or equal to the value.
    Gte(String, Value),
    /// Field is strictly less than the value.
    Lt(String, Value),
    /// Field is less than or equal to the value.
    Lte(String, Value),
    /// Field equals one of the values.
    In(String, Vec<Value>),
    /// Field is a string starting with the prefix.
    StartsWith(String, String),
    /// Field is a string matching the compiled regex.
    Matches(String, regex::Regex),
    /// Every branch holds.
    And(Vec<Filter>),
    /// At least one branch holds.
    Or(Vec<Filter>),
    /// The inner filter does not hold.
    Not(Box<Filter>),
}

impl Filter {
    /// Convenience constructor for a field-equality filter.
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    /// Evaluates the filter against a document.
    ///
    /// Comparisons against a missing field are false, except `Ne`,
    /// where a missing field trivially differs.
    #[must_use]
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Self::Eq(field, value) => document.get(field) == Some(value),
            Self::Ne(field, value) => document.get(field) != Some(value),
            Self::Gt(field, value) => ordered(document.get(field), value, Ordering::is_gt),
            Self::Gte(field, value) => ordered(document.get(field), value, Ordering::is_ge),
            Self::Lt(field, value) => ordered(document.get(field), value, Ordering::is_lt),
            Self::Lte(field, value) => ordered(document.get(field), value, Ordering::is_le),
            Self::In(field, values) => document
                .get(field)
                .is_some_and(|v| values.contains(v)),
            Self::StartsWith(field, prefix) => document
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|s| s.starts_with(prefix.as_str())),
            Self::Matches(field, pattern) => document
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|s| pattern.is_match(s)),
            Self::And(branches) => branches.iter().all(|f| f.matches(document)),
            Self::Or(branches) => branches.iter().any(|f| f.matches(document)),
            Self::Not(inner) => !inner.matches(document),
        }
    }
}

fn ordered(actual: Option<&Value>, expected: &Value, accept: fn(Ordering) -> bool) -> bool {
    actual
        .and_then(|v| compare_values(v, expected))
        .is_some_and(accept)
}

/// Orders two JSON values of the same kind; mixed kinds do not compare.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Sort direction for find results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Smallest values first.
    #[default]
    Ascending,
    /// Largest values first.
    Descending,
}

/// Options shaping a `find` call.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Predicate documents must satisfy; `None` matches everything.
    pub filter: Option<Filter>,
    /// Maximum number of documents returned.
    pub limit: Option<usize>,
    /// Sort field and direction, applied before the limit.
    pub order_by: Option<(String, Order)>,
}

impl FindOptions {
    /// Creates options that match every document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Sets the result limit.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the sort field and direction.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, order: Order) -> Self {
        self.order_by = Some((field.into(), order));
        self
    }

    /// Applies filter, order, and limit to a loaded candidate set.
    #[must_use]
    pub fn apply(&self, documents: Vec<Document>) -> Vec<Document> {
        let mut selected: Vec<Document> = match &self.filter {
            Some(filter) => documents.into_iter().filter(|d| filter.matches(d)).collect(),
            None => documents,
        };

        if let Some((field, order)) = &self.order_by {
            selected.sort_by(|a, b| {
                let ordering = match (a.get(field), b.get(field)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    // Missing fields sort last regardless of direction.
                    (Some(_), None) => return Ordering::Less,
                    (None, Some(_)) => return Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                match order {
                    Order::Ascending => ordering,
                    Order::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}
