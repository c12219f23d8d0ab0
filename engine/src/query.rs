//! In-memory query evaluation.
//!
//! Stores hand a full collection scan (or an index-scoped scan) to
//! [`QueryOptions::apply`], which filters, sorts, and paginates in memory.
//! There is no query planner, which bounds the design to small and medium
//! collections.

use crate::schema::value_at;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Comparison applied by a [`Filter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operator", content = "value", rename_all = "lowercase")]
pub enum FilterOp {
    Equals(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    /// Inclusive range
    Between(Value, Value),
    In(Vec<Value>),
}

/// A predicate on one document field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Dot path of the field
    pub field: String,
    #[serde(flatten)]
    pub op: FilterOp,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp) -> Self {
        Self {
            field: field.into(),
            op,
        }
    }

    /// Whether a document satisfies this filter. A missing field never
    /// matches.
    pub fn matches(&self, document: &Value) -> bool {
        let Some(actual) = value_at(document, &self.field) else {
            return false;
        };

        match &self.op {
            FilterOp::Equals(expected) => loosely_equal(actual, expected),
            FilterOp::Gt(bound) => compare(actual, bound) == Some(Ordering::Greater),
            FilterOp::Gte(bound) => matches!(
                compare(actual, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt(bound) => compare(actual, bound) == Some(Ordering::Less),
            FilterOp::Lte(bound) => {
                matches!(compare(actual, bound), Some(Ordering::Less | Ordering::Equal))
            }
            FilterOp::Between(low, high) => {
                matches!(
                    compare(actual, low),
                    Some(Ordering::Greater | Ordering::Equal)
                ) && matches!(compare(actual, high), Some(Ordering::Less | Ordering::Equal))
            }
            FilterOp::In(candidates) => candidates.iter().any(|c| loosely_equal(actual, c)),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Sort specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Filtering, ordering, and pagination for a scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub order_by: Option<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter.
    pub fn filter(mut self, field: impl Into<String>, op: FilterOp) -> Self {
        self.filters.push(Filter::new(field, op));
        self
    }

    /// Shorthand for an equality filter.
    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Equals(value.into()))
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Whether a document passes every filter.
    pub fn matches(&self, document: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(document))
    }

    /// Filter, then sort (stable), then skip `offset` and keep `limit`.
    pub fn apply(&self, documents: Vec<Value>) -> Vec<Value> {
        let mut results: Vec<Value> = documents
            .into_iter()
            .filter(|doc| self.matches(doc))
            .collect();

        if let Some(order) = &self.order_by {
            results.sort_by(|a, b| {
                let ordering = sort_order(value_at(a, &order.field), value_at(b, &order.field));
                match order.direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                }
            });
        }

        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        results.into_iter().skip(offset).take(limit).collect()
    }
}

/// Partial comparison between two scalars of the same kind. Values of
/// different kinds (or non-scalars) are incomparable.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

fn kind_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

/// Total order used for sorting: missing < null < bool < number < string <
/// array < object, scalars compared by value.
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    kind_rank(a).cmp(&kind_rank(b)).then_with(|| match (a, b) {
        (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    })
}
