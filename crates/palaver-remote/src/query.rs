//! Query model for the remote store.
//!
//! A [`Query`] names a [`Table`], an optional projection, a conjunction of
//! [`Filter`]s, an optional ordering and an optional limit. Rows travel as
//! JSON objects; typed decoding happens at the edges through
//! [`GatewayExt`](crate::GatewayExt).

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Remote tables. The names are part of the wire boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Users,
    Conversations,
    Labels,
    Messages,
    ConversationLabels,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Users,
        Table::Conversations,
        Table::Labels,
        Table::Messages,
        Table::ConversationLabels,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Conversations => "conversations",
            Table::Labels => "labels",
            Table::Messages => "messages",
            Table::ConversationLabels => "conversation_labels",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single row predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = value`
    Eq(String, Value),
    /// `column <> value`
    Neq(String, Value),
    /// `column IN (values)`
    In(String, Vec<Value>),
    /// Array column contains every one of `values`.
    Contains(String, Vec<Value>),
    /// Array column does not contain all of `values`.
    NotContains(String, Vec<Value>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(column.to_string(), value.into())
    }

    pub fn neq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Neq(column.to_string(), value.into())
    }

    pub fn is_in<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(column.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn contains<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::Contains(column.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn not_contains<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::NotContains(column.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(c, _)
            | Filter::Neq(c, _)
            | Filter::In(c, _)
            | Filter::Contains(c, _)
            | Filter::NotContains(c, _) => c,
        }
    }

    /// Evaluate the predicate against a JSON row. Missing columns read as
    /// `null`; a `null` array column behaves as an empty array.
    pub fn matches(&self, row: &Value) -> bool {
        let field = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Filter::Eq(_, v) => field == v,
            Filter::Neq(_, v) => field != v,
            Filter::In(_, vs) => vs.contains(field),
            Filter::Contains(_, vs) => contains_all(field, vs),
            Filter::NotContains(_, vs) => !contains_all(field, vs),
        }
    }
}

fn contains_all(field: &Value, needles: &[Value]) -> bool {
    let items = field.as_array().map(Vec::as_slice).unwrap_or(&[]);
    needles.iter().all(|needle| items.contains(needle))
}

/// Result ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A filtered read against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: Table,
    pub columns: Option<Vec<String>>,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    /// `select *` from `table`.
    pub fn table(table: Table) -> Self {
        Self {
            table,
            columns: None,
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    /// Restrict the returned columns.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(column, value))
    }

    pub fn neq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::neq(column, value))
    }

    pub fn is_in<V: Into<Value>>(self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.filter(Filter::is_in(column, values))
    }

    pub fn contains<V: Into<Value>>(
        self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filter(Filter::contains(column, values))
    }

    pub fn not_contains<V: Into<Value>>(
        self,
        column: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filter(Filter::not_contains(column, values))
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `row` satisfies every filter.
    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Evaluate the query over an in-memory row set: filter, order, limit,
    /// then project.
    pub fn apply<'a>(&self, rows: impl IntoIterator<Item = &'a Value>) -> Vec<Value> {
        let mut hits: Vec<&Value> = rows.into_iter().filter(|r| self.matches(r)).collect();

        if let Some(order) = &self.order {
            hits.sort_by(|a, b| {
                let ord = compare_values(
                    a.get(&order.column).unwrap_or(&Value::Null),
                    b.get(&order.column).unwrap_or(&Value::Null),
                );
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }

        if let Some(limit) = self.limit {
            hits.truncate(limit);
        }

        hits.into_iter().map(|row| self.project(row)).collect()
    }

    fn project(&self, row: &Value) -> Value {
        let (Some(columns), Some(object)) = (&self.columns, row.as_object()) else {
            return row.clone();
        };
        let projected: Map<String, Value> = columns
            .iter()
            .filter_map(|c| object.get(c).map(|v| (c.clone(), v.clone())))
            .collect();
        Value::Object(projected)
    }
}

/// Total order over JSON scalars used for sorting: nulls first, then
/// booleans, numbers and strings. Arrays and objects compare equal.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) | Value::Object(_) => 4,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
