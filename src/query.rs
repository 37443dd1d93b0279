use std::{fmt, marker::PhantomData};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{Result, TableStorageError};

/// Maximum page size accepted by the table service for `$top`.
pub const MAX_TAKE: u32 = 1000;

/// Comparison operator inside a filter condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
        }
    }
}

/// Boolean operator joining two filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

/// Typed literal on the right-hand side of a filter condition.
#[derive(Clone, Debug, PartialEq)]
pub enum EdmValue {
    String(String),
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Guid(String),
    DateTime(DateTime<Utc>),
}

impl fmt::Display for EdmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(value) => write!(f, "'{}'", value.replace('\'', "''")),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int32(value) => write!(f, "{value}"),
            Self::Int64(value) => write!(f, "{value}L"),
            Self::Double(value) => write!(f, "{value:?}"),
            Self::Guid(value) => write!(f, "guid'{value}'"),
            Self::DateTime(value) => write!(
                f,
                "datetime'{}'",
                value.to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
        }
    }
}

impl From<&str> for EdmValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for EdmValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for EdmValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for EdmValue {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<i64> for EdmValue {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<f64> for EdmValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<DateTime<Utc>> for EdmValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value)
    }
}

/// Builds `{property} {op} {literal}`.
pub fn condition(property: &str, op: CompareOp, value: impl Into<EdmValue>) -> String {
    format!("{property} {} {}", op.as_str(), value.into())
}

/// Joins two filters, parenthesizing both sides.
pub fn combine(left: &str, op: LogicalOp, right: &str) -> String {
    format!("({left}) {} ({right})", op.as_str())
}

/// Filter, projection and limit of a query; equal shapes send equal requests.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryShape {
    pub filter: Option<String>,
    pub select: Vec<String>,
    pub take: Option<u32>,
}

/// Entity query against a single table.
///
/// `T` is the entity type rows are decoded into once the query completes.
pub struct TableQuery<T> {
    filter: Option<String>,
    select: Vec<String>,
    take: Option<u32>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> TableQuery<T> {
    /// Query returning every entity of the table.
    pub fn new() -> Self {
        Self {
            filter: None,
            select: Vec::new(),
            take: None,
            _entity: PhantomData,
        }
    }

    /// Sets the OData `$filter` expression.
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Restricts the returned properties.
    pub fn select<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = properties.into_iter().map(Into::into).collect();
        self
    }

    /// Caps the total number of returned entities.
    pub fn take(mut self, count: u32) -> Self {
        self.take = Some(count);
        self
    }

    /// The `$filter` expression, if any.
    pub fn filter_expr(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// Projected property names; empty means all properties.
    pub fn selected(&self) -> &[String] {
        &self.select
    }

    /// Cap on returned entities, if any.
    pub fn take_count(&self) -> Option<u32> {
        self.take
    }

    /// Checks the query is something the service can run.
    pub fn validate(&self) -> Result<()> {
        if let Some(take) = self.take {
            if take == 0 || take > MAX_TAKE {
                return Err(TableStorageError::invalid_argument(format!(
                    "take must be between 1 and {MAX_TAKE}, got {take}"
                )));
            }
        }
        if self.filter.as_deref().is_some_and(|filter| filter.trim().is_empty()) {
            return Err(TableStorageError::invalid_argument("filter must not be blank"));
        }
        if self.select.iter().any(|property| property.trim().is_empty()) {
            return Err(TableStorageError::invalid_argument(
                "select must not contain blank property names",
            ));
        }
        Ok(())
    }

    /// What the query asks the service for, independent of `T`.
    pub fn shape(&self) -> QueryShape {
        QueryShape {
            filter: self.filter.clone(),
            select: self.select.clone(),
            take: self.take,
        }
    }

    pub(crate) fn erase(&self) -> TableQuery<serde_json::Value> {
        TableQuery {
            filter: self.filter.clone(),
            select: self.select.clone(),
            take: self.take,
            _entity: PhantomData,
        }
    }
}

impl<T> Default for TableQuery<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for TableQuery<T> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            select: self.select.clone(),
            take: self.take,
            _entity: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TableQuery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableQuery")
            .field("filter", &self.filter)
            .field("select", &self.select)
            .field("take", &self.take)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{combine, condition, CompareOp, EdmValue, LogicalOp, QueryShape, TableQuery};
    use crate::{DynamicEntity, TableStorageError};

    #[test]
    fn formats_literals() {
        assert_eq!(EdmValue::from("O'Brien").to_string(), "'O''Brien'");
        assert_eq!(EdmValue::from(true).to_string(), "true");
        assert_eq!(EdmValue::from(42).to_string(), "42");
        assert_eq!(EdmValue::from(42i64).to_string(), "42L");
        assert_eq!(EdmValue::from(1.0).to_string(), "1.0");
        assert_eq!(
            EdmValue::Guid("c9da6455-213d-42c9-9a79-3e9149a57833".to_owned()).to_string(),
            "guid'c9da6455-213d-42c9-9a79-3e9149a57833'"
        );
        let at = Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            EdmValue::from(at).to_string(),
            "datetime'2023-01-02T03:04:05.000Z'"
        );
    }

    #[test]
    fn builds_combined_filters() {
        let filter = combine(
            &condition("PartitionKey", CompareOp::Eq, "sales"),
            LogicalOp::And,
            &condition("Amount", CompareOp::Ge, 100),
        );
        assert_eq!(filter, "(PartitionKey eq 'sales') and (Amount ge 100)");
    }

    #[test]
    fn shape_tracks_filter_select_and_take() {
        let a = TableQuery::<serde_json::Value>::new()
            .filter("PartitionKey eq 'a'")
            .take(5);
        let b = TableQuery::<DynamicEntity>::new()
            .filter("PartitionKey eq 'a'")
            .take(5);
        let c = TableQuery::<serde_json::Value>::new().filter("PartitionKey eq 'b'");

        assert_eq!(a.shape(), b.shape());
        assert_ne!(a.shape(), c.shape());
        assert_eq!(
            c.shape(),
            QueryShape {
                filter: Some("PartitionKey eq 'b'".to_owned()),
                select: Vec::new(),
                take: None,
            }
        );
    }

    #[test]
    fn separator_characters_do_not_merge_shapes() {
        let in_filter = TableQuery::<serde_json::Value>::new()
            .filter("a;select=b")
            .select(["c"]);
        let in_select = TableQuery::<serde_json::Value>::new()
            .filter("a")
            .select(["b;select=c"]);
        let split_select = TableQuery::<serde_json::Value>::new().select(["a,b"]);
        let two_select = TableQuery::<serde_json::Value>::new().select(["a", "b"]);

        assert!(in_filter.validate().is_ok() && in_select.validate().is_ok());
        assert_ne!(in_filter.shape(), in_select.shape());
        assert_ne!(split_select.shape(), two_select.shape());
    }

    #[test]
    fn validate_rejects_out_of_range_take_and_blank_parts() {
        let invalid = [
            TableQuery::<serde_json::Value>::new().take(0),
            TableQuery::<serde_json::Value>::new().take(1001),
            TableQuery::<serde_json::Value>::new().filter("  "),
            TableQuery::<serde_json::Value>::new().select(["Name", ""]),
        ];
        for query in invalid {
            assert!(matches!(
                query.validate(),
                Err(TableStorageError::InvalidArgument(_))
            ));
        }
        assert!(TableQuery::<serde_json::Value>::new()
            .take(1000)
            .select(["Name"])
            .validate()
            .is_ok());
    }
}
