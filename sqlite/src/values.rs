//! Column values, result rows, and search conditions.
//!
//! [`Values`] is an ordered set of `column = value` pairs used for inserts
//! and updates. [`Record`] is one result row keyed by column name.
//! [`SearchCondition`] is a `WHERE` clause with its bound arguments; the
//! clause text uses `?` placeholders and argument values are never spliced
//! into the SQL.

use rusqlite::types::{FromSql, Value, ValueRef};

/// Ordered `column = value` pairs for an insert or update.
///
/// # Examples
///
/// ```
/// use tablekeeper_sqlite::Values;
///
/// let values = Values::new()
///     .with("title", "Dune".to_string())
///     .with("year", 1965_i64);
/// assert_eq!(values.columns(), vec!["title", "year"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    entries: Vec<(String, Value)>,
}

impl Values {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a column, replacing an earlier value for the same column.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.put(column, value);
        self
    }

    /// Sets a column, replacing an earlier value for the same column.
    pub fn put(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(name, _)| *name == column) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((column, value)),
        }
    }

    /// Value of a column, if set.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Column names in insertion order.
    pub fn columns(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, value)| value)
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no column is set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Record {
    pub(crate) fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Raw value of a column.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|name| name == column)
            .map(|idx| &self.values[idx])
    }

    /// Converts a column to `T`.
    ///
    /// # Errors
    ///
    /// Returns [`rusqlite::Error::InvalidColumnName`] for an unknown column
    /// and [`rusqlite::Error::FromSqlConversionFailure`] when the stored
    /// type does not convert.
    pub fn get<T: FromSql>(&self, column: &str) -> rusqlite::Result<T> {
        let idx = self
            .columns
            .iter()
            .position(|name| name == column)
            .ok_or_else(|| rusqlite::Error::InvalidColumnName(column.to_string()))?;
        let value = &self.values[idx];
        T::column_result(ValueRef::from(value)).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(idx, value.data_type(), Box::new(err))
        })
    }

    /// Column names in result order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` for a row without columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// `WHERE` clause with positional arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchCondition {
    clause: Option<String>,
    args: Vec<Value>,
}

impl SearchCondition {
    /// Condition matching every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// Condition from clause text with `?` placeholders and their values.
    pub fn new<I, V>(clause: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            clause: Some(clause.into()),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Condition `column = ?`.
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::new(format!("{} = ?", crate::schema::quote_identifier(column)), [value])
    }

    /// Clause text, `None` when matching every row.
    pub fn clause(&self) -> Option<&str> {
        self.clause.as_deref()
    }

    /// Bound arguments.
    pub fn args(&self) -> &[Value] {
        &self.args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_put_replaces_in_place() {
        let mut values = Values::new().with("a", 1_i64).with("b", 2_i64);
        values.put("a", 3_i64);
        assert_eq!(values.columns(), vec!["a", "b"]);
        assert_eq!(values.get("a"), Some(&Value::Integer(3)));
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_values_accept_options() {
        let values = Values::new().with("note", None::<String>);
        assert_eq!(values.get("note"), Some(&Value::Null));
    }

    #[test]
    fn test_record_typed_access() {
        let record = Record::new(
            vec!["id".to_string(), "title".to_string()],
            vec![Value::Integer(7), Value::Text("Solaris".to_string())],
        );
        assert_eq!(record.get::<i64>("id").unwrap(), 7);
        assert_eq!(record.get::<String>("title").unwrap(), "Solaris");
        assert!(matches!(
            record.get::<i64>("missing"),
            Err(rusqlite::Error::InvalidColumnName(_))
        ));
        assert!(matches!(
            record.get::<i64>("title"),
            Err(rusqlite::Error::FromSqlConversionFailure(1, _, _))
        ));
    }

    #[test]
    fn test_search_condition_eq_quotes_column() {
        let condition = SearchCondition::eq("id", 5_i64);
        assert_eq!(condition.clause(), Some("\"id\" = ?"));
        assert_eq!(condition.args(), &[Value::Integer(5)]);
        assert_eq!(SearchCondition::all().clause(), None);
    }
}
