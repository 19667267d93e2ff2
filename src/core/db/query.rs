/// Query Execution Module
///
/// This module executes single statements with bound parameters and shapes
/// what comes back into a `TabularResult`.

use super::value::Value;
use crate::core::GatewayError;
use rusqlite::{Connection, Statement};
use serde::Serialize;

/// Normalized result of any gateway operation.
///
/// Once `columns` is non-empty every row carries exactly `columns.len()`
/// values. An empty result may have no columns at all when the statement
/// never produced a result set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TabularResult {
    /// Column names from the result metadata
    pub columns: Vec<String>,
    /// Rows in driver order
    pub rows: Vec<Vec<Value>>,
}

impl TabularResult {
    /// Creates a new TabularResult from column names and row data
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        TabularResult { columns, rows }
    }

    /// The result of a statement that produces nothing (mutations, empty procedures).
    pub fn empty() -> Self {
        TabularResult::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Folds the result sets of one procedure call into a single table.
    ///
    /// Rows are concatenated in the order the sets were produced and the
    /// column names come from the last set. Zero sets give an empty result.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ExecutionFailed` when a row does not match the
    /// width of the last set's columns.
    pub fn from_result_sets(sets: Vec<TabularResult>) -> Result<Self, GatewayError> {
        let mut columns = Vec::new();
        let mut rows = Vec::new();
        for set in sets {
            rows.extend(set.rows);
            columns = set.columns;
        }

        if let Some(bad) = rows.iter().find(|row| row.len() != columns.len()) {
            return Err(GatewayError::ExecutionFailed(format!(
                "result sets have mismatched shapes: {} columns in the last set, a row with {} values",
                columns.len(),
                bad.len()
            )));
        }

        Ok(TabularResult { columns, rows })
    }
}

/// Statement execution service that operates on a database connection
pub struct QueryExecutor<'a> {
    connection: &'a Connection,
}

impl<'a> QueryExecutor<'a> {
    /// Creates a new QueryExecutor for the given connection
    pub fn new(connection: &'a Connection) -> Self {
        QueryExecutor { connection }
    }

    /// Executes a statement and fetches every row it yields.
    ///
    /// Statements that yield no result set at all come back as an empty
    /// result with no columns.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ExecutionFailed` if the statement cannot be
    /// prepared, the parameter count does not match, or stepping fails.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<TabularResult, GatewayError> {
        let mut stmt = self.prepare(sql)?;
        check_arity(&stmt, params)?;
        bind_parameters(&mut stmt, params, &[])?;
        fetch_result_set(&mut stmt)
    }

    /// Executes a statement for its effect and returns the number of changed rows.
    ///
    /// Rows produced by the statement, if any, are stepped through and discarded.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize, GatewayError> {
        let mut stmt = self.prepare(sql)?;
        check_arity(&stmt, params)?;
        bind_parameters(&mut stmt, params, &[])?;
        execute_bound(&mut stmt)
    }

    /// Prepares a SQL statement for execution without running it
    pub fn prepare(&self, sql: &str) -> Result<Statement<'a>, GatewayError> {
        self.connection
            .prepare(sql)
            .map_err(|e| GatewayError::ExecutionFailed(format!("Failed to prepare statement: {}", e)))
    }
}

fn check_arity(stmt: &Statement<'_>, params: &[Value]) -> Result<(), GatewayError> {
    let expected = stmt.parameter_count();
    if expected != params.len() {
        return Err(GatewayError::ExecutionFailed(format!(
            "statement expects {} parameters, {} supplied",
            expected,
            params.len()
        )));
    }
    Ok(())
}

/// Binds `params` to every placeholder of `stmt`.
///
/// When `names` is non-empty, a named placeholder (`:name`, `@name`,
/// `$name`) takes the value at the position of its declared name and an
/// undeclared name is an error. Numbered and anonymous placeholders, and
/// every placeholder when `names` is empty, bind positionally by index.
pub(crate) fn bind_parameters(
    stmt: &mut Statement<'_>,
    params: &[Value],
    names: &[String],
) -> Result<(), GatewayError> {
    let slots: Vec<(usize, Option<String>)> = (1..=stmt.parameter_count())
        .map(|index| (index, stmt.parameter_name(index).map(String::from)))
        .collect();

    for (index, name) in slots {
        let position = match name.as_deref() {
            Some(raw) if !names.is_empty() && !raw.starts_with('?') => names
                .iter()
                .position(|declared| declared.eq_ignore_ascii_case(&raw[1..]))
                .ok_or_else(|| GatewayError::ExecutionFailed(format!("unknown parameter {}", raw)))?,
            _ => index - 1,
        };
        let value = params.get(position).ok_or_else(|| {
            GatewayError::ExecutionFailed(format!(
                "no value supplied for parameter {}",
                name.unwrap_or_else(|| index.to_string())
            ))
        })?;
        stmt.raw_bind_parameter(index, value)
            .map_err(GatewayError::execution)?;
    }
    Ok(())
}

/// Steps an already-bound statement to completion and collects its rows.
pub(crate) fn fetch_result_set(stmt: &mut Statement<'_>) -> Result<TabularResult, GatewayError> {
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.raw_query();
    while let Some(row) = cursor.next().map_err(GatewayError::execution)? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(Value::from(row.get_ref(i).map_err(GatewayError::execution)?));
        }
        rows.push(values);
    }

    Ok(TabularResult::new(columns, rows))
}

/// Runs an already-bound statement for its effect.
pub(crate) fn execute_bound(stmt: &mut Statement<'_>) -> Result<usize, GatewayError> {
    if stmt.column_count() > 0 {
        let mut cursor = stmt.raw_query();
        while cursor.next().map_err(GatewayError::execution)?.is_some() {}
        return Ok(0);
    }
    stmt.raw_execute().map_err(GatewayError::execution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn setup_test_table(conn: &Connection) {
        conn.execute_batch(
            "
            CREATE TABLE Customer (
                Cust_Id INTEGER PRIMARY KEY,
                Name TEXT,
                City TEXT,
                Budget REAL
            );
            INSERT INTO Customer VALUES (1, 'Asha', 'Pune', 1500.5);
            INSERT INTO Customer VALUES (2, 'Ravi', 'Mumbai', NULL);
        ",
        )
        .unwrap();
    }

    #[test]
    fn test_query_with_bound_parameters() {
        let conn = Connection::open_in_memory().unwrap();
        setup_test_table(&conn);

        let executor = QueryExecutor::new(&conn);
        let result = executor
            .query("SELECT Cust_Id, Name FROM Customer WHERE City = ?", &[Value::from("Pune")])
            .unwrap();

        assert_eq!(result.columns, vec!["Cust_Id", "Name"]);
        assert_eq!(result.rows, vec![vec![Value::Integer(1), Value::from("Asha")]]);
    }

    #[test]
    fn test_zero_rows_keep_column_names() {
        let conn = Connection::open_in_memory().unwrap();
        setup_test_table(&conn);

        let result = QueryExecutor::new(&conn)
            .query("SELECT * FROM Customer WHERE City = ?1", &[Value::from("Delhi")])
            .unwrap();
        assert_eq!(result.row_count(), 0);
        assert_eq!(result.columns.len(), 4);
    }

    #[test]
    fn test_statement_without_result_set_passes_through() {
        let conn = Connection::open_in_memory().unwrap();
        setup_test_table(&conn);

        let result = QueryExecutor::new(&conn)
            .query("UPDATE Customer SET City = 'Goa' WHERE Cust_Id = 99", &[])
            .unwrap();
        assert_eq!(result, TabularResult::empty());
    }

    #[test]
    fn test_query_error_handling() {
        let conn = Connection::open_in_memory().unwrap();

        let result = QueryExecutor::new(&conn).query("SELECT * FROM nonexistent_table", &[]);
        match result.unwrap_err() {
            GatewayError::ExecutionFailed(msg) => assert!(msg.contains("no such table")),
            other => panic!("Expected ExecutionFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_parameter_count_mismatch() {
        let conn = Connection::open_in_memory().unwrap();
        setup_test_table(&conn);

        let executor = QueryExecutor::new(&conn);
        assert!(executor.query("SELECT * FROM Customer WHERE Cust_Id = ?", &[]).is_err());
        assert!(executor
            .execute("DELETE FROM Customer WHERE Cust_Id = ?", &[Value::Integer(1), Value::Integer(2)])
            .is_err());
    }

    #[test]
    fn test_execute_reports_changes() {
        let conn = Connection::open_in_memory().unwrap();
        setup_test_table(&conn);

        let changed = QueryExecutor::new(&conn)
            .execute("UPDATE Customer SET City = ? WHERE Cust_Id = ?", &[Value::from("Goa"), Value::Integer(2)])
            .unwrap();
        assert_eq!(changed, 1);

        let city: String = conn
            .query_row("SELECT City FROM Customer WHERE Cust_Id = 2", [], |row| row.get(0))
            .unwrap();
        assert_eq!(city, "Goa");
    }

    #[test]
    fn test_named_parameters_bind_by_declared_name() {
        let conn = Connection::open_in_memory().unwrap();
        setup_test_table(&conn);

        let mut stmt = conn
            .prepare("SELECT Name FROM Customer WHERE City = :city AND Cust_Id > :min_id")
            .unwrap();
        let names = vec!["min_id".to_string(), "city".to_string()];
        bind_parameters(&mut stmt, &[Value::Integer(0), Value::from("Mumbai")], &names).unwrap();
        let result = fetch_result_set(&mut stmt).unwrap();
        assert_eq!(result.rows, vec![vec![Value::from("Ravi")]]);
    }

    #[test]
    fn test_named_parameters_follow_declarations() {
        let conn = Connection::open_in_memory().unwrap();
        setup_test_table(&conn);

        let mut stmt = conn.prepare("SELECT Name FROM Customer WHERE City = :anything").unwrap();
        bind_parameters(&mut stmt, &[Value::from("Mumbai")], &[]).unwrap();
        assert_eq!(fetch_result_set(&mut stmt).unwrap().rows, vec![vec![Value::from("Ravi")]]);

        let mut stmt = conn.prepare("SELECT Name FROM Customer WHERE City = :cty").unwrap();
        let err = bind_parameters(&mut stmt, &[Value::from("Mumbai")], &["city".to_string()]).unwrap_err();
        assert_eq!(err, GatewayError::ExecutionFailed("unknown parameter :cty".to_string()));
    }

    #[test]
    fn test_result_sets_concatenate_with_last_columns() {
        let a = TabularResult::new(
            vec!["x".into()],
            vec![vec![Value::Integer(1)], vec![Value::Integer(2)]],
        );
        let b = TabularResult::new(vec!["y".into()], vec![vec![Value::Integer(3)]]);

        let merged = TabularResult::from_result_sets(vec![a, b]).unwrap();
        assert_eq!(merged.columns, vec!["y"]);
        assert_eq!(
            merged.rows,
            vec![vec![Value::Integer(1)], vec![Value::Integer(2)], vec![Value::Integer(3)]]
        );
    }

    #[test]
    fn test_no_result_sets_is_empty() {
        assert_eq!(TabularResult::from_result_sets(Vec::new()).unwrap(), TabularResult::empty());
    }

    #[test]
    fn test_mismatched_result_sets_fail() {
        let a = TabularResult::new(vec!["x".into(), "z".into()], vec![vec![Value::Integer(1), Value::Null]]);
        let b = TabularResult::new(vec!["y".into()], vec![vec![Value::Integer(3)]]);

        let err = TabularResult::from_result_sets(vec![a, b]).unwrap_err();
        assert!(matches!(err, GatewayError::ExecutionFailed(_)));
    }
}
