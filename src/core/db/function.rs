/// Stored Function Module
///
/// Scalar functions defined in SQL, the counterpart of server-side stored
/// functions. A function is a single query with declared parameters; its
/// value is the first column of the first row, or NULL when the query
/// matches nothing. Functions are registered on every connection, so they
/// can be called from any statement, `Read` operations included.
///
/// Function bodies run on a separate read-only connection to the same
/// database. They see committed data only and cannot call other stored
/// functions.

use super::query::{bind_parameters, fetch_result_set};
use super::value::Value;
use crate::core::GatewayError;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A named scalar function known to the embedded driver.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFunction {
    pub name: String,
    /// Parameter names, in call order
    pub params: Vec<String>,
    pub body: String,
}

impl StoredFunction {
    pub fn new(name: impl Into<String>, params: Vec<String>, body: impl Into<String>) -> Self {
        StoredFunction {
            name: name.into(),
            params,
            body: body.into(),
        }
    }

    /// Runs the body on `conn` with `args` bound to the declared parameters.
    pub fn evaluate(&self, conn: &Connection, args: &[Value]) -> Result<Value, GatewayError> {
        let mut stmt = conn
            .prepare(&self.body)
            .map_err(|e| GatewayError::ExecutionFailed(format!("FUNCTION {}: {}", self.name, e)))?;
        bind_parameters(&mut stmt, args, &self.params)?;
        let result = fetch_result_set(&mut stmt)?;
        debug!(function = %self.name, rows = result.row_count(), "function evaluated");

        Ok(result
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .unwrap_or(Value::Null))
    }
}

/// Functions keyed by case-insensitive name.
#[derive(Debug, Clone, Default)]
pub struct FunctionCatalog {
    functions: HashMap<String, StoredFunction>,
}

impl FunctionCatalog {
    pub fn new() -> Self {
        FunctionCatalog::default()
    }

    /// Registers a function, replacing any earlier one with the same name.
    pub fn register(&mut self, function: StoredFunction) {
        self.functions.insert(function.name.to_lowercase(), function);
    }

    pub fn get(&self, name: &str) -> Option<&StoredFunction> {
        self.functions.get(&name.to_lowercase())
    }

    /// Function names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.values().map(|f| f.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Makes every function callable from SQL on `conn`.
    ///
    /// `lookup` is the connection the bodies run on. It is shared by all
    /// functions of `conn` and dropped with it.
    pub(crate) fn install(&self, conn: &Connection, lookup: Connection) -> rusqlite::Result<()> {
        let lookup = Arc::new(Mutex::new(lookup));
        for function in self.functions.values() {
            let arity = i32::try_from(function.params.len()).map_err(|_| {
                rusqlite::Error::UserFunctionError(format!("FUNCTION {} has too many parameters", function.name).into())
            })?;
            let name = function.name.clone();
            let function = function.clone();
            let lookup = Arc::clone(&lookup);

            conn.create_scalar_function(name.as_str(), arity, FunctionFlags::SQLITE_UTF8, move |ctx| {
                let args: Vec<Value> = (0..ctx.len()).map(|i| Value::from(ctx.get_raw(i))).collect();
                let lookup = lookup.lock().map_err(|_| {
                    rusqlite::Error::UserFunctionError(format!("FUNCTION {} is unavailable", function.name).into())
                })?;
                function
                    .evaluate(&lookup, &args)
                    .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))
            })?;
        }
        Ok(())
    }
}

impl FromIterator<StoredFunction> for FunctionCatalog {
    fn from_iter<I: IntoIterator<Item = StoredFunction>>(iter: I) -> Self {
        let mut catalog = FunctionCatalog::new();
        for function in iter {
            catalog.register(function);
        }
        catalog
    }
}
