/// Stored Procedure Module
///
/// SQLite has no stored procedures, so the embedded driver keeps its own
/// catalog: a procedure is a named, ordered list of statements with declared
/// parameters. Each statement that returns columns yields one result set.

use super::query::{bind_parameters, execute_bound, fetch_result_set, TabularResult};
use super::value::Value;
use crate::core::GatewayError;
use rusqlite::Connection;
use std::collections::HashMap;
use tracing::debug;

/// A named procedure known to the embedded driver.
#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    pub name: String,
    /// Parameter names, in call order
    pub params: Vec<String>,
    /// Body statements, run in order
    pub body: Vec<String>,
}

impl Procedure {
    pub fn new(name: impl Into<String>, params: Vec<String>, body: Vec<String>) -> Self {
        Procedure {
            name: name.into(),
            params,
            body,
        }
    }

    /// Runs the body on `conn` and returns every result set it produced.
    ///
    /// Statements that return columns produce a result set even when they
    /// match no rows; all others are executed for their effect.
    pub fn call(&self, conn: &Connection, args: &[Value]) -> Result<Vec<TabularResult>, GatewayError> {
        if args.len() != self.params.len() {
            return Err(GatewayError::ExecutionFailed(format!(
                "incorrect number of arguments for PROCEDURE {}; expected {}, got {}",
                self.name,
                self.params.len(),
                args.len()
            )));
        }

        let mut sets = Vec::new();
        for (step, sql) in self.body.iter().enumerate() {
            let mut stmt = conn.prepare(sql).map_err(|e| {
                GatewayError::ExecutionFailed(format!("{} step {}: {}", self.name, step + 1, e))
            })?;
            bind_parameters(&mut stmt, args, &self.params)?;

            if stmt.column_count() > 0 {
                sets.push(fetch_result_set(&mut stmt)?);
            } else {
                let changed = execute_bound(&mut stmt)?;
                debug!(procedure = %self.name, step = step + 1, changed, "procedure statement executed");
            }
        }
        Ok(sets)
    }
}

/// Procedures keyed by case-insensitive name.
#[derive(Debug, Clone, Default)]
pub struct ProcedureCatalog {
    procedures: HashMap<String, Procedure>,
}

impl ProcedureCatalog {
    pub fn new() -> Self {
        ProcedureCatalog::default()
    }

    /// Registers a procedure, replacing any earlier one with the same name.
    pub fn register(&mut self, procedure: Procedure) {
        self.procedures
            .insert(procedure.name.to_lowercase(), procedure);
    }

    pub fn get(&self, name: &str) -> Option<&Procedure> {
        self.procedures.get(&name.to_lowercase())
    }

    /// Procedure names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.procedures.values().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    /// Looks up `name` and runs it on `conn`.
    pub fn call(&self, conn: &Connection, name: &str, args: &[Value]) -> Result<Vec<TabularResult>, GatewayError> {
        let procedure = self
            .get(name)
            .ok_or_else(|| GatewayError::ExecutionFailed(format!("PROCEDURE {} does not exist", name)))?;
        procedure.call(conn, args)
    }
}

impl FromIterator<Procedure> for ProcedureCatalog {
    fn from_iter<I: IntoIterator<Item = Procedure>>(iter: I) -> Self {
        let mut catalog = ProcedureCatalog::new();
        for procedure in iter {
            catalog.register(procedure);
        }
        catalog
    }
}
