use crate::gateway::OperationKind;
use sqlparser::ast::Statement;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use tracing::debug;

/// Tags free-form SQL typed at the console as a read or a mutation.
///
/// Callers are responsible for tagging; the gateway only gates what it is
/// told. Text that parses to queries only is a `Read`; anything else that
/// parses is a `Mutate`. Text the parser rejects falls back to the leading
/// keyword. `CALL` always means a procedure invocation.
pub fn classify(sql: &str) -> OperationKind {
    if StatementType::from_sql(sql) == StatementType::Call {
        return OperationKind::Invoke;
    }
    match Parser::parse_sql(&SQLiteDialect {}, sql) {
        Ok(statements) if !statements.is_empty() => {
            if statements.iter().all(|s| matches!(s, Statement::Query(_))) {
                OperationKind::Read
            } else {
                OperationKind::Mutate
            }
        }
        Ok(_) => OperationKind::Read,
        Err(e) => {
            debug!(error = %e, "falling back to keyword classification");
            StatementType::from_sql(sql).operation_kind()
        }
    }
}

/// Represents different SQL statement types for introspection
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatementType {
    /// SELECT / WITH / VALUES
    Select,
    /// INSERT or REPLACE statement
    Insert,
    /// UPDATE statement
    Update,
    /// DELETE statement
    Delete,
    /// CREATE statement
    Create,
    /// DROP statement
    Drop,
    /// ALTER statement
    Alter,
    /// CALL statement
    Call,
    /// Other statement types
    Other,
}

impl StatementType {
    /// Determines the statement type from the leading keyword of a SQL string
    pub fn from_sql(sql: &str) -> Self {
        let keyword = sql
            .trim_start()
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or("")
            .to_uppercase();

        match keyword.as_str() {
            "SELECT" | "WITH" | "VALUES" => StatementType::Select,
            "INSERT" | "REPLACE" => StatementType::Insert,
            "UPDATE" => StatementType::Update,
            "DELETE" => StatementType::Delete,
            "CREATE" => StatementType::Create,
            "DROP" => StatementType::Drop,
            "ALTER" => StatementType::Alter,
            "CALL" => StatementType::Call,
            _ => StatementType::Other,
        }
    }

    /// Unknown statements are treated as mutations.
    pub fn operation_kind(self) -> OperationKind {
        match self {
            StatementType::Select => OperationKind::Read,
            StatementType::Call => OperationKind::Invoke,
            _ => OperationKind::Mutate,
        }
    }
}
