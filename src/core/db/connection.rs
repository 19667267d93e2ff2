/// Connection Management Module
///
/// This module defines what a gateway call needs to reach a database: the
/// per-call `ConnectionDescriptor`, the `Connector`/`Session` seam a driver
/// implements, the scoped guard that guarantees release, and the embedded
/// SQLite connector.

use super::function::FunctionCatalog;
use super::procedure::ProcedureCatalog;
use super::query::{QueryExecutor, TabularResult};
use super::value::Value;
use crate::core::GatewayError;
use chrono::Local;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OpenFlags};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default port recorded in descriptors when none is configured.
pub const DEFAULT_PORT: u16 = 3306;

const LOCAL_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

/// Everything needed to open one connection.
///
/// Supplied fresh by the caller on every gateway call. Only emptiness of the
/// host and database name is checked up front; everything else is discovered
/// at connect time.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    pub database: String,
}

impl ConnectionDescriptor {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        secret: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        ConnectionDescriptor {
            host: host.into(),
            port,
            username: username.into(),
            secret: secret.into(),
            database: database.into(),
        }
    }

    /// Rejects descriptors with an empty host or database name.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.host.trim().is_empty() {
            return Err(GatewayError::ConnectionFailed("no host given".to_string()));
        }
        if self.database.trim().is_empty() {
            return Err(GatewayError::ConnectionFailed("no database selected".to_string()));
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// An open connection, able to run exactly the operations the gateway needs.
pub trait Session {
    /// Runs a statement and fetches all of its rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<TabularResult, GatewayError>;

    /// Runs a statement for its effect, returning the number of changed rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize, GatewayError>;

    /// Invokes a stored procedure and returns its result sets in order.
    fn call(&mut self, procedure: &str, params: &[Value]) -> Result<Vec<TabularResult>, GatewayError>;

    /// Makes the work done so far durable.
    fn commit(&mut self) -> Result<(), GatewayError>;

    /// Closes the connection. Uncommitted work is discarded.
    fn close(self) -> Result<(), GatewayError>
    where
        Self: Sized;
}

/// Opens sessions from descriptors.
pub trait Connector: Send + Sync {
    type Session: Session;

    fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<Self::Session, GatewayError>;
}

/// Owns a session for the duration of one call and closes it on every exit path.
///
/// `release` closes explicitly; if the guard is dropped first (early return,
/// unwinding) the session is closed from `Drop`.
pub struct ScopedSession<S: Session> {
    inner: Option<S>,
}

impl<S: Session> ScopedSession<S> {
    pub fn new(session: S) -> Self {
        ScopedSession {
            inner: Some(session),
        }
    }

    /// Returns the guarded session.
    ///
    /// # Errors
    ///
    /// `ConnectionFailed` if the session was already released.
    pub fn session(&mut self) -> Result<&mut S, GatewayError> {
        self.inner
            .as_mut()
            .ok_or_else(|| GatewayError::ConnectionFailed("connection already closed".to_string()))
    }

    /// Closes the session now.
    pub fn release(mut self) -> Result<(), GatewayError> {
        match self.inner.take() {
            Some(session) => session.close(),
            None => Ok(()),
        }
    }
}

impl<S: Session> Drop for ScopedSession<S> {
    fn drop(&mut self) {
        if let Some(session) = self.inner.take() {
            if let Err(e) = session.close() {
                warn!(error = %e, "failed to close connection");
            }
        }
    }
}

/// Connector for SQLite databases living under one data directory.
///
/// Emulates the parts of a database server the gateway relies on: only
/// local hosts are reachable, a database must already exist, optional
/// credentials are checked, stored procedures come from a
/// `ProcedureCatalog` and stored functions from a `FunctionCatalog`.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    data_dir: PathBuf,
    allowed_hosts: Vec<String>,
    credentials: Option<(String, String)>,
    busy_timeout: Duration,
    procedures: Arc<ProcedureCatalog>,
    functions: Arc<FunctionCatalog>,
}

impl SqliteConnector {
    /// Creates a connector for databases stored as `<data_dir>/<name>.db`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        SqliteConnector {
            data_dir: data_dir.into(),
            allowed_hosts: Vec::new(),
            credentials: None,
            busy_timeout: Duration::from_secs(5),
            procedures: Arc::new(ProcedureCatalog::new()),
            functions: Arc::new(FunctionCatalog::new()),
        }
    }

    /// Treats `host` as local in addition to the loopback names.
    pub fn with_allowed_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.push(host.into());
        self
    }

    /// Requires every descriptor to carry these credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, secret: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), secret.into()));
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_procedures(mut self, procedures: ProcedureCatalog) -> Self {
        self.procedures = Arc::new(procedures);
        self
    }

    pub fn procedures(&self) -> &ProcedureCatalog {
        &self.procedures
    }

    pub fn with_functions(mut self, functions: FunctionCatalog) -> Self {
        self.functions = Arc::new(functions);
        self
    }

    pub fn functions(&self) -> &FunctionCatalog {
        &self.functions
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// File backing the database called `name`.
    pub fn database_path(&self, name: &str) -> Result<PathBuf, GatewayError> {
        let name = name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(GatewayError::ConnectionFailed(format!("unknown database '{}'", name)));
        }
        Ok(self.data_dir.join(format!("{}.db", name)))
    }

    fn is_reachable(&self, host: &str) -> bool {
        let host = host.trim();
        LOCAL_HOSTS
            .iter()
            .copied()
            .chain(self.allowed_hosts.iter().map(String::as_str))
            .any(|known| known.eq_ignore_ascii_case(host))
    }

    fn check_credentials(&self, descriptor: &ConnectionDescriptor) -> Result<(), GatewayError> {
        match &self.credentials {
            Some((user, secret)) if descriptor.username != *user || descriptor.secret != *secret => {
                Err(GatewayError::ConnectionFailed(format!(
                    "access denied for user '{}'@'{}'",
                    descriptor.username, descriptor.host
                )))
            }
            _ => Ok(()),
        }
    }
}

impl Connector for SqliteConnector {
    type Session = SqliteSession;

    fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<SqliteSession, GatewayError> {
        descriptor.validate()?;

        if !self.is_reachable(&descriptor.host) {
            return Err(GatewayError::ConnectionFailed(format!(
                "can't connect to server on '{}' ({})",
                descriptor.host, descriptor.port
            )));
        }
        self.check_credentials(descriptor)?;

        let path = self.database_path(&descriptor.database)?;
        if !path.is_file() {
            return Err(GatewayError::ConnectionFailed(format!(
                "unknown database '{}'",
                descriptor.database
            )));
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(GatewayError::connection)?;
        prepare_connection(&conn, self.busy_timeout).map_err(GatewayError::connection)?;
        if !self.functions.is_empty() {
            let lookup = open_lookup(&path, self.busy_timeout).map_err(GatewayError::connection)?;
            self.functions.install(&conn, lookup).map_err(GatewayError::connection)?;
        }

        debug!(database = %descriptor.database, port = descriptor.port, "opened sqlite connection");
        Ok(SqliteSession {
            conn,
            procedures: Arc::clone(&self.procedures),
        })
    }
}

/// Per-connection setup: pragmas, busy timeout, MySQL-style date functions.
///
/// The `sqlite_master` read makes a file that is not a database fail here
/// rather than on the first statement.
fn prepare_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))?;
    register_date_functions(conn)
}

fn register_date_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function("CURDATE", 0, FunctionFlags::SQLITE_UTF8, |_ctx| {
        Ok(Local::now().format("%Y-%m-%d").to_string())
    })?;
    conn.create_scalar_function("NOW", 0, FunctionFlags::SQLITE_UTF8, |_ctx| {
        Ok(Local::now().format("%Y-%m-%d %H:%M:%S").to_string())
    })?;
    Ok(())
}

/// Read-only connection that stored function bodies run on.
fn open_lookup(path: &Path, busy_timeout: Duration) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)?;
    conn.busy_timeout(busy_timeout)?;
    register_date_functions(&conn)?;
    Ok(conn)
}

/// Creates an empty database file for `name` under the connector's data
/// directory and runs `schema` on it.
pub fn create_database(connector: &SqliteConnector, name: &str, schema: &str) -> Result<PathBuf, GatewayError> {
    let path = connector.database_path(name)?;
    std::fs::create_dir_all(connector.data_dir()).map_err(GatewayError::connection)?;
    let conn = Connection::open(&path).map_err(GatewayError::connection)?;
    conn.execute_batch(schema).map_err(GatewayError::execution)?;
    info!(database = name, path = %path.display(), "created database");
    Ok(path)
}

/// A live SQLite connection.
///
/// Runs with autocommit off: the first statement opens a transaction and
/// only `commit` makes changes durable. Closing without committing rolls
/// everything back.
pub struct SqliteSession {
    conn: Connection,
    procedures: Arc<ProcedureCatalog>,
}

impl SqliteSession {
    fn begin_if_needed(&self) -> Result<(), GatewayError> {
        if self.conn.is_autocommit() {
            self.conn
                .execute_batch("BEGIN")
                .map_err(GatewayError::execution)?;
        }
        Ok(())
    }
}

impl Session for SqliteSession {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<TabularResult, GatewayError> {
        self.begin_if_needed()?;
        QueryExecutor::new(&self.conn).query(sql, params)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize, GatewayError> {
        self.begin_if_needed()?;
        QueryExecutor::new(&self.conn).execute(sql, params)
    }

    fn call(&mut self, procedure: &str, params: &[Value]) -> Result<Vec<TabularResult>, GatewayError> {
        self.begin_if_needed()?;
        self.procedures.call(&self.conn, procedure, params)
    }

    fn commit(&mut self) -> Result<(), GatewayError> {
        if !self.conn.is_autocommit() {
            self.conn
                .execute_batch("COMMIT")
                .map_err(GatewayError::execution)?;
        }
        Ok(())
    }

    fn close(self) -> Result<(), GatewayError> {
        self.conn
            .close()
            .map_err(|(_, e)| GatewayError::connection(e))
    }
}
