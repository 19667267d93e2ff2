//! Data access gateway.
//!
//! One entry point, [`Gateway::execute`], turns a caller's operation into a
//! single database round trip: authorize, connect, run, commit where needed,
//! close. Nothing is kept between calls, and every failure comes back as a
//! [`GatewayError`].

use crate::core::db::{ConnectionDescriptor, Connector, ScopedSession, Session, TabularResult, Value};
use crate::core::GatewayError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, info, warn};

/// Who is calling. Decides whether mutating and procedure-invoking
/// operations are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[serde(alias = "admin")]
    Administrator,
    #[serde(alias = "readonly")]
    ReadOnly,
}

impl Role {
    /// Whether this role may run operations of `kind`.
    pub fn permits(self, kind: OperationKind) -> bool {
        match (self, kind) {
            (_, OperationKind::Read) => true,
            (Role::Administrator, _) => true,
            (Role::ReadOnly, OperationKind::Mutate | OperationKind::Invoke) => false,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Administrator => write!(f, "administrator"),
            Role::ReadOnly => write!(f, "read-only user"),
        }
    }
}

/// The three things a caller can ask for.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Read { statement: String, parameters: Vec<Value> },
    Mutate { statement: String, parameters: Vec<Value> },
    Invoke { procedure: String, parameters: Vec<Value> },
}

impl Operation {
    pub fn read(statement: impl Into<String>, parameters: Vec<Value>) -> Self {
        Operation::Read {
            statement: statement.into(),
            parameters,
        }
    }

    pub fn mutate(statement: impl Into<String>, parameters: Vec<Value>) -> Self {
        Operation::Mutate {
            statement: statement.into(),
            parameters,
        }
    }

    pub fn invoke(procedure: impl Into<String>, parameters: Vec<Value>) -> Self {
        Operation::Invoke {
            procedure: procedure.into(),
            parameters,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Read { .. } => OperationKind::Read,
            Operation::Mutate { .. } => OperationKind::Mutate,
            Operation::Invoke { .. } => OperationKind::Invoke,
        }
    }
}

/// Operation tag without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Mutate,
    Invoke,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Read => write!(f, "read"),
            OperationKind::Mutate => write!(f, "mutate"),
            OperationKind::Invoke => write!(f, "invoke procedures"),
        }
    }
}

/// Where a call currently is. Only used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallPhase {
    AuthorizationChecked,
    Connected,
    Executing,
    Succeeded,
    Failed,
    Closed,
}

/// Stateless mediator between callers and a database driver.
///
/// Safe to share across threads: each call owns its connection, role and
/// operation.
#[derive(Debug, Clone)]
pub struct Gateway<C: Connector> {
    connector: C,
}

impl<C: Connector> Gateway<C> {
    pub fn new(connector: C) -> Self {
        Gateway { connector }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Runs one operation on behalf of `role` against the database described by `descriptor`.
    ///
    /// Denied operations return before any connection is opened. Otherwise
    /// the connection opened here is closed before returning, whatever the
    /// outcome.
    ///
    /// # Errors
    ///
    /// - `AuthorizationDenied` when `role` may not run this kind of operation
    /// - `ConnectionFailed` when the database cannot be reached
    /// - `ExecutionFailed` when the statement, procedure, fetch or commit fails
    pub fn execute(
        &self,
        operation: &Operation,
        role: Role,
        descriptor: &ConnectionDescriptor,
    ) -> Result<TabularResult, GatewayError> {
        let kind = operation.kind();
        authorize(role, kind)?;
        debug!(phase = ?CallPhase::AuthorizationChecked, %role, ?kind);

        let mut guard = self.connect(descriptor)?;
        debug!(phase = ?CallPhase::Connected, database = %descriptor.database);

        debug!(phase = ?CallPhase::Executing, ?kind);
        let outcome = match guard.session() {
            Ok(session) => contain_panics(|| dispatch(session, operation), GatewayError::ExecutionFailed),
            Err(e) => Err(e),
        };
        match &outcome {
            Ok(result) => {
                debug!(phase = ?CallPhase::Succeeded, rows = result.row_count());
                info!(?kind, %role, rows = result.row_count(), "operation succeeded");
            }
            Err(e) => {
                debug!(phase = ?CallPhase::Failed);
                info!(?kind, %role, error = %e, "operation failed");
            }
        }

        release(guard);
        debug!(phase = ?CallPhase::Closed);
        outcome
    }

    /// Opens and closes a connection without running anything.
    pub fn ping(&self, descriptor: &ConnectionDescriptor) -> Result<(), GatewayError> {
        let guard = self.connect(descriptor)?;
        release(guard);
        info!(database = %descriptor.database, "connection check succeeded");
        Ok(())
    }

    /// A driver panic while connecting is reported as `ConnectionFailed`.
    fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<ScopedSession<C::Session>, GatewayError> {
        let session = contain_panics(|| self.connector.connect(descriptor), GatewayError::ConnectionFailed)?;
        Ok(ScopedSession::new(session))
    }
}

/// Closes the guarded session. Close failures, panics included, are only logged.
fn release<S: Session>(guard: ScopedSession<S>) {
    if let Err(e) = contain_panics(|| guard.release(), GatewayError::ConnectionFailed) {
        warn!(error = %e, "failed to close connection");
    }
}

/// The authorization gate. Reads are open to every role.
pub fn authorize(role: Role, kind: OperationKind) -> Result<(), GatewayError> {
    if role.permits(kind) {
        return Ok(());
    }
    warn!(%role, ?kind, "operation denied");
    Err(GatewayError::AuthorizationDenied { role, operation: kind })
}

fn dispatch<S: Session>(session: &mut S, operation: &Operation) -> Result<TabularResult, GatewayError> {
    match operation {
        Operation::Read { statement, parameters } => session.query(statement, parameters),
        Operation::Mutate { statement, parameters } => {
            let changed = session.execute(statement, parameters)?;
            session.commit()?;
            debug!(changed, "mutation committed");
            Ok(TabularResult::empty())
        }
        Operation::Invoke { procedure, parameters } => {
            let sets = session.call(procedure, parameters)?;
            debug!(procedure = %procedure, result_sets = sets.len(), "procedure returned");
            let result = TabularResult::from_result_sets(sets)?;
            session.commit()?;
            Ok(result)
        }
    }
}

/// Runs `f`, turning a panic inside the driver layer into the error built by `fault`.
fn contain_panics<T, F>(f: F, fault: fn(String) -> GatewayError) -> Result<T, GatewayError>
where
    F: FnOnce() -> Result<T, GatewayError>,
{
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown fault".to_string());
        Err(fault(format!("internal fault: {}", message)))
    })
}
