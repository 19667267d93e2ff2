// Core infrastructure modules
pub mod core;

// Gateway and the shell around it
pub mod auth;
pub mod config;
pub mod gateway;
pub mod repl;
pub mod results_grid;
pub mod sql;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::core::db::{ConnectionDescriptor, Connector, Session, SqliteConnector, TabularResult, Value};
pub use crate::core::GatewayError;
pub use crate::gateway::{Gateway, Operation, OperationKind, Role};
