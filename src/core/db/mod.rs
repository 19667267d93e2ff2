/// Database Module
///
/// This module provides the driver side of the gateway, organized into
/// focused submodules.
///
/// ## Architecture
///
/// - **Values** (`value.rs`): bind values and cell values shared by all operations
/// - **Connection Management** (`connection.rs`): descriptors, the `Connector`/`Session` seam, the SQLite connector
/// - **Query Execution** (`query.rs`): statement execution and the `TabularResult` shape
/// - **Procedures** (`procedure.rs`): the stored-procedure catalog the embedded driver executes
/// - **Functions** (`function.rs`): SQL-defined scalar functions registered on every connection
///
/// ## Error Handling
///
/// Everything in here reports failures as `GatewayError`, so the gateway can
/// pass them through without re-classifying.
pub mod connection;
pub mod function;
pub mod procedure;
pub mod query;
pub mod value;

pub use connection::*;
pub use function::*;
pub use procedure::*;
pub use query::*;
pub use value::*;
