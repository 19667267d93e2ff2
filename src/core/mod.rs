/// Core Module for marketgate
///
/// This module contains the database plumbing and the shared error types
/// that the gateway and the console are built on.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{ConsoleError, GatewayError, Result};
