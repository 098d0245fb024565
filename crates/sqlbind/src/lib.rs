//! Safe bindings to a native SQL engine over its C ABI
//!
//! This crate lets safe Rust call into a precompiled SQLite library and lets
//! the library call back into Rust, without memory corruption and without
//! losing error information at the boundary.
//!
//! # Features
//!
//! - One process-wide symbol table, resolved all-or-nothing from the bundled
//!   engine, the system library or an explicit shared object
//! - Connection and statement handles with enforced lifecycles
//! - Uniform result checking with the engine's own error messages
//! - Busy handlers and scalar SQL functions written as Rust closures
//! - UTF-8 text and blobs of any content, including empty and NUL bytes
//!
//! # Example: Basic Usage
//!
//! ```rust,no_run
//! use sqlbind::{Connection, StepResult};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! sqlbind::init_tracing();
//!
//! let mut conn = Connection::open_in_memory()?;
//! conn.execute_batch("CREATE TABLE t(id INTEGER, name TEXT)")?;
//!
//! {
//!     let mut insert = conn.prepare("INSERT INTO t VALUES (?, ?)")?;
//!     insert.bind_int(1, 1)?;
//!     insert.bind_text(2, "héllo")?;
//!     insert.step()?;
//!     insert.finalize()?;
//!
//!     let mut select = conn.prepare("SELECT name FROM t WHERE id = 1")?;
//!     assert_eq!(select.step()?, StepResult::Row);
//!     assert_eq!(select.column_text(0)?.as_deref(), Some("héllo"));
//!     assert_eq!(select.step()?, StepResult::Done);
//!     select.finalize()?;
//! }
//!
//! // Statements borrow the connection and must be out of scope here.
//! conn.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Example: User Functions
//!
//! ```rust,no_run
//! use sqlbind::{CallbackError, Connection, Value};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = Connection::open_in_memory()?;
//! conn.register_function("shout", 1, |args| match &args[0] {
//!     Value::Text(s) => Ok(Value::Text(s.to_uppercase())),
//!     _ => Err(CallbackError::new("shout() expects text")),
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! # Example: Loading the System Library
//!
//! ```rust,no_run
//! use sqlbind::BindingConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BindingConfig::from_json(r#"{ "library": { "kind": "system" } }"#)?;
//! config.install()?;
//! # Ok(())
//! # }
//! ```

mod call;
pub mod callback;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod native;
pub mod statement;
pub mod types;

// Re-export main types
pub use callback::FunctionResult;
pub use config::{BindingConfig, LibrarySource, OpenOptions};
pub use connection::{Connection, ConnectionId, ConnectionState, InterruptHandle};
pub use error::{BindError, CallbackError, EngineError, InfrastructureError, Result, StateError};
pub use native::NativeBinding;
pub use statement::{Statement, StatementState};
pub use types::{codes, ColumnType, FunctionFlags, Limit, OpenFlags, ResultCode, StepResult, Value};

// Shared FFI utilities
pub use sqlbind_ffi_common::CodecError;

/// Install the default `tracing` subscriber (see [`logging::init`]).
pub fn init_tracing() {
    logging::init();
}
