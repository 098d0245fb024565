//! Prepared statement handles
//!
//! A [`Statement`] owns one native `sqlite3_stmt*` and tracks
//! `Prepared -> Stepping -> Done -> Finalized`. Column values can only be read
//! while a row is current; metadata (names, declared types) is available in
//! every state except `Finalized`.

use std::fmt;
use std::os::raw::c_int;
use std::ptr::NonNull;

use sqlbind_ffi_common::{decode_blob, decode_text, encode_blob, encode_text};
use tracing::debug;

use crate::call::Marshaller;
use crate::connection::Connection;
use crate::error::{Result, StateError};
use crate::native::{RawConnection, RawStatement};
use crate::types::{ColumnType, StepResult, Value, TRANSIENT};

/// Lifecycle state of a [`Statement`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementState {
    /// Compiled, not yet stepped (or reset)
    Prepared,
    /// The last step produced a row
    Stepping,
    /// The last step completed the statement or failed
    Done,
    Finalized,
}

/// Address of a live native statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StatementHandle(NonNull<RawStatement>);

/// A compiled SQL statement bound to the connection that prepared it
pub struct Statement<'conn> {
    conn: &'conn Connection,
    db: NonNull<RawConnection>,
    handle: Option<StatementHandle>,
    state: StatementState,
    sql: String,
}

impl<'conn> Statement<'conn> {
    pub(crate) fn new(
        conn: &'conn Connection,
        db: NonNull<RawConnection>,
        stmt: NonNull<RawStatement>,
        sql: &str,
    ) -> Self {
        Self {
            conn,
            db,
            handle: Some(StatementHandle(stmt)),
            state: StatementState::Prepared,
            sql: sql.to_string(),
        }
    }

    fn live(&self) -> Result<(Marshaller<'static>, *mut RawStatement)> {
        let handle = self.handle.ok_or(StateError::Finalized)?;
        Ok((Marshaller::scoped(self.conn.api(), self.db), handle.0.as_ptr()))
    }

    /// Live handle plus a range check of `index`.
    fn column(&self, index: i32) -> Result<(Marshaller<'static>, *mut RawStatement)> {
        let (call, stmt) = self.live()?;
        let count = call.raw("sqlite3_column_count", |api| unsafe { (api.column_count)(stmt) });
        if index < 0 || index >= count {
            return Err(StateError::ColumnOutOfRange { index, count }.into());
        }
        Ok((call, stmt))
    }

    /// Like [`Statement::column`], and a row must be current.
    fn row_column(&self, index: i32) -> Result<(Marshaller<'static>, *mut RawStatement)> {
        if self.handle.is_some() && self.state != StatementState::Stepping {
            return Err(StateError::NoCurrentRow.into());
        }
        self.column(index)
    }

    /// Advance to the next row.
    ///
    /// On error the statement is considered `Done`; [`Statement::reset`] makes
    /// it runnable again.
    pub fn step(&mut self) -> Result<StepResult> {
        let (call, stmt) = self.live()?;
        let result = call.stepped("sqlite3_step", |api| unsafe { (api.step)(stmt) });
        self.state = match result {
            Ok(StepResult::Row) => StatementState::Stepping,
            Ok(StepResult::Done) | Err(_) => StatementState::Done,
        };
        result
    }

    /// Rewind to before the first row. Bindings are kept.
    ///
    /// The statement is `Prepared` afterwards even if the library relays the
    /// error of the previous step.
    pub fn reset(&mut self) -> Result<()> {
        let (call, stmt) = self.live()?;
        let result = call.checked("sqlite3_reset", |api| unsafe { (api.reset)(stmt) });
        self.state = StatementState::Prepared;
        result
    }

    /// Set every parameter back to NULL.
    pub fn clear_bindings(&mut self) -> Result<()> {
        let (call, stmt) = self.live()?;
        call.checked("sqlite3_clear_bindings", |api| unsafe { (api.clear_bindings)(stmt) })
    }

    /// Release the native statement.
    ///
    /// The native object is gone afterwards even if an error is returned (the
    /// library reports the error of the last failed step here). Finalizing
    /// twice fails with [`StateError::Finalized`].
    pub fn finalize(&mut self) -> Result<()> {
        let (call, stmt) = self.live()?;
        self.handle = None;
        self.state = StatementState::Finalized;
        debug!("Finalizing statement: {}", self.sql);
        call.checked("sqlite3_finalize", |api| unsafe { (api.finalize)(stmt) })
    }

    pub fn bind_null(&mut self, index: i32) -> Result<()> {
        let (call, stmt) = self.live()?;
        call.checked("sqlite3_bind_null", |api| unsafe { (api.bind_null)(stmt, index) })
    }

    pub fn bind_int(&mut self, index: i32, value: i32) -> Result<()> {
        let (call, stmt) = self.live()?;
        call.checked("sqlite3_bind_int", |api| unsafe { (api.bind_int)(stmt, index, value) })
    }

    pub fn bind_int64(&mut self, index: i32, value: i64) -> Result<()> {
        let (call, stmt) = self.live()?;
        call.checked("sqlite3_bind_int64", |api| unsafe {
            (api.bind_int64)(stmt, index, value)
        })
    }

    pub fn bind_double(&mut self, index: i32, value: f64) -> Result<()> {
        let (call, stmt) = self.live()?;
        call.checked("sqlite3_bind_double", |api| unsafe {
            (api.bind_double)(stmt, index, value)
        })
    }

    /// Bind UTF-8 text. The library copies the bytes; an empty string binds
    /// an empty text value, not NULL.
    pub fn bind_text(&mut self, index: i32, value: &str) -> Result<()> {
        let (call, stmt) = self.live()?;
        let buf = encode_text(value)?;
        call.checked("sqlite3_bind_text", |api| unsafe {
            (api.bind_text)(stmt, index, buf.as_char_ptr(), buf.len(), TRANSIENT)
        })
    }

    /// Bind a byte sequence. The library copies the bytes; an empty slice binds
    /// a zero-length blob, not NULL.
    pub fn bind_blob(&mut self, index: i32, value: &[u8]) -> Result<()> {
        let (call, stmt) = self.live()?;
        let buf = encode_blob(value)?;
        call.checked("sqlite3_bind_blob", |api| unsafe {
            (api.bind_blob)(stmt, index, buf.as_void_ptr(), buf.len(), TRANSIENT)
        })
    }

    pub fn bind_value(&mut self, index: i32, value: &Value) -> Result<()> {
        match value {
            Value::Null => self.bind_null(index),
            Value::Integer(v) => self.bind_int64(index, *v),
            Value::Real(v) => self.bind_double(index, *v),
            Value::Text(s) => self.bind_text(index, s),
            Value::Blob(b) => self.bind_blob(index, b),
        }
    }

    /// Largest parameter index in the statement.
    pub fn bind_parameter_count(&self) -> Result<i32> {
        let (call, stmt) = self.live()?;
        Ok(call.raw("sqlite3_bind_parameter_count", |api| unsafe {
            (api.bind_parameter_count)(stmt)
        }))
    }

    /// Number of columns in the result set (0 for statements returning no data).
    pub fn column_count(&self) -> Result<i32> {
        let (call, stmt) = self.live()?;
        Ok(call.raw("sqlite3_column_count", |api| unsafe { (api.column_count)(stmt) }))
    }

    pub fn column_name(&self, index: i32) -> Result<String> {
        let (call, stmt) = self.column(index)?;
        call.required_string("sqlite3_column_name", |api| unsafe {
            (api.column_name)(stmt, index)
        })
    }

    /// Originating table of a result column, `None` for expressions.
    pub fn column_table_name(&self, index: i32) -> Result<Option<String>> {
        let (call, stmt) = self.column(index)?;
        call.string("sqlite3_column_table_name", |api| unsafe {
            (api.column_table_name)(stmt, index)
        })
    }

    /// Declared type of a result column, `None` for expressions.
    pub fn column_decltype(&self, index: i32) -> Result<Option<String>> {
        let (call, stmt) = self.column(index)?;
        call.string("sqlite3_column_decltype", |api| unsafe {
            (api.column_decltype)(stmt, index)
        })
    }

    pub fn column_type(&self, index: i32) -> Result<ColumnType> {
        let (call, stmt) = self.row_column(index)?;
        Ok(Self::native_type(call, stmt, index))
    }

    fn native_type(call: Marshaller<'_>, stmt: *mut RawStatement, index: c_int) -> ColumnType {
        ColumnType::from_code(call.raw("sqlite3_column_type", |api| unsafe {
            (api.column_type)(stmt, index)
        }))
    }

    /// Column value as text, `None` for SQL NULL.
    pub fn column_text(&self, index: i32) -> Result<Option<String>> {
        let (call, stmt) = self.row_column(index)?;
        if Self::native_type(call, stmt, index) == ColumnType::Null {
            return Ok(None);
        }

        // Pointer first: the conversion to text determines the byte count.
        let ptr = call.raw("sqlite3_column_text", |api| unsafe { (api.column_text)(stmt, index) });
        let len = call.raw("sqlite3_column_bytes", |api| unsafe { (api.column_bytes)(stmt, index) });
        // SAFETY: valid for `len` bytes until the next step, reset or finalize.
        Ok(unsafe { decode_text(ptr, len) }?)
    }

    /// Column value as bytes, `None` for SQL NULL.
    pub fn column_blob(&self, index: i32) -> Result<Option<Vec<u8>>> {
        let (call, stmt) = self.row_column(index)?;
        if Self::native_type(call, stmt, index) == ColumnType::Null {
            return Ok(None);
        }

        let ptr = call.raw("sqlite3_column_blob", |api| unsafe { (api.column_blob)(stmt, index) });
        let len = call.raw("sqlite3_column_bytes", |api| unsafe { (api.column_bytes)(stmt, index) });
        // SAFETY: valid for `len` bytes until the next step, reset or finalize.
        Ok(unsafe { decode_blob(ptr.cast::<u8>(), len) })
    }

    pub fn column_double(&self, index: i32) -> Result<f64> {
        let (call, stmt) = self.row_column(index)?;
        Ok(call.raw("sqlite3_column_double", |api| unsafe {
            (api.column_double)(stmt, index)
        }))
    }

    pub fn column_int(&self, index: i32) -> Result<i32> {
        let (call, stmt) = self.row_column(index)?;
        Ok(call.raw("sqlite3_column_int", |api| unsafe { (api.column_int)(stmt, index) }))
    }

    pub fn column_int64(&self, index: i32) -> Result<i64> {
        let (call, stmt) = self.row_column(index)?;
        Ok(call.raw("sqlite3_column_int64", |api| unsafe {
            (api.column_int64)(stmt, index)
        }))
    }

    /// Size in bytes of the column value in its current representation.
    pub fn column_bytes(&self, index: i32) -> Result<i32> {
        let (call, stmt) = self.row_column(index)?;
        Ok(call.raw("sqlite3_column_bytes", |api| unsafe {
            (api.column_bytes)(stmt, index)
        }))
    }

    /// Column value in its native storage class.
    pub fn column_value(&self, index: i32) -> Result<Value> {
        let value = match self.column_type(index)? {
            ColumnType::Null => Value::Null,
            ColumnType::Integer => Value::Integer(self.column_int64(index)?),
            ColumnType::Float => Value::Real(self.column_double(index)?),
            ColumnType::Text => self.column_text(index)?.map_or(Value::Null, Value::Text),
            ColumnType::Blob => self.column_blob(index)?.map_or(Value::Null, Value::Blob),
        };
        Ok(value)
    }

    pub fn state(&self) -> StatementState {
        self.state
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    /// The native `sqlite3_stmt*`, until finalized.
    pub fn handle(&self) -> Option<NonNull<RawStatement>> {
        self.handle.map(|h| h.0)
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.finalize() {
                debug!("Finalize on drop reported: {}", e);
            }
        }
    }
}

impl fmt::Debug for Statement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql)
            .field("state", &self.state)
            .field("connection", &self.conn.id())
            .finish()
    }
}
