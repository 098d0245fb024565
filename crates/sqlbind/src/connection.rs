//! Connection handles
//!
//! A [`Connection`] owns one native `sqlite3*` and walks it through
//! `Unopened -> Open -> Closed`. Statements borrow the connection, so closing
//! (which takes `&mut self`) is only possible once every statement is gone.
//!
//! # Example
//!
//! ```rust,no_run
//! use sqlbind::{Connection, StepResult};
//!
//! # fn main() -> sqlbind::Result<()> {
//! let mut conn = Connection::open_in_memory()?;
//! conn.execute_batch("CREATE TABLE t(id INTEGER, name TEXT)")?;
//!
//! let mut insert = conn.prepare("INSERT INTO t VALUES (?, ?)")?;
//! insert.bind_int(1, 1)?;
//! insert.bind_text(2, "héllo")?;
//! assert_eq!(insert.step()?, StepResult::Done);
//! insert.finalize()?;
//! drop(insert);
//!
//! conn.close()?;
//! # Ok(())
//! # }
//! ```

use std::ffi::CStr;
use std::fmt;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sqlbind_ffi_common::{CodecError, NativeArena};
use tracing::{debug, warn};

use crate::call::Marshaller;
use crate::callback::{self, FunctionResult};
use crate::config::OpenOptions;
use crate::error::{InfrastructureError, Result, StateError};
use crate::native::{self, NativeApi, RawConnection, RawStatement};
use crate::statement::Statement;
use crate::types::{codes, FunctionFlags, Limit, OpenFlags, Value};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Connection`], used to key its callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// Encode as the `void*` context of a native callback.
    pub(crate) fn as_user_data(self) -> *mut c_void {
        self.0 as usize as *mut c_void
    }

    pub(crate) fn from_user_data(user_data: *mut c_void) -> Self {
        ConnectionId(user_data as usize as u64)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a [`Connection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unopened,
    Open,
    Closed,
}

/// Address of an open native connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConnectionHandle(NonNull<RawConnection>);

// SAFETY: the engine is built serialized (SQLITE_THREADSAFE=1), so a handle
// may be used from any thread.
unsafe impl Send for ConnectionHandle {}

/// A connection to a database through the native library
pub struct Connection {
    api: &'static NativeApi,
    id: ConnectionId,
    state: ConnectionState,
    handle: Option<ConnectionHandle>,
    interrupt: Arc<Mutex<Option<ConnectionHandle>>>,
    path: String,
}

// SAFETY: see `ConnectionHandle`. Not `Sync`: statements and callbacks assume
// one thread drives the connection at a time.
unsafe impl Send for Connection {}

impl Connection {
    /// Create an unopened connection, installing the default native binding
    /// if none is installed yet.
    pub fn new() -> Result<Self> {
        Ok(Self::with_api(native::binding()?.api()))
    }

    fn with_api(api: &'static NativeApi) -> Self {
        Self {
            api,
            id: ConnectionId::next(),
            state: ConnectionState::Unopened,
            handle: None,
            interrupt: Arc::new(Mutex::new(None)),
            path: String::new(),
        }
    }

    /// Create and open a connection in one step.
    pub fn connect(path: &str, flags: OpenFlags) -> Result<Self> {
        let mut conn = Self::new()?;
        conn.open(path, flags)?;
        Ok(conn)
    }

    /// Create and open a connection with the given options.
    pub fn connect_with_options(path: &str, options: &OpenOptions) -> Result<Self> {
        let mut conn = Self::new()?;
        conn.open_with_options(path, options)?;
        Ok(conn)
    }

    /// Open a private, temporary in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::connect(":memory:", OpenFlags::default())
    }

    pub fn open(&mut self, path: &str, flags: OpenFlags) -> Result<()> {
        self.open_with_options(path, &OpenOptions::with_flags(flags))
    }

    /// Open the database at `path`.
    ///
    /// If the library reports an error after allocating a connection object,
    /// or the busy timeout from `options` cannot be applied, that object is
    /// closed before the error is returned and the connection stays unopened.
    pub fn open_with_options(&mut self, path: &str, options: &OpenOptions) -> Result<()> {
        match self.state {
            ConnectionState::Unopened => {}
            ConnectionState::Open => {
                return Err(StateError::AlreadyOpen {
                    path: self.path.clone(),
                }
                .into())
            }
            ConnectionState::Closed => return Err(StateError::Closed.into()),
        }

        let api = self.api;
        let handle = NativeArena::scoped(|arena| -> Result<ConnectionHandle> {
            let filename = arena.alloc_cstr(path)?;
            let vfs = options
                .vfs
                .as_deref()
                .map(|name| arena.alloc_cstr(name))
                .transpose()?;
            let out: *mut *mut RawConnection = arena.alloc_out_ptr();

            let rc = Marshaller::detached(api).raw("sqlite3_open_v2", |api| unsafe {
                (api.open_v2)(
                    filename.as_ptr(),
                    out,
                    options.flags.bits(),
                    vfs.map_or(ptr::null(), CStr::as_ptr),
                )
            });
            // SAFETY: `out` points into the arena, which is still alive.
            let db = NonNull::new(unsafe { *out });

            if rc != codes::OK {
                let error = match db {
                    Some(db) => {
                        let call = Marshaller::scoped(api, db);
                        let error = call.engine_error("sqlite3_open_v2", rc);
                        call.raw("sqlite3_close_v2", |api| unsafe { (api.close_v2)(db.as_ptr()) });
                        error
                    }
                    None => Marshaller::detached(api).engine_error("sqlite3_open_v2", rc),
                };
                return Err(error.into());
            }

            db.map(ConnectionHandle).ok_or_else(|| {
                InfrastructureError::NullReturn {
                    operation: "sqlite3_open_v2",
                }
                .into()
            })
        })?;

        if let Some(ms) = options.busy_timeout_ms {
            let call = Marshaller::scoped(api, handle.0);
            let ms = c_int::try_from(ms).unwrap_or(c_int::MAX);
            let applied = call.checked("sqlite3_busy_timeout", |api| unsafe {
                (api.busy_timeout)(handle.0.as_ptr(), ms)
            });
            if let Err(e) = applied {
                call.raw("sqlite3_close_v2", |api| unsafe { (api.close_v2)(handle.0.as_ptr()) });
                return Err(e);
            }
        }

        self.handle = Some(handle);
        *self.interrupt.lock() = Some(handle);
        self.state = ConnectionState::Open;
        self.path = path.to_string();
        debug!("Opened connection {} to {}", self.id, path);
        Ok(())
    }

    /// Native handle and a marshaller scoped to it, if open.
    fn scoped(&self) -> Result<(Marshaller<'static>, NonNull<RawConnection>)> {
        match (self.state, self.handle) {
            (ConnectionState::Open, Some(handle)) => Ok((Marshaller::scoped(self.api, handle.0), handle.0)),
            (ConnectionState::Closed, _) => Err(StateError::Closed.into()),
            _ => Err(StateError::NotOpen.into()),
        }
    }

    /// Compile `sql` into a statement.
    ///
    /// Only the first statement of `sql` is compiled; the rest is ignored and
    /// [`Statement::sql`] returns the compiled part.
    pub fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
        let (call, db) = self.scoped()?;

        let (stmt, consumed) = NativeArena::scoped(|arena| -> Result<(*mut RawStatement, usize)> {
            let text = arena.alloc_cstr(sql)?;
            // Includes the terminator, which lets the library skip a copy.
            let n_byte = c_int::try_from(text.to_bytes_with_nul().len())
                .map_err(|_| CodecError::TooLarge { len: sql.len() })?;
            let out: *mut *mut RawStatement = arena.alloc_out_ptr();
            let tail: *mut *const c_char = arena.alloc_out_cstr();

            call.checked("sqlite3_prepare_v2", |api| unsafe {
                (api.prepare_v2)(db.as_ptr(), text.as_ptr(), n_byte, out, tail)
            })?;
            // SAFETY: both slots point into the arena, which is still alive;
            // the tail is null or points into `text`.
            let (stmt, tail) = unsafe { (*out, *tail) };
            let consumed = if tail.is_null() {
                sql.len()
            } else {
                let offset = unsafe { tail.offset_from(text.as_ptr()) };
                usize::try_from(offset).map_or(sql.len(), |n| n.min(sql.len()))
            };
            Ok((stmt, consumed))
        })?;

        let stmt = NonNull::new(stmt).ok_or(StateError::NoStatement)?;
        let (compiled, rest) = match (sql.get(..consumed), sql.get(consumed..)) {
            (Some(compiled), Some(rest)) => (compiled, rest),
            _ => (sql, ""),
        };
        if !rest.trim().is_empty() {
            debug!("Ignoring SQL after the first statement: {}", rest.trim());
        }
        debug!("Prepared statement on connection {}: {}", self.id, compiled);
        Ok(Statement::new(self, db, stmt, compiled))
    }

    /// Run one or more `;`-separated statements, discarding any rows.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let (call, db) = self.scoped()?;
        NativeArena::scoped(|arena| -> Result<()> {
            let text = arena.alloc_cstr(sql)?;
            call.checked("sqlite3_exec", |api| unsafe {
                (api.exec)(db.as_ptr(), text.as_ptr(), None, ptr::null_mut(), ptr::null_mut())
            })
        })
    }

    /// Close the connection.
    ///
    /// Releases every callback registered on it and disarms its interrupt
    /// handles. On failure the connection stays open.
    ///
    /// Every [`Statement`] of the connection must be dropped first; calling
    /// [`Statement::finalize`] alone does not end its borrow.
    ///
    /// ```compile_fail
    /// # fn main() -> sqlbind::Result<()> {
    /// let mut conn = sqlbind::Connection::open_in_memory()?;
    /// let mut stmt = conn.prepare("SELECT 1")?;
    /// stmt.finalize()?;
    /// conn.close()?;
    /// drop(stmt);
    /// # Ok(())
    /// # }
    /// ```
    pub fn close(&mut self) -> Result<()> {
        let (call, db) = self.scoped()?;

        // Held across the native close so no interrupt can race the free.
        let mut interrupt = self.interrupt.lock();
        let rc = call.raw("sqlite3_close_v2", |api| unsafe { (api.close_v2)(db.as_ptr()) });
        if rc != codes::OK {
            return Err(call.engine_error("sqlite3_close_v2", rc).into());
        }
        *interrupt = None;
        drop(interrupt);

        self.handle = None;
        self.state = ConnectionState::Closed;
        let released = callback::release_owner(self.id);
        debug!(
            "Closed connection {} ({} callback registrations released)",
            self.id, released
        );
        Ok(())
    }

    /// Ask any running statement on this connection to stop at its earliest
    /// opportunity. A no-op unless the connection is open.
    pub fn interrupt(&self) {
        self.interrupt_handle().interrupt();
    }

    /// A handle that can interrupt this connection from another thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            api: self.api,
            target: Arc::clone(&self.interrupt),
        }
    }

    /// Sleep-and-retry for up to `ms` milliseconds when a table is locked.
    ///
    /// Replaces any busy handler registered on this connection.
    pub fn busy_timeout(&self, ms: u32) -> Result<()> {
        let (call, db) = self.scoped()?;
        let ms = c_int::try_from(ms).unwrap_or(c_int::MAX);
        call.checked("sqlite3_busy_timeout", |api| unsafe {
            (api.busy_timeout)(db.as_ptr(), ms)
        })?;
        callback::release(self.id, &callback::Slot::BusyHandler);
        Ok(())
    }

    /// Install a busy handler, replacing any previous one.
    ///
    /// The handler receives the number of times it has already been invoked
    /// for the current lock and returns `true` to retry. Returning `false`, or
    /// panicking, makes the blocked call fail with `SQLITE_BUSY`.
    pub fn register_busy_handler<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(u32) -> bool + Send + Sync + 'static,
    {
        let (call, db) = self.scoped()?;
        callback::install_busy_handler(call, db, self.id, Arc::new(handler))
    }

    pub fn clear_busy_handler(&self) -> Result<()> {
        let (call, db) = self.scoped()?;
        callback::remove_busy_handler(call, db, self.id)
    }

    /// Register a scalar SQL function. `arity` of -1 accepts any number of
    /// arguments. Re-registering the same name and arity replaces it.
    pub fn register_function<F>(&self, name: &str, arity: i32, function: F) -> Result<()>
    where
        F: Fn(&[Value]) -> FunctionResult + Send + Sync + 'static,
    {
        self.register_function_with_flags(name, arity, FunctionFlags::empty(), function)
    }

    pub fn register_function_with_flags<F>(
        &self,
        name: &str,
        arity: i32,
        flags: FunctionFlags,
        function: F,
    ) -> Result<()>
    where
        F: Fn(&[Value]) -> FunctionResult + Send + Sync + 'static,
    {
        let (call, db) = self.scoped()?;
        callback::install_function(call, db, self.id, name, arity, flags, Arc::new(function))
    }

    pub fn remove_function(&self, name: &str, arity: i32) -> Result<()> {
        let (call, db) = self.scoped()?;
        callback::remove_function(call, db, self.id, name, arity)
    }

    /// Most recent error message of this connection.
    pub fn errmsg(&self) -> Result<String> {
        let (call, db) = self.scoped()?;
        call.required_string("sqlite3_errmsg", |api| unsafe { (api.errmsg)(db.as_ptr()) })
    }

    /// Version string of the native library.
    pub fn libversion(&self) -> Result<String> {
        Marshaller::detached(self.api)
            .required_string("sqlite3_libversion", |api| unsafe { (api.libversion)() })
    }

    /// Rows modified by the most recent INSERT, UPDATE or DELETE.
    pub fn changes(&self) -> Result<i32> {
        let (call, db) = self.scoped()?;
        Ok(call.raw("sqlite3_changes", |api| unsafe { (api.changes)(db.as_ptr()) }))
    }

    /// Rows modified since the connection was opened.
    pub fn total_changes(&self) -> Result<i32> {
        let (call, db) = self.scoped()?;
        Ok(call.raw("sqlite3_total_changes", |api| unsafe {
            (api.total_changes)(db.as_ptr())
        }))
    }

    /// Set a run-time limit and return its previous value. A negative
    /// `value` only queries the limit.
    pub fn limit(&self, limit: Limit, value: i32) -> Result<i32> {
        let (call, db) = self.scoped()?;
        Ok(call.raw("sqlite3_limit", |api| unsafe {
            (api.limit)(db.as_ptr(), limit as c_int, value)
        }))
    }

    pub fn enable_load_extension(&self, enable: bool) -> Result<()> {
        let (call, db) = self.scoped()?;
        call.checked("sqlite3_enable_load_extension", |api| unsafe {
            (api.enable_load_extension)(db.as_ptr(), c_int::from(enable))
        })
    }

    /// Enable or disable shared-cache mode for connections opened afterwards.
    ///
    /// This setting is process-wide.
    pub fn enable_shared_cache(enable: bool) -> Result<()> {
        native::binding()?.enable_shared_cache(enable)
    }

    /// Number of live callback registrations owned by this connection.
    pub fn registered_callbacks(&self) -> usize {
        callback::registered(self.id)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn api(&self) -> &'static NativeApi {
        self.api
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Path the connection was opened with (empty before open).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The native `sqlite3*`, while open.
    pub fn handle(&self) -> Option<NonNull<RawConnection>> {
        self.handle.map(|h| h.0)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.state == ConnectionState::Open {
            if let Err(e) = self.close() {
                warn!("Failed to close connection {} on drop: {}", self.id, e);
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("path", &self.path)
            .finish()
    }
}

/// Interrupts a connection from any thread.
///
/// Becomes a no-op once the connection is closed.
#[derive(Clone)]
pub struct InterruptHandle {
    api: &'static NativeApi,
    target: Arc<Mutex<Option<ConnectionHandle>>>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        let target = self.target.lock();
        if let Some(handle) = *target {
            Marshaller::scoped(self.api, handle.0).void("sqlite3_interrupt", |api| unsafe {
                (api.interrupt)(handle.0.as_ptr())
            });
        }
    }
}

impl fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("armed", &self.target.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::SymbolSource;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_ids_are_unique() {
        let a = Connection::new().unwrap();
        let b = Connection::new().unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_user_data_round_trip() {
        let id = ConnectionId::next();
        assert_eq!(ConnectionId::from_user_data(id.as_user_data()), id);
    }

    #[test]
    fn test_new_is_unopened() {
        let conn = Connection::new().unwrap();
        assert_eq!(conn.state(), ConnectionState::Unopened);
        assert!(conn.handle().is_none());
        assert_eq!(conn.prepare("SELECT 1").unwrap_err().as_state(), Some(&StateError::NotOpen));
    }

    #[test]
    fn test_open_twice_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        let err = conn.open(":memory:", OpenFlags::default()).unwrap_err();
        assert_eq!(
            err.as_state(),
            Some(&StateError::AlreadyOpen {
                path: ":memory:".to_string()
            })
        );
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.close().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.handle().is_none());

        assert_eq!(conn.close().unwrap_err().as_state(), Some(&StateError::Closed));
        assert_eq!(
            conn.open(":memory:", OpenFlags::default()).unwrap_err().as_state(),
            Some(&StateError::Closed)
        );
    }

    #[test]
    fn test_interrupt_handle_after_close_is_noop() {
        let mut conn = Connection::open_in_memory().unwrap();
        let handle = conn.interrupt_handle();
        conn.close().unwrap();
        handle.interrupt();
        conn.interrupt();
    }

    static CLOSED: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn failing_busy_timeout(_db: *mut RawConnection, _ms: c_int) -> c_int {
        codes::MISUSE
    }

    unsafe extern "C" fn counting_close(db: *mut RawConnection) -> c_int {
        CLOSED.fetch_add(1, Ordering::SeqCst);
        match native::binding() {
            Ok(binding) => (binding.api().close_v2)(db),
            Err(_) => codes::ERROR,
        }
    }

    /// The bundled engine with `sqlite3_busy_timeout` always failing
    struct FailingBusyTimeout;

    impl native::SymbolSource for FailingBusyTimeout {
        fn describe(&self) -> String {
            "failing busy timeout".to_string()
        }

        fn lookup(&self, name: &str) -> Option<*const c_void> {
            match name {
                "sqlite3_busy_timeout" => Some(failing_busy_timeout as *const c_void),
                "sqlite3_close_v2" => Some(counting_close as *const c_void),
                _ => native::BundledEngine.lookup(name),
            }
        }
    }

    #[test]
    fn test_failed_busy_timeout_closes_and_stays_unopened() {
        let api: &'static NativeApi =
            Box::leak(Box::new(NativeApi::resolve(&FailingBusyTimeout).unwrap()));
        let mut conn = Connection::with_api(api);
        let options = OpenOptions {
            busy_timeout_ms: Some(50),
            ..Default::default()
        };

        let err = conn.open_with_options(":memory:", &options).unwrap_err();
        assert_eq!(err.as_engine().map(|e| e.code), Some(codes::MISUSE));
        assert_eq!(conn.state(), ConnectionState::Unopened);
        assert!(conn.handle().is_none());
        assert_eq!(CLOSED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_open_with_busy_timeout() {
        let options = OpenOptions {
            busy_timeout_ms: Some(50),
            ..Default::default()
        };
        let conn = Connection::connect_with_options(":memory:", &options).unwrap();
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[test]
    fn test_open_rejects_interior_nul() {
        let mut conn = Connection::new().unwrap();
        let err = conn.open("bad\0path", OpenFlags::default()).unwrap_err();
        assert!(matches!(err, crate::BindError::Infrastructure(InfrastructureError::Marshal(_))));
        assert_eq!(conn.state(), ConnectionState::Unopened);
    }
}
