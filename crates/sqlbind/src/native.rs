//! Native symbol table
//!
//! Resolves the exports of the SQLite C library into typed function pointers
//! once per process. Every C prototype the binding uses is declared exactly
//! once, in the [`native_api!`] invocation below; call sites only ever go
//! through the resulting [`NativeApi`] fields.
//!
//! Nothing on the native side checks argument types, so a wrong declaration
//! here is undefined behaviour rather than an error. Keep each entry in sync
//! with the prototype quoted in its doc comment.
//!
//! # Sources
//!
//! - [`BundledEngine`]: the engine linked into this binary (via `rusqlite`'s
//!   bundled build)
//! - [`DynamicLibrary`]: a shared library loaded at run time, from an explicit
//!   path or the platform's conventional names

use std::fmt;
use std::marker::{PhantomData, PhantomPinned};
use std::mem;
use std::os::raw::{c_char, c_int, c_uchar, c_void};
use std::path::Path;
use std::sync::OnceLock;

use libloading::Library;
use parking_lot::{const_mutex, Mutex};
use rusqlite::ffi;
use tracing::debug;

use crate::call::Marshaller;
use crate::config::LibrarySource;
use crate::error::{InfrastructureError, Result};

/// Opaque `sqlite3` connection object
#[repr(C)]
pub struct RawConnection {
    _data: [u8; 0],
    _marker: PhantomData<(*mut u8, PhantomPinned)>,
}

/// Opaque `sqlite3_stmt` prepared statement object
#[repr(C)]
pub struct RawStatement {
    _data: [u8; 0],
    _marker: PhantomData<(*mut u8, PhantomPinned)>,
}

/// Opaque `sqlite3_context` of a user function invocation
#[repr(C)]
pub struct RawContext {
    _data: [u8; 0],
    _marker: PhantomData<(*mut u8, PhantomPinned)>,
}

/// Opaque `sqlite3_value` argument of a user function invocation
#[repr(C)]
pub struct RawValue {
    _data: [u8; 0],
    _marker: PhantomData<(*mut u8, PhantomPinned)>,
}

/// `int (*)(void*, int)`
pub type BusyCallback = unsafe extern "C" fn(*mut c_void, c_int) -> c_int;

/// `void (*xFunc)(sqlite3_context*, int, sqlite3_value**)`
pub type ScalarCallback = unsafe extern "C" fn(*mut RawContext, c_int, *mut *mut RawValue);

/// `void (*xFinal)(sqlite3_context*)`
pub type FinalCallback = unsafe extern "C" fn(*mut RawContext);

/// `void (*xDestroy)(void*)`
pub type DestroyCallback = unsafe extern "C" fn(*mut c_void);

/// `int (*callback)(void*, int, char**, char**)`
pub type ExecCallback =
    unsafe extern "C" fn(*mut c_void, c_int, *mut *mut c_char, *mut *mut c_char) -> c_int;

/// Destructor argument of the bind/result text and blob calls.
///
/// Declared as a pointer-sized integer so the `SQLITE_TRANSIENT` sentinel (-1)
/// can be passed without fabricating a function pointer.
pub type Destructor = isize;

/// A place native exports can be looked up by name
pub trait SymbolSource {
    /// Human readable name of the library, for diagnostics
    fn describe(&self) -> String;

    /// Address of the export `name`, or `None` if it is missing
    fn lookup(&self, name: &str) -> Option<*const c_void>;
}

macro_rules! native_api {
    ($( $(#[$meta:meta])* $field:ident => $symbol:literal : $signature:ty; )+) => {
        /// Typed call descriptors for every export the binding uses
        pub struct NativeApi {
            $( $(#[$meta])* pub $field: $signature, )+
        }

        impl NativeApi {
            /// Every required export, in declaration order
            pub const SYMBOLS: &'static [&'static str] = &[$($symbol),+];

            /// Resolve every required export from `source`.
            ///
            /// Fails on the first missing symbol; a partially resolved table is
            /// never produced.
            pub fn resolve(source: &dyn SymbolSource) -> std::result::Result<Self, InfrastructureError> {
                Ok(Self {
                    $( $field: {
                        let address = source.lookup($symbol).ok_or_else(|| {
                            InfrastructureError::MissingSymbol {
                                symbol: $symbol,
                                library: source.describe(),
                            }
                        })?;
                        // SAFETY: `address` is the export named `$symbol`, whose C
                        // prototype is the one declared for this field.
                        unsafe { mem::transmute::<*const c_void, $signature>(address) }
                    }, )+
                })
            }
        }
    };
}

native_api! {
    /// `int sqlite3_open_v2(const char *filename, sqlite3 **ppDb, int flags, const char *zVfs)`
    open_v2 => "sqlite3_open_v2":
        unsafe extern "C" fn(*const c_char, *mut *mut RawConnection, c_int, *const c_char) -> c_int;
    /// `int sqlite3_close_v2(sqlite3*)`
    close_v2 => "sqlite3_close_v2": unsafe extern "C" fn(*mut RawConnection) -> c_int;
    /// `const char *sqlite3_errmsg(sqlite3*)`
    errmsg => "sqlite3_errmsg": unsafe extern "C" fn(*mut RawConnection) -> *const c_char;
    /// `const char *sqlite3_errstr(int)`
    errstr => "sqlite3_errstr": unsafe extern "C" fn(c_int) -> *const c_char;
    /// `const char *sqlite3_libversion(void)`
    libversion => "sqlite3_libversion": unsafe extern "C" fn() -> *const c_char;
    /// `int sqlite3_exec(sqlite3*, const char *sql, int (*callback)(void*,int,char**,char**), void*, char **errmsg)`
    exec => "sqlite3_exec":
        unsafe extern "C" fn(*mut RawConnection, *const c_char, Option<ExecCallback>, *mut c_void, *mut *mut c_char) -> c_int;

    /// `int sqlite3_prepare_v2(sqlite3 *db, const char *zSql, int nByte, sqlite3_stmt **ppStmt, const char **pzTail)`
    prepare_v2 => "sqlite3_prepare_v2":
        unsafe extern "C" fn(*mut RawConnection, *const c_char, c_int, *mut *mut RawStatement, *mut *const c_char) -> c_int;
    /// `int sqlite3_step(sqlite3_stmt*)`
    step => "sqlite3_step": unsafe extern "C" fn(*mut RawStatement) -> c_int;
    /// `int sqlite3_reset(sqlite3_stmt*)`
    reset => "sqlite3_reset": unsafe extern "C" fn(*mut RawStatement) -> c_int;
    /// `int sqlite3_finalize(sqlite3_stmt*)`
    finalize => "sqlite3_finalize": unsafe extern "C" fn(*mut RawStatement) -> c_int;
    /// `int sqlite3_clear_bindings(sqlite3_stmt*)`
    clear_bindings => "sqlite3_clear_bindings": unsafe extern "C" fn(*mut RawStatement) -> c_int;
    /// `int sqlite3_bind_parameter_count(sqlite3_stmt*)`
    bind_parameter_count => "sqlite3_bind_parameter_count": unsafe extern "C" fn(*mut RawStatement) -> c_int;

    /// `int sqlite3_bind_null(sqlite3_stmt*, int)`
    bind_null => "sqlite3_bind_null": unsafe extern "C" fn(*mut RawStatement, c_int) -> c_int;
    /// `int sqlite3_bind_int(sqlite3_stmt*, int, int)`
    bind_int => "sqlite3_bind_int": unsafe extern "C" fn(*mut RawStatement, c_int, c_int) -> c_int;
    /// `int sqlite3_bind_int64(sqlite3_stmt*, int, sqlite3_int64)`
    bind_int64 => "sqlite3_bind_int64": unsafe extern "C" fn(*mut RawStatement, c_int, i64) -> c_int;
    /// `int sqlite3_bind_double(sqlite3_stmt*, int, double)`
    bind_double => "sqlite3_bind_double": unsafe extern "C" fn(*mut RawStatement, c_int, f64) -> c_int;
    /// `int sqlite3_bind_text(sqlite3_stmt*, int, const char*, int, void(*)(void*))`
    bind_text => "sqlite3_bind_text":
        unsafe extern "C" fn(*mut RawStatement, c_int, *const c_char, c_int, Destructor) -> c_int;
    /// `int sqlite3_bind_blob(sqlite3_stmt*, int, const void*, int n, void(*)(void*))`
    bind_blob => "sqlite3_bind_blob":
        unsafe extern "C" fn(*mut RawStatement, c_int, *const c_void, c_int, Destructor) -> c_int;

    /// `int sqlite3_column_count(sqlite3_stmt*)`
    column_count => "sqlite3_column_count": unsafe extern "C" fn(*mut RawStatement) -> c_int;
    /// `int sqlite3_column_type(sqlite3_stmt*, int iCol)`
    column_type => "sqlite3_column_type": unsafe extern "C" fn(*mut RawStatement, c_int) -> c_int;
    /// `const char *sqlite3_column_name(sqlite3_stmt*, int N)`
    column_name => "sqlite3_column_name": unsafe extern "C" fn(*mut RawStatement, c_int) -> *const c_char;
    /// `const char *sqlite3_column_table_name(sqlite3_stmt*, int)`
    column_table_name => "sqlite3_column_table_name":
        unsafe extern "C" fn(*mut RawStatement, c_int) -> *const c_char;
    /// `const char *sqlite3_column_decltype(sqlite3_stmt*, int)`
    column_decltype => "sqlite3_column_decltype":
        unsafe extern "C" fn(*mut RawStatement, c_int) -> *const c_char;
    /// `const unsigned char *sqlite3_column_text(sqlite3_stmt*, int iCol)`
    column_text => "sqlite3_column_text": unsafe extern "C" fn(*mut RawStatement, c_int) -> *const c_uchar;
    /// `const void *sqlite3_column_blob(sqlite3_stmt*, int iCol)`
    column_blob => "sqlite3_column_blob": unsafe extern "C" fn(*mut RawStatement, c_int) -> *const c_void;
    /// `double sqlite3_column_double(sqlite3_stmt*, int iCol)`
    column_double => "sqlite3_column_double": unsafe extern "C" fn(*mut RawStatement, c_int) -> f64;
    /// `int sqlite3_column_int(sqlite3_stmt*, int iCol)`
    column_int => "sqlite3_column_int": unsafe extern "C" fn(*mut RawStatement, c_int) -> c_int;
    /// `sqlite3_int64 sqlite3_column_int64(sqlite3_stmt*, int iCol)`
    column_int64 => "sqlite3_column_int64": unsafe extern "C" fn(*mut RawStatement, c_int) -> i64;
    /// `int sqlite3_column_bytes(sqlite3_stmt*, int iCol)`
    column_bytes => "sqlite3_column_bytes": unsafe extern "C" fn(*mut RawStatement, c_int) -> c_int;

    /// `int sqlite3_busy_handler(sqlite3*, int(*)(void*,int), void*)`
    busy_handler => "sqlite3_busy_handler":
        unsafe extern "C" fn(*mut RawConnection, Option<BusyCallback>, *mut c_void) -> c_int;
    /// `int sqlite3_busy_timeout(sqlite3*, int ms)`
    busy_timeout => "sqlite3_busy_timeout": unsafe extern "C" fn(*mut RawConnection, c_int) -> c_int;
    /// `int sqlite3_create_function_v2(sqlite3 *db, const char *zFunctionName, int nArg, int eTextRep,
    /// void *pApp, xFunc, xStep, xFinal, void(*xDestroy)(void*))`
    create_function_v2 => "sqlite3_create_function_v2":
        unsafe extern "C" fn(
            *mut RawConnection,
            *const c_char,
            c_int,
            c_int,
            *mut c_void,
            Option<ScalarCallback>,
            Option<ScalarCallback>,
            Option<FinalCallback>,
            Option<DestroyCallback>,
        ) -> c_int;
    /// `void *sqlite3_user_data(sqlite3_context*)`
    user_data => "sqlite3_user_data": unsafe extern "C" fn(*mut RawContext) -> *mut c_void;

    /// `int sqlite3_value_type(sqlite3_value*)`
    value_type => "sqlite3_value_type": unsafe extern "C" fn(*mut RawValue) -> c_int;
    /// `sqlite3_int64 sqlite3_value_int64(sqlite3_value*)`
    value_int64 => "sqlite3_value_int64": unsafe extern "C" fn(*mut RawValue) -> i64;
    /// `double sqlite3_value_double(sqlite3_value*)`
    value_double => "sqlite3_value_double": unsafe extern "C" fn(*mut RawValue) -> f64;
    /// `const unsigned char *sqlite3_value_text(sqlite3_value*)`
    value_text => "sqlite3_value_text": unsafe extern "C" fn(*mut RawValue) -> *const c_uchar;
    /// `const void *sqlite3_value_blob(sqlite3_value*)`
    value_blob => "sqlite3_value_blob": unsafe extern "C" fn(*mut RawValue) -> *const c_void;
    /// `int sqlite3_value_bytes(sqlite3_value*)`
    value_bytes => "sqlite3_value_bytes": unsafe extern "C" fn(*mut RawValue) -> c_int;

    /// `void sqlite3_result_null(sqlite3_context*)`
    result_null => "sqlite3_result_null": unsafe extern "C" fn(*mut RawContext);
    /// `void sqlite3_result_text(sqlite3_context*, const char*, int, void(*)(void*))`
    result_text => "sqlite3_result_text":
        unsafe extern "C" fn(*mut RawContext, *const c_char, c_int, Destructor);
    /// `void sqlite3_result_blob(sqlite3_context*, const void*, int, void(*)(void*))`
    result_blob => "sqlite3_result_blob":
        unsafe extern "C" fn(*mut RawContext, *const c_void, c_int, Destructor);
    /// `void sqlite3_result_double(sqlite3_context*, double)`
    result_double => "sqlite3_result_double": unsafe extern "C" fn(*mut RawContext, f64);
    /// `void sqlite3_result_int(sqlite3_context*, int)`
    result_int => "sqlite3_result_int": unsafe extern "C" fn(*mut RawContext, c_int);
    /// `void sqlite3_result_int64(sqlite3_context*, sqlite3_int64)`
    result_int64 => "sqlite3_result_int64": unsafe extern "C" fn(*mut RawContext, i64);
    /// `void sqlite3_result_error(sqlite3_context*, const char*, int)`
    result_error => "sqlite3_result_error": unsafe extern "C" fn(*mut RawContext, *const c_char, c_int);

    /// `int sqlite3_limit(sqlite3*, int id, int newVal)`
    limit => "sqlite3_limit": unsafe extern "C" fn(*mut RawConnection, c_int, c_int) -> c_int;
    /// `void sqlite3_interrupt(sqlite3*)`
    interrupt => "sqlite3_interrupt": unsafe extern "C" fn(*mut RawConnection);
    /// `int sqlite3_changes(sqlite3*)`
    changes => "sqlite3_changes": unsafe extern "C" fn(*mut RawConnection) -> c_int;
    /// `int sqlite3_total_changes(sqlite3*)`
    total_changes => "sqlite3_total_changes": unsafe extern "C" fn(*mut RawConnection) -> c_int;
    /// `int sqlite3_enable_shared_cache(int)` (process-wide, takes no connection)
    enable_shared_cache => "sqlite3_enable_shared_cache": unsafe extern "C" fn(c_int) -> c_int;
    /// `int sqlite3_enable_load_extension(sqlite3 *db, int onoff)`
    enable_load_extension => "sqlite3_enable_load_extension":
        unsafe extern "C" fn(*mut RawConnection, c_int) -> c_int;
}

// Exported by the bundled amalgamation but left out of the generated bindings.
extern "C" {
    fn sqlite3_close_v2(db: *mut ffi::sqlite3) -> c_int;
}

/// The engine statically linked into this binary
#[derive(Debug, Clone, Copy, Default)]
pub struct BundledEngine;

impl SymbolSource for BundledEngine {
    fn describe(&self) -> String {
        "bundled".to_string()
    }

    fn lookup(&self, name: &str) -> Option<*const c_void> {
        let address = match name {
            "sqlite3_open_v2" => ffi::sqlite3_open_v2 as *const c_void,
            "sqlite3_close_v2" => sqlite3_close_v2 as *const c_void,
            "sqlite3_errmsg" => ffi::sqlite3_errmsg as *const c_void,
            "sqlite3_errstr" => ffi::sqlite3_errstr as *const c_void,
            "sqlite3_libversion" => ffi::sqlite3_libversion as *const c_void,
            "sqlite3_exec" => ffi::sqlite3_exec as *const c_void,
            "sqlite3_prepare_v2" => ffi::sqlite3_prepare_v2 as *const c_void,
            "sqlite3_step" => ffi::sqlite3_step as *const c_void,
            "sqlite3_reset" => ffi::sqlite3_reset as *const c_void,
            "sqlite3_finalize" => ffi::sqlite3_finalize as *const c_void,
            "sqlite3_clear_bindings" => ffi::sqlite3_clear_bindings as *const c_void,
            "sqlite3_bind_parameter_count" => ffi::sqlite3_bind_parameter_count as *const c_void,
            "sqlite3_bind_null" => ffi::sqlite3_bind_null as *const c_void,
            "sqlite3_bind_int" => ffi::sqlite3_bind_int as *const c_void,
            "sqlite3_bind_int64" => ffi::sqlite3_bind_int64 as *const c_void,
            "sqlite3_bind_double" => ffi::sqlite3_bind_double as *const c_void,
            "sqlite3_bind_text" => ffi::sqlite3_bind_text as *const c_void,
            "sqlite3_bind_blob" => ffi::sqlite3_bind_blob as *const c_void,
            "sqlite3_column_count" => ffi::sqlite3_column_count as *const c_void,
            "sqlite3_column_type" => ffi::sqlite3_column_type as *const c_void,
            "sqlite3_column_name" => ffi::sqlite3_column_name as *const c_void,
            "sqlite3_column_table_name" => ffi::sqlite3_column_table_name as *const c_void,
            "sqlite3_column_decltype" => ffi::sqlite3_column_decltype as *const c_void,
            "sqlite3_column_text" => ffi::sqlite3_column_text as *const c_void,
            "sqlite3_column_blob" => ffi::sqlite3_column_blob as *const c_void,
            "sqlite3_column_double" => ffi::sqlite3_column_double as *const c_void,
            "sqlite3_column_int" => ffi::sqlite3_column_int as *const c_void,
            "sqlite3_column_int64" => ffi::sqlite3_column_int64 as *const c_void,
            "sqlite3_column_bytes" => ffi::sqlite3_column_bytes as *const c_void,
            "sqlite3_busy_handler" => ffi::sqlite3_busy_handler as *const c_void,
            "sqlite3_busy_timeout" => ffi::sqlite3_busy_timeout as *const c_void,
            "sqlite3_create_function_v2" => ffi::sqlite3_create_function_v2 as *const c_void,
            "sqlite3_user_data" => ffi::sqlite3_user_data as *const c_void,
            "sqlite3_value_type" => ffi::sqlite3_value_type as *const c_void,
            "sqlite3_value_int64" => ffi::sqlite3_value_int64 as *const c_void,
            "sqlite3_value_double" => ffi::sqlite3_value_double as *const c_void,
            "sqlite3_value_text" => ffi::sqlite3_value_text as *const c_void,
            "sqlite3_value_blob" => ffi::sqlite3_value_blob as *const c_void,
            "sqlite3_value_bytes" => ffi::sqlite3_value_bytes as *const c_void,
            "sqlite3_result_null" => ffi::sqlite3_result_null as *const c_void,
            "sqlite3_result_text" => ffi::sqlite3_result_text as *const c_void,
            "sqlite3_result_blob" => ffi::sqlite3_result_blob as *const c_void,
            "sqlite3_result_double" => ffi::sqlite3_result_double as *const c_void,
            "sqlite3_result_int" => ffi::sqlite3_result_int as *const c_void,
            "sqlite3_result_int64" => ffi::sqlite3_result_int64 as *const c_void,
            "sqlite3_result_error" => ffi::sqlite3_result_error as *const c_void,
            "sqlite3_limit" => ffi::sqlite3_limit as *const c_void,
            "sqlite3_interrupt" => ffi::sqlite3_interrupt as *const c_void,
            "sqlite3_changes" => ffi::sqlite3_changes as *const c_void,
            "sqlite3_total_changes" => ffi::sqlite3_total_changes as *const c_void,
            "sqlite3_enable_shared_cache" => ffi::sqlite3_enable_shared_cache as *const c_void,
            "sqlite3_enable_load_extension" => ffi::sqlite3_enable_load_extension as *const c_void,
            _ => return None,
        };
        Some(address)
    }
}

/// A shared library loaded at run time
pub struct DynamicLibrary {
    library: Library,
    name: String,
}

impl DynamicLibrary {
    /// Conventional file names tried by [`DynamicLibrary::load_default`]
    #[cfg(target_os = "windows")]
    pub const DEFAULT_NAMES: &'static [&'static str] = &["sqlite3.dll"];
    #[cfg(target_os = "macos")]
    pub const DEFAULT_NAMES: &'static [&'static str] = &["libsqlite3.dylib", "libsqlite3.0.dylib"];
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    pub const DEFAULT_NAMES: &'static [&'static str] = &["libsqlite3.so.0", "libsqlite3.so"];

    /// Load a shared library from an explicit path.
    pub fn load(path: impl AsRef<Path>) -> std::result::Result<Self, InfrastructureError> {
        let path = path.as_ref();
        // SAFETY: loading runs the library's initializers; the SQLite library has
        // none with preconditions on the caller.
        let library = unsafe { Library::new(path) }.map_err(|e| InfrastructureError::LibraryLoad {
            library: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            library,
            name: path.display().to_string(),
        })
    }

    /// Load the library through the platform's default search path.
    pub fn load_default() -> std::result::Result<Self, InfrastructureError> {
        let mut failures = Vec::new();
        for name in Self::DEFAULT_NAMES {
            match Self::load(name) {
                Ok(library) => return Ok(library),
                Err(e) => failures.push(e.to_string()),
            }
        }

        Err(InfrastructureError::LibraryLoad {
            library: Self::DEFAULT_NAMES.join(", "),
            reason: failures.join("; "),
        })
    }
}

impl SymbolSource for DynamicLibrary {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn lookup(&self, name: &str) -> Option<*const c_void> {
        // SAFETY: the symbol is read as an address only; it is given a type
        // when the table transmutes it to its declared prototype.
        let symbol = unsafe { self.library.get::<*const c_void>(name.as_bytes()) }.ok()?;
        let address = *symbol;
        (!address.is_null()).then_some(address)
    }
}

impl fmt::Debug for DynamicLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicLibrary").field("name", &self.name).finish()
    }
}

/// A fully resolved symbol table plus whatever keeps its code mapped
pub struct NativeBinding {
    api: NativeApi,
    source: String,
    _library: Option<DynamicLibrary>,
}

impl NativeBinding {
    /// Load the library described by `source` and resolve every export.
    pub fn load(source: &LibrarySource) -> std::result::Result<Self, InfrastructureError> {
        match source {
            LibrarySource::Bundled => Self::from_source(BundledEngine, None),
            LibrarySource::System => {
                let library = DynamicLibrary::load_default()?;
                let api = NativeApi::resolve(&library)?;
                Ok(Self::from_parts(api, library))
            }
            LibrarySource::Path { path } => {
                let library = DynamicLibrary::load(path)?;
                let api = NativeApi::resolve(&library)?;
                Ok(Self::from_parts(api, library))
            }
        }
    }

    fn from_source(
        source: impl SymbolSource,
        library: Option<DynamicLibrary>,
    ) -> std::result::Result<Self, InfrastructureError> {
        let api = NativeApi::resolve(&source)?;
        Ok(Self {
            api,
            source: source.describe(),
            _library: library,
        })
    }

    fn from_parts(api: NativeApi, library: DynamicLibrary) -> Self {
        Self {
            api,
            source: library.describe(),
            _library: Some(library),
        }
    }

    pub fn api(&self) -> &NativeApi {
        &self.api
    }

    /// Name of the library the table was resolved from
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Version string of the loaded engine
    pub fn libversion(&self) -> Result<String> {
        Marshaller::detached(&self.api)
            .required_string("sqlite3_libversion", |api| unsafe { (api.libversion)() })
    }

    /// Enable or disable shared-cache mode for connections opened afterwards.
    ///
    /// This is process-wide in the native library.
    pub fn enable_shared_cache(&self, enable: bool) -> Result<()> {
        Marshaller::detached(&self.api).checked("sqlite3_enable_shared_cache", |api| unsafe {
            (api.enable_shared_cache)(c_int::from(enable))
        })
    }
}

impl fmt::Debug for NativeBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeBinding")
            .field("source", &self.source)
            .field("symbols", &NativeApi::SYMBOLS.len())
            .finish()
    }
}

static BINDING: OnceLock<NativeBinding> = OnceLock::new();
static INSTALL_LOCK: Mutex<()> = const_mutex(());

/// Build and install the process-wide binding from `source`.
///
/// Must happen before the first connection is created; afterwards the table is
/// frozen and this fails with [`InfrastructureError::AlreadyInstalled`].
pub fn install(source: &LibrarySource) -> std::result::Result<&'static NativeBinding, InfrastructureError> {
    let _guard = INSTALL_LOCK.lock();
    if let Some(existing) = BINDING.get() {
        return Err(InfrastructureError::AlreadyInstalled {
            installed: existing.source.clone(),
        });
    }

    let binding = NativeBinding::load(source)?;
    debug!(
        "Installed native binding from {} ({} symbols)",
        binding.source,
        NativeApi::SYMBOLS.len()
    );
    Ok(BINDING.get_or_init(|| binding))
}

/// The process-wide binding, installing the bundled engine on first use.
pub fn binding() -> std::result::Result<&'static NativeBinding, InfrastructureError> {
    if let Some(binding) = BINDING.get() {
        return Ok(binding);
    }

    let _guard = INSTALL_LOCK.lock();
    if let Some(binding) = BINDING.get() {
        return Ok(binding);
    }

    let binding = NativeBinding::load(&LibrarySource::Bundled)?;
    debug!("Installed default native binding from {}", binding.source);
    Ok(BINDING.get_or_init(|| binding))
}

/// The installed binding, if any. Used by trampolines, which only run once a
/// connection exists.
pub(crate) fn installed() -> Option<&'static NativeBinding> {
    BINDING.get()
}
