//! Upcall bridge
//!
//! The native library can only call plain `extern "C"` functions with a
//! single `void*` of context. Managed callbacks are closures, so they live in a
//! process-wide registry keyed by owning connection and slot, and a fixed set
//! of trampolines looks them up when the library calls back.
//!
//! No panic and no Rust error crosses the boundary: a busy handler that panics
//! is treated as "stop retrying", and a user function that fails or panics
//! reports an error result for the current call.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::os::raw::{c_char, c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::slice;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use sqlbind_ffi_common::{decode_blob, decode_text, encode_blob, encode_text, NativeArena};
use tracing::{debug, warn};

use crate::call::Marshaller;
use crate::connection::ConnectionId;
use crate::error::{CallbackError, Result};
use crate::native::{self, NativeApi, RawConnection, RawContext, RawValue};
use crate::types::{ColumnType, FunctionFlags, Value, TRANSIENT};

/// Result returned by a user function
pub type FunctionResult = std::result::Result<Value, CallbackError>;

pub(crate) type BusyFn = dyn Fn(u32) -> bool + Send + Sync;
pub(crate) type ScalarFn = dyn Fn(&[Value]) -> FunctionResult + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Slot {
    BusyHandler,
    Function { name: String, arity: i32 },
}

impl Slot {
    /// Function names are matched case-insensitively by the engine.
    pub(crate) fn function(name: &str, arity: i32) -> Self {
        Slot::Function {
            name: name.to_ascii_lowercase(),
            arity,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::BusyHandler => write!(f, "busy handler"),
            Slot::Function { name, arity } => write!(f, "function {}/{}", name, arity),
        }
    }
}

type RegistrationKey = (ConnectionId, Slot);

#[derive(Clone)]
enum Registration {
    Busy(Arc<BusyFn>),
    Function(Arc<ScalarFn>),
}

static REGISTRY: LazyLock<RwLock<HashMap<RegistrationKey, Registration>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

fn insert(owner: ConnectionId, slot: Slot, registration: Registration) {
    let replaced = REGISTRY.write().insert((owner, slot.clone()), registration);
    if replaced.is_some() {
        debug!("Replaced {} on connection {}", slot, owner);
    }
}

fn lookup(owner: ConnectionId, slot: &Slot) -> Option<Registration> {
    REGISTRY.read().get(&(owner, slot.clone())).cloned()
}

/// Drop one registration. Returns whether it existed.
///
/// The closure is dropped after the registry lock is released: it may own a
/// connection whose close re-enters the registry.
pub(crate) fn release(owner: ConnectionId, slot: &Slot) -> bool {
    let removed = REGISTRY.write().remove(&(owner, slot.clone()));
    removed.is_some()
}

/// Drop every registration of a connection. Returns how many were dropped.
pub(crate) fn release_owner(owner: ConnectionId) -> usize {
    let removed: Vec<Registration> = {
        let mut registry = REGISTRY.write();
        let keys: Vec<RegistrationKey> = registry
            .keys()
            .filter(|(id, _)| *id == owner)
            .cloned()
            .collect();
        keys.iter().filter_map(|key| registry.remove(key)).collect()
    };
    removed.len()
}

/// Number of live registrations of a connection.
pub(crate) fn registered(owner: ConnectionId) -> usize {
    REGISTRY.read().keys().filter(|(id, _)| *id == owner).count()
}

/// Install `handler` as the busy handler of `db`.
pub(crate) fn install_busy_handler(
    call: Marshaller<'_>,
    db: NonNull<RawConnection>,
    owner: ConnectionId,
    handler: Arc<BusyFn>,
) -> Result<()> {
    insert(owner, Slot::BusyHandler, Registration::Busy(handler));

    let result = call.checked("sqlite3_busy_handler", |api| unsafe {
        (api.busy_handler)(db.as_ptr(), Some(busy_trampoline), owner.as_user_data())
    });
    if result.is_err() {
        release(owner, &Slot::BusyHandler);
    }
    result
}

/// Remove the busy handler of `db`, natively and from the registry.
pub(crate) fn remove_busy_handler(
    call: Marshaller<'_>,
    db: NonNull<RawConnection>,
    owner: ConnectionId,
) -> Result<()> {
    call.checked("sqlite3_busy_handler", |api| unsafe {
        (api.busy_handler)(db.as_ptr(), None, std::ptr::null_mut())
    })?;
    release(owner, &Slot::BusyHandler);
    Ok(())
}

/// Context pointer handed to the native library with each user function
struct FunctionKey {
    owner: ConnectionId,
    slot: Slot,
}

/// Register `function` under `name`/`arity` on `db`.
///
/// The native registration happens first; the closure is only stored once the
/// library accepted it.
pub(crate) fn install_function(
    call: Marshaller<'_>,
    db: NonNull<RawConnection>,
    owner: ConnectionId,
    name: &str,
    arity: i32,
    flags: FunctionFlags,
    function: Arc<ScalarFn>,
) -> Result<()> {
    let slot = Slot::function(name, arity);

    NativeArena::scoped(|arena| -> Result<()> {
        let c_name = arena.alloc_cstr(name)?;
        let key = Box::into_raw(Box::new(FunctionKey {
            owner,
            slot: slot.clone(),
        }));

        // The library calls `destroy_function_key` when the function is
        // replaced, removed, the connection closes, or this call fails.
        call.checked("sqlite3_create_function_v2", |api| unsafe {
            (api.create_function_v2)(
                db.as_ptr(),
                c_name.as_ptr(),
                arity,
                flags.text_rep(),
                key.cast::<c_void>(),
                Some(scalar_trampoline),
                None,
                None,
                Some(destroy_function_key),
            )
        })
    })?;

    insert(owner, slot, Registration::Function(function));
    Ok(())
}

/// Unregister the function `name`/`arity` from `db`.
pub(crate) fn remove_function(
    call: Marshaller<'_>,
    db: NonNull<RawConnection>,
    owner: ConnectionId,
    name: &str,
    arity: i32,
) -> Result<()> {
    NativeArena::scoped(|arena| -> Result<()> {
        let c_name = arena.alloc_cstr(name)?;
        call.checked("sqlite3_create_function_v2", |api| unsafe {
            (api.create_function_v2)(
                db.as_ptr(),
                c_name.as_ptr(),
                arity,
                FunctionFlags::empty().text_rep(),
                std::ptr::null_mut(),
                None,
                None,
                None,
                None,
            )
        })
    })?;

    release(owner, &Slot::function(name, arity));
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

unsafe extern "C" fn busy_trampoline(user_data: *mut c_void, attempts: c_int) -> c_int {
    let owner = ConnectionId::from_user_data(user_data);
    let Some(Registration::Busy(handler)) = lookup(owner, &Slot::BusyHandler) else {
        return 0;
    };

    let attempts = u32::try_from(attempts).unwrap_or(0);
    match panic::catch_unwind(AssertUnwindSafe(|| handler(attempts))) {
        Ok(retry) => c_int::from(retry),
        Err(payload) => {
            warn!(
                "Busy handler on connection {} panicked: {}",
                owner,
                panic_message(&*payload)
            );
            0
        }
    }
}

unsafe extern "C" fn destroy_function_key(key: *mut c_void) {
    if !key.is_null() {
        // SAFETY: the only pointer registered with this destructor is a
        // `Box<FunctionKey>` leaked by `install_function`.
        drop(unsafe { Box::from_raw(key.cast::<FunctionKey>()) });
    }
}

unsafe extern "C" fn scalar_trampoline(ctx: *mut RawContext, argc: c_int, argv: *mut *mut RawValue) {
    // A trampoline only runs for a function registered on an open connection,
    // which implies an installed binding.
    let Some(binding) = native::installed() else {
        return;
    };
    let api = binding.api();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
        invoke_function(api, ctx, argc, argv)
    }));

    match outcome {
        Ok(Ok(value)) => unsafe { set_result(api, ctx, &value) },
        Ok(Err(err)) => unsafe { set_error(api, ctx, err.message()) },
        Err(payload) => {
            let message = panic_message(&*payload);
            warn!("User function panicked: {}", message);
            unsafe { set_error(api, ctx, &format!("user function panicked: {}", message)) }
        }
    }
}

unsafe fn invoke_function(
    api: &NativeApi,
    ctx: *mut RawContext,
    argc: c_int,
    argv: *mut *mut RawValue,
) -> FunctionResult {
    let key = unsafe { (api.user_data)(ctx) }.cast::<FunctionKey>();
    // SAFETY: the context pointer is the key box, alive until the destroy callback.
    let Some(key) = (unsafe { key.as_ref() }) else {
        return Err(CallbackError::new("function invoked without registration context"));
    };

    let Some(Registration::Function(function)) = lookup(key.owner, &key.slot) else {
        return Err(CallbackError::new(format!("{} is not registered", key.slot)));
    };

    let args = unsafe { decode_args(api, argc, argv) }?;
    function(&args)
}

unsafe fn decode_args(
    api: &NativeApi,
    argc: c_int,
    argv: *mut *mut RawValue,
) -> std::result::Result<Vec<Value>, CallbackError> {
    let count = usize::try_from(argc).unwrap_or(0);
    if count == 0 || argv.is_null() {
        return Ok(Vec::new());
    }

    // SAFETY: the library passes `argc` valid value pointers.
    let values = unsafe { slice::from_raw_parts(argv, count) };
    values
        .iter()
        .enumerate()
        .map(|(i, &value)| unsafe { decode_value(api, value) }.map_err(|e| {
            CallbackError::new(format!("argument {}: {}", i + 1, e))
        }))
        .collect()
}

unsafe fn decode_value(
    api: &NativeApi,
    value: *mut RawValue,
) -> std::result::Result<Value, sqlbind_ffi_common::CodecError> {
    let decoded = unsafe {
        match ColumnType::from_code((api.value_type)(value)) {
            ColumnType::Integer => Value::Integer((api.value_int64)(value)),
            ColumnType::Float => Value::Real((api.value_double)(value)),
            ColumnType::Text => {
                // Pointer first: converting to text can change the byte count.
                let ptr = (api.value_text)(value);
                let len = (api.value_bytes)(value);
                decode_text(ptr, len)?.map_or(Value::Null, Value::Text)
            }
            ColumnType::Blob => {
                let ptr = (api.value_blob)(value).cast::<u8>();
                let len = (api.value_bytes)(value);
                decode_blob(ptr, len).map_or(Value::Null, Value::Blob)
            }
            ColumnType::Null => Value::Null,
        }
    };
    Ok(decoded)
}

unsafe fn set_result(api: &NativeApi, ctx: *mut RawContext, value: &Value) {
    unsafe {
        match value {
            Value::Null => (api.result_null)(ctx),
            Value::Integer(v) => match i32::try_from(*v) {
                Ok(small) => (api.result_int)(ctx, small),
                Err(_) => (api.result_int64)(ctx, *v),
            },
            Value::Real(v) => (api.result_double)(ctx, *v),
            Value::Text(s) => match encode_text(s) {
                Ok(buf) => (api.result_text)(ctx, buf.as_char_ptr(), buf.len(), TRANSIENT),
                Err(e) => set_error(api, ctx, &e.to_string()),
            },
            Value::Blob(b) => match encode_blob(b) {
                Ok(buf) => (api.result_blob)(ctx, buf.as_void_ptr(), buf.len(), TRANSIENT),
                Err(e) => set_error(api, ctx, &e.to_string()),
            },
        }
    }
}

unsafe fn set_error(api: &NativeApi, ctx: *mut RawContext, message: &str) {
    let bytes = message.as_bytes();
    let len = c_int::try_from(bytes.len()).unwrap_or(c_int::MAX);
    // The library copies the message.
    unsafe { (api.result_error)(ctx, bytes.as_ptr().cast::<c_char>(), len) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_function_slot_is_case_insensitive() {
        assert_eq!(Slot::function("Upper", 1), Slot::function("UPPER", 1));
        assert_ne!(Slot::function("upper", 1), Slot::function("upper", 2));
    }

    #[test]
    fn test_registry_release_owner() {
        let owner = ConnectionId::next();
        let other = ConnectionId::next();
        let noop: Arc<ScalarFn> = Arc::new(|_: &[Value]| -> FunctionResult { Ok(Value::Null) });

        insert(owner, Slot::BusyHandler, Registration::Busy(Arc::new(|_: u32| false)));
        insert(owner, Slot::function("f", 0), Registration::Function(noop.clone()));
        insert(other, Slot::function("f", 0), Registration::Function(noop));
        assert_eq!(registered(owner), 2);

        assert_eq!(release_owner(owner), 2);
        assert_eq!(registered(owner), 0);
        assert_eq!(registered(other), 1);
        assert!(release(other, &Slot::function("F", 0)));
    }

    #[test]
    fn test_busy_trampoline_unregistered_stops() {
        let owner = ConnectionId::next();
        let rc = unsafe { busy_trampoline(owner.as_user_data(), 0) };
        assert_eq!(rc, 0);
    }

    #[test]
    fn test_busy_trampoline_contains_panic() {
        let owner = ConnectionId::next();
        insert(
            owner,
            Slot::BusyHandler,
            Registration::Busy(Arc::new(|_: u32| -> bool { panic!("handler exploded") })),
        );

        let rc = unsafe { busy_trampoline(owner.as_user_data(), 1) };
        assert_eq!(rc, 0);
        release_owner(owner);
    }

    #[test]
    fn test_busy_trampoline_passes_attempts() {
        let owner = ConnectionId::next();
        insert(
            owner,
            Slot::BusyHandler,
            Registration::Busy(Arc::new(|attempts: u32| attempts < 2)),
        );

        assert_eq!(unsafe { busy_trampoline(owner.as_user_data(), 0) }, 1);
        assert_eq!(unsafe { busy_trampoline(owner.as_user_data(), 2) }, 0);
        release_owner(owner);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(&*payload), "static message");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(&*payload), "owned message");

        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(&*payload), "unknown panic payload");
    }
}
