//! Call marshalling
//!
//! Every native call goes through a [`Marshaller`], which applies one of a
//! fixed set of result policies:
//!
//! - `void`: nothing to interpret
//! - `raw`: the native return value is passed through unchecked
//! - `checked`: only `SQLITE_OK` is success
//! - `stepped`: `SQLITE_ROW` and `SQLITE_DONE` are success (step only)
//! - `string`: a NUL-terminated pointer, decoded as UTF-8 (null is absent)
//!
//! Engine failures carry the diagnostic text of the connection the call was
//! made on, or the generic text for the code when there is no connection.

use std::os::raw::{c_char, c_int};
use std::ptr::NonNull;

use sqlbind_ffi_common::decode_cstr;
use tracing::{debug, trace};

use crate::error::{EngineError, InfrastructureError, Result};
use crate::native::{NativeApi, RawConnection};
use crate::types::{ResultCode, StepResult};

#[derive(Clone, Copy)]
pub(crate) struct Marshaller<'a> {
    api: &'a NativeApi,
    db: Option<NonNull<RawConnection>>,
}

impl<'a> Marshaller<'a> {
    /// Calls that do not belong to a connection (or happen before one exists)
    pub(crate) fn detached(api: &'a NativeApi) -> Self {
        Self { api, db: None }
    }

    /// Calls made on behalf of the connection `db`
    pub(crate) fn scoped(api: &'a NativeApi, db: NonNull<RawConnection>) -> Self {
        Self { api, db: Some(db) }
    }

    pub(crate) fn void(self, operation: &'static str, call: impl FnOnce(&NativeApi)) {
        trace!("native call {}", operation);
        call(self.api);
    }

    pub(crate) fn raw<T>(self, operation: &'static str, call: impl FnOnce(&NativeApi) -> T) -> T {
        trace!("native call {}", operation);
        call(self.api)
    }

    pub(crate) fn checked(
        self,
        operation: &'static str,
        call: impl FnOnce(&NativeApi) -> c_int,
    ) -> Result<()> {
        let rc = self.raw(operation, call);
        match ResultCode::classify(rc) {
            ResultCode::Ok => Ok(()),
            _ => Err(self.engine_error(operation, rc).into()),
        }
    }

    pub(crate) fn stepped(
        self,
        operation: &'static str,
        call: impl FnOnce(&NativeApi) -> c_int,
    ) -> Result<StepResult> {
        let rc = self.raw(operation, call);
        match ResultCode::classify(rc) {
            ResultCode::Row => Ok(StepResult::Row),
            ResultCode::Done => Ok(StepResult::Done),
            _ => Err(self.engine_error(operation, rc).into()),
        }
    }

    pub(crate) fn string(
        self,
        operation: &'static str,
        call: impl FnOnce(&NativeApi) -> *const c_char,
    ) -> Result<Option<String>> {
        let ptr = self.raw(operation, call);
        // SAFETY: string-returning exports hand out null or a NUL-terminated
        // string that stays valid until the next call on the same object.
        Ok(unsafe { decode_cstr(ptr) }?)
    }

    /// Like [`Marshaller::string`] for exports documented to never return null.
    pub(crate) fn required_string(
        self,
        operation: &'static str,
        call: impl FnOnce(&NativeApi) -> *const c_char,
    ) -> Result<String> {
        self.string(operation, call)?
            .ok_or_else(|| InfrastructureError::NullReturn { operation }.into())
    }

    /// Build the engine error for a failed call, reading the diagnostic text
    /// before any other call on the connection can overwrite it.
    pub(crate) fn engine_error(self, operation: &'static str, rc: c_int) -> EngineError {
        let text = match self.db {
            // SAFETY: `db` is an open connection for as long as this marshaller exists.
            Some(db) => unsafe { decode_cstr((self.api.errmsg)(db.as_ptr())) },
            // SAFETY: errstr accepts any code and returns a static string.
            None => unsafe { decode_cstr((self.api.errstr)(rc)) },
        };
        let message = text
            .ok()
            .flatten()
            .unwrap_or_else(|| format!("result code {}", rc));

        debug!("{} failed with code {}: {}", operation, rc, message);
        EngineError::new(rc, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native;
    use crate::types::codes;
    use crate::BindError;
    use pretty_assertions::assert_eq;

    fn detached() -> Marshaller<'static> {
        Marshaller::detached(native::binding().unwrap().api())
    }

    #[test]
    fn test_checked_accepts_only_ok() {
        let call = detached();
        assert!(call.checked("ok", |_| codes::OK).is_ok());

        let err = call.checked("row", |_| codes::ROW).unwrap_err();
        assert_eq!(err.as_engine().map(|e| e.code), Some(codes::ROW));
    }

    #[test]
    fn test_stepped_success_set() {
        let call = detached();
        assert_eq!(call.stepped("step", |_| codes::ROW).unwrap(), StepResult::Row);
        assert_eq!(call.stepped("step", |_| codes::DONE).unwrap(), StepResult::Done);
        assert!(call.stepped("step", |_| codes::OK).is_err());
        assert!(call.stepped("step", |_| codes::BUSY).unwrap_err().as_engine().unwrap().is_busy());
    }

    #[test]
    fn test_detached_error_uses_generic_text() {
        let err = detached().engine_error("test", codes::CANTOPEN);
        assert_eq!(err.code, codes::CANTOPEN);
        assert_eq!(err.message, "unable to open database file");
    }

    #[test]
    fn test_string_null_is_absent() {
        let result = detached().string("null", |_| std::ptr::null()).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_required_string_null_is_infrastructure_error() {
        let err = detached()
            .required_string("sqlite3_null", |_| std::ptr::null())
            .unwrap_err();
        assert!(matches!(
            err,
            BindError::Infrastructure(InfrastructureError::NullReturn {
                operation: "sqlite3_null"
            })
        ));
    }

    #[test]
    fn test_void_invokes_call() {
        let mut called = false;
        detached().void("noop", |_| called = true);
        assert!(called);
    }
}
