//! Value and code types shared by the binding layer
//!
//! Numeric constants mirror the native library's documented ABI; they are
//! declared here once and never repeated at call sites.

use std::fmt;
use std::ops::BitOr;
use std::os::raw::c_int;

use serde::{Deserialize, Serialize};

/// Native result codes.
pub mod codes {
    pub const OK: i32 = 0;
    pub const ERROR: i32 = 1;
    pub const INTERNAL: i32 = 2;
    pub const PERM: i32 = 3;
    pub const ABORT: i32 = 4;
    pub const BUSY: i32 = 5;
    pub const LOCKED: i32 = 6;
    pub const NOMEM: i32 = 7;
    pub const READONLY: i32 = 8;
    pub const INTERRUPT: i32 = 9;
    pub const IOERR: i32 = 10;
    pub const CORRUPT: i32 = 11;
    pub const NOTFOUND: i32 = 12;
    pub const FULL: i32 = 13;
    pub const CANTOPEN: i32 = 14;
    pub const PROTOCOL: i32 = 15;
    pub const SCHEMA: i32 = 17;
    pub const TOOBIG: i32 = 18;
    pub const CONSTRAINT: i32 = 19;
    pub const MISMATCH: i32 = 20;
    pub const MISUSE: i32 = 21;
    pub const RANGE: i32 = 25;
    pub const NOTADB: i32 = 26;
    pub const ROW: i32 = 100;
    pub const DONE: i32 = 101;
}

/// Destructor argument telling the library to copy a value before returning.
pub(crate) const TRANSIENT: isize = -1;

/// Text encoding flag for function registration.
pub(crate) const UTF8: c_int = 1;

/// Classification of a native result code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    Row,
    Done,
    Busy,
    Error(i32),
}

impl ResultCode {
    pub fn classify(code: c_int) -> Self {
        match code {
            codes::OK => ResultCode::Ok,
            codes::ROW => ResultCode::Row,
            codes::DONE => ResultCode::Done,
            c if c & 0xff == codes::BUSY => ResultCode::Busy,
            c => ResultCode::Error(c),
        }
    }
}

/// Outcome of a successful step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// A result row is available
    Row,
    /// The statement ran to completion
    Done,
}

/// Fundamental datatype of a column value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Blob,
    Null,
}

impl ColumnType {
    pub(crate) fn from_code(code: c_int) -> Self {
        match code {
            1 => ColumnType::Integer,
            2 => ColumnType::Float,
            3 => ColumnType::Text,
            4 => ColumnType::Blob,
            _ => ColumnType::Null,
        }
    }
}

/// Dynamically typed value exchanged with user functions
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Null => ColumnType::Null,
            Value::Integer(_) => ColumnType::Integer,
            Value::Real(_) => ColumnType::Float,
            Value::Text(_) => ColumnType::Text,
            Value::Blob(_) => ColumnType::Blob,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Flags for opening a connection
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpenFlags(i32);

impl OpenFlags {
    pub const READ_ONLY: OpenFlags = OpenFlags(0x0000_0001);
    pub const READ_WRITE: OpenFlags = OpenFlags(0x0000_0002);
    pub const CREATE: OpenFlags = OpenFlags(0x0000_0004);
    pub const URI: OpenFlags = OpenFlags(0x0000_0040);
    pub const MEMORY: OpenFlags = OpenFlags(0x0000_0080);
    pub const NO_MUTEX: OpenFlags = OpenFlags(0x0000_8000);
    pub const FULL_MUTEX: OpenFlags = OpenFlags(0x0001_0000);
    pub const SHARED_CACHE: OpenFlags = OpenFlags(0x0002_0000);
    pub const PRIVATE_CACHE: OpenFlags = OpenFlags(0x0004_0000);

    pub const fn from_bits(bits: i32) -> Self {
        OpenFlags(bits)
    }

    pub const fn bits(self) -> i32 {
        self.0
    }

    pub const fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        OpenFlags::READ_WRITE | OpenFlags::CREATE
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for OpenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpenFlags({:#x})", self.0)
    }
}

/// Flags for registering a user function (the UTF-8 encoding flag is implied)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FunctionFlags(i32);

impl FunctionFlags {
    pub const DETERMINISTIC: FunctionFlags = FunctionFlags(0x0000_0800);
    pub const DIRECT_ONLY: FunctionFlags = FunctionFlags(0x0008_0000);
    pub const INNOCUOUS: FunctionFlags = FunctionFlags(0x0020_0000);

    pub const fn empty() -> Self {
        FunctionFlags(0)
    }

    pub(crate) fn text_rep(self) -> c_int {
        UTF8 | self.0
    }
}

impl BitOr for FunctionFlags {
    type Output = FunctionFlags;

    fn bitor(self, rhs: FunctionFlags) -> FunctionFlags {
        FunctionFlags(self.0 | rhs.0)
    }
}

/// Run-time limit categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Limit {
    Length = 0,
    SqlLength = 1,
    Column = 2,
    ExprDepth = 3,
    CompoundSelect = 4,
    VdbeOp = 5,
    FunctionArg = 6,
    Attached = 7,
    LikePatternLength = 8,
    VariableNumber = 9,
    TriggerDepth = 10,
    WorkerThreads = 11,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_result_codes() {
        assert_eq!(ResultCode::classify(0), ResultCode::Ok);
        assert_eq!(ResultCode::classify(100), ResultCode::Row);
        assert_eq!(ResultCode::classify(101), ResultCode::Done);
        assert_eq!(ResultCode::classify(5), ResultCode::Busy);
        // SQLITE_BUSY_RECOVERY
        assert_eq!(ResultCode::classify(5 | (1 << 8)), ResultCode::Busy);
        assert_eq!(ResultCode::classify(19), ResultCode::Error(19));
    }

    #[test]
    fn test_column_type_codes() {
        assert_eq!(ColumnType::from_code(1), ColumnType::Integer);
        assert_eq!(ColumnType::from_code(2), ColumnType::Float);
        assert_eq!(ColumnType::from_code(3), ColumnType::Text);
        assert_eq!(ColumnType::from_code(4), ColumnType::Blob);
        assert_eq!(ColumnType::from_code(5), ColumnType::Null);
    }

    #[test]
    fn test_open_flags() {
        let flags = OpenFlags::default();
        assert!(flags.contains(OpenFlags::READ_WRITE));
        assert!(flags.contains(OpenFlags::CREATE));
        assert!(!flags.contains(OpenFlags::READ_ONLY));
        assert_eq!(flags.bits(), 0x6);
    }

    #[test]
    fn test_function_flags_always_utf8() {
        assert_eq!(FunctionFlags::empty().text_rep(), 1);
        assert_eq!(FunctionFlags::DETERMINISTIC.text_rep(), 0x801);
    }

    #[test]
    fn test_value_from_option() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".into()));
    }
}
