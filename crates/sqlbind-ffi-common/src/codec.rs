//! Text/blob codec for values crossing the C boundary
//!
//! Outbound values are described as `(pointer, byte length)` pairs that the
//! native side copies immediately. Inbound values are always read as a pointer
//! plus a separately queried byte length, never by scanning for a terminator,
//! so embedded NUL bytes survive.
//!
//! # Null vs. zero length
//!
//! - A zero (or negative) length decodes to an empty value, even when the
//!   native side returned a null pointer for it
//! - A null pointer with a non-zero length decodes to an absent value (`None`)
//! - Outbound empty values use a non-null pointer so the native library does
//!   not mistake them for SQL NULL

use std::ffi::CStr;
use std::marker::PhantomData;
use std::os::raw::{c_char, c_int, c_void};
use std::slice;

use thiserror::Error;

/// Backing storage for zero-length outbound values.
static EMPTY: [u8; 1] = [0];

/// Errors raised while converting values across the boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A C string argument contained a NUL byte
    #[error("string contains an interior NUL byte at offset {position}")]
    InteriorNul { position: usize },

    /// Native text was not valid UTF-8
    #[error("native text is not valid UTF-8 (valid up to byte {valid_up_to})")]
    InvalidUtf8 { valid_up_to: usize },

    /// The value does not fit the native `int` length parameter
    #[error("value of {len} bytes exceeds the native length limit")]
    TooLarge { len: usize },
}

/// A managed buffer described in native terms.
///
/// The buffer borrows the managed value it was encoded from, so it cannot be
/// retained past the lifetime of that value.
#[derive(Debug, Clone, Copy)]
pub struct NativeBuffer<'a> {
    ptr: *const u8,
    len: c_int,
    _source: PhantomData<&'a [u8]>,
}

impl<'a> NativeBuffer<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self, CodecError> {
        let len = c_int::try_from(bytes.len()).map_err(|_| CodecError::TooLarge { len: bytes.len() })?;
        let ptr = if bytes.is_empty() {
            EMPTY.as_ptr()
        } else {
            bytes.as_ptr()
        };
        Ok(Self {
            ptr,
            len,
            _source: PhantomData,
        })
    }

    /// Pointer for `const char*` parameters.
    pub fn as_char_ptr(&self) -> *const c_char {
        self.ptr as *const c_char
    }

    /// Pointer for `const void*` parameters.
    pub fn as_void_ptr(&self) -> *const c_void {
        self.ptr as *const c_void
    }

    /// Byte length for the native `int n` parameter.
    pub fn len(&self) -> c_int {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Describe UTF-8 text as a native `(pointer, length)` pair.
///
/// # Example
/// ```
/// use sqlbind_ffi_common::encode_text;
///
/// let buf = encode_text("hé").unwrap();
/// assert_eq!(buf.len(), 3);
/// assert!(!buf.as_char_ptr().is_null());
/// ```
pub fn encode_text(s: &str) -> Result<NativeBuffer<'_>, CodecError> {
    NativeBuffer::new(s.as_bytes())
}

/// Describe a byte sequence as a native `(pointer, length)` pair.
pub fn encode_blob(bytes: &[u8]) -> Result<NativeBuffer<'_>, CodecError> {
    NativeBuffer::new(bytes)
}

/// Borrow `len` bytes at `ptr`, applying the null/zero-length convention.
///
/// # Safety
/// If `ptr` is non-null and `len > 0`, `ptr` must be valid for `len` bytes.
unsafe fn native_bytes<'a>(ptr: *const u8, len: c_int) -> Option<&'a [u8]> {
    if len <= 0 {
        return Some(&[]);
    }
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { slice::from_raw_parts(ptr, len as usize) })
}

/// Copy native text of a known byte length into an owned `String`.
///
/// # Returns
/// `Ok(None)` for a null pointer with non-zero length, `Ok(Some(""))` for a
/// zero length, `Err(InvalidUtf8)` if the bytes are not UTF-8.
///
/// # Safety
/// If `ptr` is non-null and `len > 0`, `ptr` must be valid for `len` bytes.
pub unsafe fn decode_text(ptr: *const u8, len: c_int) -> Result<Option<String>, CodecError> {
    match unsafe { native_bytes(ptr, len) } {
        None => Ok(None),
        Some(bytes) => std::str::from_utf8(bytes)
            .map(|s| Some(s.to_owned()))
            .map_err(|e| CodecError::InvalidUtf8 {
                valid_up_to: e.valid_up_to(),
            }),
    }
}

/// Copy a native byte sequence of a known length into an owned `Vec`.
///
/// # Safety
/// If `ptr` is non-null and `len > 0`, `ptr` must be valid for `len` bytes.
pub unsafe fn decode_blob(ptr: *const u8, len: c_int) -> Option<Vec<u8>> {
    unsafe { native_bytes(ptr, len) }.map(<[u8]>::to_vec)
}

/// Copy a NUL-terminated native string into an owned `String`.
///
/// A null pointer decodes to `None`.
///
/// # Safety
/// The pointer must be null or point to a valid NUL-terminated string.
pub unsafe fn decode_cstr(ptr: *const c_char) -> Result<Option<String>, CodecError> {
    if ptr.is_null() {
        return Ok(None);
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map(|s| Some(s.to_owned()))
        .map_err(|e| CodecError::InvalidUtf8 {
            valid_up_to: e.valid_up_to(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::ptr;

    #[test]
    fn test_encode_empty_text_is_non_null() {
        let buf = encode_text("").unwrap();
        assert!(!buf.as_char_ptr().is_null());
        assert_eq!(buf.len(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_empty_blob_is_non_null() {
        let buf = encode_blob(&[]).unwrap();
        assert!(!buf.as_void_ptr().is_null());
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn test_encode_text_uses_byte_length() {
        let buf = encode_text("日本").unwrap();
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn test_decode_text_null_pointer_is_absent() {
        let result = unsafe { decode_text(ptr::null(), 4) }.unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_decode_text_zero_length_is_empty() {
        let result = unsafe { decode_text(ptr::null(), 0) }.unwrap();
        assert_eq!(result, Some(String::new()));
    }

    #[test]
    fn test_decode_text_keeps_embedded_nul() {
        let bytes = b"a\0b";
        let result = unsafe { decode_text(bytes.as_ptr(), 3) }.unwrap();
        assert_eq!(result.as_deref(), Some("a\0b"));
    }

    #[test]
    fn test_decode_text_invalid_utf8() {
        let bytes = [b'o', b'k', 0xff];
        let err = unsafe { decode_text(bytes.as_ptr(), 3) }.unwrap_err();
        assert_eq!(err, CodecError::InvalidUtf8 { valid_up_to: 2 });
    }

    #[test]
    fn test_decode_blob_conventions() {
        assert_eq!(unsafe { decode_blob(ptr::null(), 0) }, Some(Vec::new()));
        assert_eq!(unsafe { decode_blob(ptr::null(), 3) }, None);

        let bytes = [0u8, 1, 0];
        assert_eq!(unsafe { decode_blob(bytes.as_ptr(), 3) }, Some(vec![0, 1, 0]));
    }

    #[test]
    fn test_decode_cstr_null() {
        let result = unsafe { decode_cstr(ptr::null()) }.unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_decode_cstr_valid() {
        let s = CString::new("3.46.0").unwrap();
        let result = unsafe { decode_cstr(s.as_ptr()) }.unwrap();
        assert_eq!(result.as_deref(), Some("3.46.0"));
    }
}
