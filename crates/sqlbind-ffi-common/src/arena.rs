//! Scoped native memory regions
//!
//! A [`NativeArena`] hands out temporary memory for arguments that must live in
//! native-readable form for the duration of a call: NUL-terminated strings,
//! and output parameters. Everything allocated from an arena is
//! released together when the arena is dropped, on every exit path of the
//! scope that created it (normal return, early `?` return or unwinding).
//!
//! The arena is `!Sync`, so a region can never be shared across
//! threads, and every allocation borrows from the arena, so no pointer handed
//! out by it can be used after the region is gone.

use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr;

use bumpalo::Bump;

use crate::codec::CodecError;

/// A scoped region of temporary native memory.
#[derive(Default)]
pub struct NativeArena {
    bump: Bump,
}

impl NativeArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self { bump: Bump::new() }
    }

    /// Run `f` with a fresh arena that is released when `f` returns or unwinds.
    ///
    /// # Example
    /// ```
    /// use sqlbind_ffi_common::NativeArena;
    ///
    /// let len = NativeArena::scoped(|arena| {
    ///     let name = arena.alloc_cstr("main").unwrap();
    ///     name.to_bytes().len()
    /// });
    /// assert_eq!(len, 4);
    /// ```
    pub fn scoped<R>(f: impl FnOnce(&NativeArena) -> R) -> R {
        let arena = NativeArena::new();
        f(&arena)
    }

    /// Copy `s` into the arena as a NUL-terminated C string.
    ///
    /// Fails with [`CodecError::InteriorNul`] if `s` contains a NUL byte, since
    /// the native side would silently truncate it.
    pub fn alloc_cstr(&self, s: &str) -> Result<&CStr, CodecError> {
        if let Some(position) = s.bytes().position(|b| b == 0) {
            return Err(CodecError::InteriorNul { position });
        }

        let bytes = self.bump.alloc_slice_fill_copy(s.len() + 1, 0u8);
        bytes[..s.len()].copy_from_slice(s.as_bytes());

        CStr::from_bytes_with_nul(bytes).map_err(|_| CodecError::InteriorNul { position: s.len() })
    }

    /// Allocate a null-initialized output pointer slot (`T**` on the C side).
    pub fn alloc_out_ptr<T>(&self) -> &mut *mut T {
        self.bump.alloc(ptr::null_mut())
    }

    /// Allocate a null-initialized `const char*` output slot.
    pub fn alloc_out_cstr(&self) -> &mut *const c_char {
        self.bump.alloc(ptr::null())
    }

    /// Total bytes currently reserved by the region.
    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }
}

#[cfg(test)]
thread_local! {
    static RELEASED: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

#[cfg(test)]
impl Drop for NativeArena {
    fn drop(&mut self) {
        RELEASED.with(|released| released.set(released.get() + 1));
    }
}

impl std::fmt::Debug for NativeArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeArena")
            .field("allocated_bytes", &self.allocated_bytes())
            .finish()
    }
}
