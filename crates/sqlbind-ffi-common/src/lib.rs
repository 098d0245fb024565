//! Common FFI utilities for C ABI bindings.
//!
//! This crate provides the engine-agnostic half of the `sqlbind` binding layer:
//! scoped native memory regions and the text/blob codec used to move values
//! across the C boundary.
//!
//! # Memory Ownership
//!
//! - Memory handed out by [`NativeArena`] belongs to the arena and is released
//!   exactly once, when the arena is dropped
//! - Borrowed [`NativeBuffer`]s point into managed memory and are only valid
//!   for the duration of the native call they are passed to
//! - Pointers returned by the native library are never freed here; the
//!   `decode_*` functions copy their contents into owned values

pub mod arena;
pub mod codec;

pub use arena::NativeArena;
pub use codec::{
    decode_blob, decode_cstr, decode_text, encode_blob, encode_text, CodecError, NativeBuffer,
};
