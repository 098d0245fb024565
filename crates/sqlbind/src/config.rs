//! Binding configuration
//!
//! Plain serde structs with defaults; the caller decides where the JSON comes
//! from.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::native::{self, NativeBinding};
use crate::types::OpenFlags;

/// Where the native library comes from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LibrarySource {
    /// The engine linked into this binary
    #[default]
    Bundled,
    /// Platform default lookup of the shared library by its conventional names
    System,
    /// An explicit shared library artifact
    Path { path: PathBuf },
}

/// Options applied when a connection is opened
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenOptions {
    /// Native open flags
    pub flags: OpenFlags,
    /// Name of the VFS module to use (`None` for the default)
    pub vfs: Option<String>,
    /// Busy timeout installed right after opening
    pub busy_timeout_ms: Option<u32>,
}

impl OpenOptions {
    pub fn with_flags(flags: OpenFlags) -> Self {
        Self {
            flags,
            ..Default::default()
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    pub library: LibrarySource,
    pub open: OpenOptions,
}

impl BindingConfig {
    /// Parse configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Install the configured library as the process-wide binding.
    ///
    /// Must run before the first connection is created.
    pub fn install(&self) -> Result<&'static NativeBinding> {
        Ok(native::install(&self.library)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = BindingConfig::default();
        assert_eq!(config.library, LibrarySource::Bundled);
        assert_eq!(config.open.flags, OpenFlags::READ_WRITE | OpenFlags::CREATE);
        assert_eq!(config.open.vfs, None);
        assert_eq!(config.open.busy_timeout_ms, None);
    }

    #[test]
    fn test_from_json() {
        let config = BindingConfig::from_json(
            r#"{
                "library": { "kind": "path", "path": "/opt/lib/libsqlite3.so" },
                "open": { "flags": 1, "busy_timeout_ms": 250 }
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.library,
            LibrarySource::Path {
                path: PathBuf::from("/opt/lib/libsqlite3.so")
            }
        );
        assert_eq!(config.open.flags, OpenFlags::READ_ONLY);
        assert_eq!(config.open.busy_timeout_ms, Some(250));
    }

    #[test]
    fn test_from_json_empty_object_uses_defaults() {
        let config = BindingConfig::from_json("{}").unwrap();
        assert_eq!(config, BindingConfig::default());
    }

    #[test]
    fn test_from_json_invalid() {
        let err = BindingConfig::from_json(r#"{ "library": { "kind": "magic" } }"#).unwrap_err();
        assert!(matches!(err, crate::BindError::Config(_)));
    }
}
