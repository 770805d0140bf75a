//! Error types for native library bootstrap.
//!
//! Fatal setup failures, library load failures and configuration problems
//! all surface through [`NativeError`]. Missing CUDA symbols are not an
//! error: they degrade the capability record instead.

use std::io;
use thiserror::Error;

/// Error type for native runtime initialization.
#[derive(Debug, Error)]
pub enum NativeError {
    /// A CUDA device is present but no native library could be loaded.
    #[error(
        "CUDA setup failed despite GPU being available. Please run `bnb-diagnose` to get more \
         information. Inspect its output and see if you can locate CUDA libraries. You might \
         need to add them to your LD_LIBRARY_PATH.\n\n{instructions}"
    )]
    SetupFailed {
        /// Remedies produced by the setup collaborator.
        instructions: String,
    },

    /// The dynamic loader refused to open a library.
    #[error("failed to load native library '{path}': {reason}")]
    LibraryLoad {
        /// Path that was passed to the loader.
        path: String,
        /// Loader diagnostic (`dlerror` text on unix).
        reason: String,
    },

    /// Configuration parsing error with line number.
    #[error("configuration error at line {line}: {message}")]
    ConfigParse {
        /// Line number where the error occurred (1-indexed).
        line: usize,
        /// Error message describing the issue.
        message: String,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {0}")]
    ConfigNotFound(String),

    /// Invalid configuration value.
    #[error("invalid configuration value for '{key}': {message}")]
    ConfigInvalid {
        /// The configuration key with invalid value.
        key: String,
        /// Error message describing why the value is invalid.
        message: String,
    },

    /// I/O error while resolving paths.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for native runtime operations.
pub type Result<T> = std::result::Result<T, NativeError>;
