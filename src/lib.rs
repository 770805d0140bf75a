//! # bitsandbytes-native
//!
//! Startup bootstrap for the bitsandbytes native kernel library.
//!
//! Detects the host accelerator environment (Apple GPU backend vs. CUDA),
//! locates the matching precompiled `libbitsandbytes_*` binary, loads it,
//! probes its exported symbols and produces an immutable capability record.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bitsandbytes_native::prelude::*;
//!
//! let config = RuntimeConfig::from_env()?;
//! let runtime = NativeRuntime::initialize(&config)?;
//!
//! if runtime.compiled_with_cuda() {
//!     // 8-bit optimizers and GPU quantization are available
//! }
//! # Ok::<(), bitsandbytes_native::NativeError>(())
//! ```
//!
//! ## Environment
//!
//! - `BITSANDBYTES_NOWELCOME`: suppress the setup log unless set to `0`
//! - `BNB_LIBRARY_DIR`: directory holding the binaries
//! - `BNB_CUDA_VERSION`: pin a CUDA build, e.g. `118`
//! - `BNB_DEBUG`: echo setup log entries as they are recorded
//! - `BNB_CONFIG`: YAML configuration file

#![warn(missing_docs)]
// Allow unwrap() in tests only - banned in production code
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]

/// Runtime configuration (YAML file + environment).
pub mod config;

/// Error types.
pub mod error;

/// Dynamic library loading.
pub mod library;

/// Setup log stack.
pub mod log;

/// Host accelerator detection.
pub mod platform;

/// Native runtime initialization and capability record.
pub mod runtime;

/// Library location for the CUDA path.
pub mod setup;

pub use error::{NativeError, Result};

/// Commonly used types and traits for convenient imports.
pub mod prelude {
    pub use crate::config::RuntimeConfig;
    pub use crate::error::{NativeError, Result};
    pub use crate::library::NativeLibrary;
    pub use crate::platform::{Backend, HostProbe, StaticProbe, SystemProbe};
    pub use crate::runtime::{Capabilities, NativeRuntime};
    pub use crate::setup::{CudaSetup, LibrarySetup};
}
