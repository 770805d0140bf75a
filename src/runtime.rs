//! Native runtime initialization.
//!
//! [`NativeRuntime`] is built once at startup and handed to consumers by
//! reference. It owns the loaded library and the [`Capabilities`] derived
//! from it; both are immutable afterwards.
//!
//! ## Branches
//!
//! - **MPS**: load `libbitsandbytes_cpu` from the library directory. Failure
//!   is fatal. No symbol probing.
//! - **CUDA**: run [`LibrarySetup`]. No library while a GPU is present is
//!   fatal. Otherwise the required symbols plus `get_context` and
//!   `get_cusparse` decide `compiled_with_cuda`, with a warning when any is
//!   missing.

use crate::config::RuntimeConfig;
use crate::error::{NativeError, Result};
use crate::library::NativeLibrary;
use crate::log::{emit_warning, SetupLog};
use crate::platform::{Backend, HostProbe, SystemProbe};
use crate::setup::{library_file_name, CudaSetup, LibrarySetup};
use std::ffi::c_void;
use std::io::{self, Write};
use std::path::PathBuf;

const COMPONENT: &str = "runtime";

/// Entry points every GPU build must export, on top of the configured list.
pub const ENTRY_POINT_SYMBOLS: &[&str] = &["get_context", "get_cusparse"];

/// Warning emitted when the loaded library lacks the CUDA entry points.
pub const NO_GPU_SUPPORT_WARNING: &str = "The installed version of bitsandbytes was compiled \
     without GPU support. 8-bit optimizers, 8-bit multiplication, and GPU quantization are \
     unavailable.";

/// What the loaded native library can do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Branch that produced this record.
    pub backend: Backend,
    /// True iff a library was loaded on the CUDA branch, every required
    /// symbol resolved and the typed entry points are available.
    pub compiled_with_cuda: bool,
    /// Path of the loaded library, if any.
    pub library_path: Option<PathBuf>,
    /// Required symbols and entry points that did not resolve. Empty on the
    /// MPS branch.
    pub missing_symbols: Vec<String>,
}

impl Capabilities {
    /// One-line description for diagnostics.
    #[must_use]
    pub fn summary(&self) -> String {
        let library = self
            .library_path
            .as_ref()
            .map_or_else(|| "no library".to_string(), |p| p.display().to_string());
        let gpu = if self.compiled_with_cuda { "GPU kernels available" } else { "CPU only" };
        format!("backend={} library={} ({})", self.backend, library, gpu)
    }
}

type HandleFn = unsafe extern "C" fn() -> *mut c_void;

/// Typed CUDA entry points exported by a GPU build of the library.
#[derive(Clone, Copy)]
pub struct CudaEntryPoints {
    get_context: HandleFn,
    get_cusparse: HandleFn,
}

impl std::fmt::Debug for CudaEntryPoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaEntryPoints").finish_non_exhaustive()
    }
}

impl CudaEntryPoints {
    #[allow(unsafe_code)]
    fn resolve(lib: &NativeLibrary) -> Option<Self> {
        // SAFETY: both symbols are `void* fn(void)` in the native library.
        unsafe {
            Some(Self {
                get_context: lib.function::<HandleFn>(ENTRY_POINT_SYMBOLS[0])?,
                get_cusparse: lib.function::<HandleFn>(ENTRY_POINT_SYMBOLS[1])?,
            })
        }
    }
}

/// The initialized native runtime.
#[derive(Debug)]
pub struct NativeRuntime {
    capabilities: Capabilities,
    cuda: Option<CudaEntryPoints>,
    log: SetupLog,
    // Declared last: entry points above must not outlive the handle.
    library: Option<NativeLibrary>,
}

impl NativeRuntime {
    /// Initializes against the real host with the default library setup.
    ///
    /// Only `config` is consulted. Environment overrides such as
    /// `BITSANDBYTES_NOWELCOME` take effect when the config comes from
    /// [`RuntimeConfig::from_env`]; see [`NativeRuntime::from_env`].
    ///
    /// # Errors
    ///
    /// See [`NativeRuntime::initialize_with`].
    pub fn initialize(config: &RuntimeConfig) -> Result<Self> {
        let mut setup = CudaSetup::from_config(config)?;
        Self::initialize_with(config, &SystemProbe::new(), &mut setup)
    }

    /// Builds the config from the process environment and initializes.
    ///
    /// # Errors
    ///
    /// Returns config errors from [`RuntimeConfig::from_env`], then see
    /// [`NativeRuntime::initialize_with`].
    pub fn from_env() -> Result<Self> {
        Self::initialize(&RuntimeConfig::from_env()?)
    }

    /// Initializes with an explicit host probe and library setup, printing
    /// to stderr.
    ///
    /// # Errors
    ///
    /// - [`NativeError::LibraryLoad`] if the MPS branch cannot open the CPU
    ///   library.
    /// - [`NativeError::SetupFailed`] if a CUDA device is available but setup
    ///   produced no library.
    pub fn initialize_with(
        config: &RuntimeConfig,
        probe: &dyn HostProbe,
        setup: &mut dyn LibrarySetup,
    ) -> Result<Self> {
        Self::initialize_with_output(config, probe, setup, &mut io::stderr().lock())
    }

    /// Like [`NativeRuntime::initialize_with`], printing the setup log and
    /// the degrade warning to `out`.
    ///
    /// The log stack is printed when `config.welcome` is set and always on
    /// a fatal setup failure. The degrade warning appears exactly once.
    ///
    /// # Errors
    ///
    /// See [`NativeRuntime::initialize_with`].
    pub fn initialize_with_output(
        config: &RuntimeConfig,
        probe: &dyn HostProbe,
        setup: &mut dyn LibrarySetup,
        out: &mut dyn Write,
    ) -> Result<Self> {
        let mut log = SetupLog::with_echo(config.debug);
        match Backend::select(probe) {
            Backend::Mps => Self::init_mps(config, log),
            Backend::Cuda => {
                let library = setup.run(&mut log);
                if library.is_none() && probe.cuda_available() {
                    let instructions = setup.instructions();
                    log.error(COMPONENT, "no native library loaded although a CUDA device is available");
                    log.print_to(out);
                    return Err(NativeError::SetupFailed { instructions });
                }

                let runtime = Self::init_cuda(config, library, log, out);
                // Printed after the checks so a failing setup does not print twice.
                if config.welcome {
                    runtime.log.print_to(out);
                }
                Ok(runtime)
            }
        }
    }

    fn init_mps(config: &RuntimeConfig, mut log: SetupLog) -> Result<Self> {
        let path = config.resolved_library_dir()?.join(library_file_name("cpu"));
        log.info(COMPONENT, format!("Loading binary {}...", path.display()));
        let library = NativeLibrary::open(&path)?;

        Ok(Self {
            capabilities: Capabilities {
                backend: Backend::Mps,
                compiled_with_cuda: false,
                library_path: Some(library.path().to_path_buf()),
                missing_symbols: Vec::new(),
            },
            cuda: None,
            log,
            library: Some(library),
        })
    }

    fn init_cuda(
        config: &RuntimeConfig,
        library: Option<NativeLibrary>,
        mut log: SetupLog,
        out: &mut dyn Write,
    ) -> Self {
        // The typed entry points are checked whatever the configured list says.
        let mut checked = config.required_symbols.clone();
        for name in ENTRY_POINT_SYMBOLS {
            if !checked.iter().any(|s| s == name) {
                checked.push((*name).to_string());
            }
        }
        let missing_symbols = match &library {
            Some(lib) => lib.missing_symbols(&checked),
            None => checked,
        };

        let cuda = if missing_symbols.is_empty() {
            library.as_ref().and_then(CudaEntryPoints::resolve)
        } else {
            None
        };
        let compiled_with_cuda = cuda.is_some();

        if compiled_with_cuda {
            log.info(COMPONENT, "CUDA kernels available");
        } else {
            if library.is_some() {
                log.debug(COMPONENT, format!("missing symbols: {}", missing_symbols.join(", ")));
            }
            log.warn(COMPONENT, NO_GPU_SUPPORT_WARNING);
            // The welcome print already carries it.
            if !config.welcome {
                emit_warning(out, COMPONENT, NO_GPU_SUPPORT_WARNING);
            }
        }

        Self {
            capabilities: Capabilities {
                backend: Backend::Cuda,
                compiled_with_cuda,
                library_path: library.as_ref().map(|lib| lib.path().to_path_buf()),
                missing_symbols,
            },
            cuda,
            log,
            library,
        }
    }

    /// The capability record.
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Whether GPU kernels are available.
    #[must_use]
    pub fn compiled_with_cuda(&self) -> bool {
        self.capabilities.compiled_with_cuda
    }

    /// Branch taken during initialization.
    #[must_use]
    pub fn backend(&self) -> Backend {
        self.capabilities.backend
    }

    /// The loaded library, if any.
    #[must_use]
    pub fn library(&self) -> Option<&NativeLibrary> {
        self.library.as_ref()
    }

    /// Diagnostics recorded during initialization.
    #[must_use]
    pub fn log(&self) -> &SetupLog {
        &self.log
    }

    /// Typed CUDA entry points, present iff [`NativeRuntime::compiled_with_cuda`].
    #[must_use]
    pub fn cuda(&self) -> Option<&CudaEntryPoints> {
        self.cuda.as_ref()
    }

    /// Opaque CUDA context handle from the native library.
    #[must_use]
    #[allow(unsafe_code)]
    pub fn context(&self) -> Option<*mut c_void> {
        // SAFETY: resolved from `library`, which lives as long as `self`.
        self.cuda.map(|entry| unsafe { (entry.get_context)() })
    }

    /// Opaque cuSPARSE handle from the native library.
    #[must_use]
    #[allow(unsafe_code)]
    pub fn cusparse(&self) -> Option<*mut c_void> {
        // SAFETY: resolved from `library`, which lives as long as `self`.
        self.cuda.map(|entry| unsafe { (entry.get_cusparse)() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::Level;
    use crate::platform::StaticProbe;

    /// Setup that hands out a prepared result.
    struct FixedSetup {
        library: Option<NativeLibrary>,
        runs: usize,
    }

    impl FixedSetup {
        fn none() -> Self {
            Self { library: None, runs: 0 }
        }
    }

    impl LibrarySetup for FixedSetup {
        fn run(&mut self, log: &mut SetupLog) -> Option<NativeLibrary> {
            self.runs += 1;
            log.info("setup", "fixed setup");
            self.library.take()
        }

        fn instructions(&self) -> String {
            "install a CUDA build".to_string()
        }
    }

    fn quiet() -> RuntimeConfig {
        RuntimeConfig { welcome: false, ..RuntimeConfig::new() }
    }

    #[test]
    fn test_gpu_without_library_is_fatal() {
        let mut setup = FixedSetup::none();
        let err = NativeRuntime::initialize_with(&quiet(), &StaticProbe::cuda(1), &mut setup)
            .unwrap_err();

        match err {
            NativeError::SetupFailed { instructions } => {
                assert_eq!(instructions, "install a CUDA build");
            }
            other => panic!("expected SetupFailed, got {other:?}"),
        }
        assert_eq!(setup.runs, 1);
    }

    #[test]
    fn test_no_gpu_no_library_degrades() {
        let mut setup = FixedSetup::none();
        let runtime =
            NativeRuntime::initialize_with(&quiet(), &StaticProbe::cpu_only(), &mut setup).unwrap();

        assert!(!runtime.compiled_with_cuda());
        assert_eq!(runtime.backend(), Backend::Cuda);
        assert!(runtime.library().is_none());
        assert!(runtime.context().is_none());
        assert_eq!(runtime.capabilities().missing_symbols, quiet().required_symbols);
        assert!(runtime.log().has_level(Level::Warn));
        assert!(runtime.log().render().contains("compiled without GPU support"));
    }

    fn text(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_welcome_prints_stack_with_warning_once() {
        let config = RuntimeConfig { welcome: true, ..RuntimeConfig::new() };
        let mut out = Vec::new();
        NativeRuntime::initialize_with_output(
            &config,
            &StaticProbe::cpu_only(),
            &mut FixedSetup::none(),
            &mut out,
        )
        .unwrap();

        let out = text(out);
        assert!(out.contains("[setup] fixed setup"), "stack missing: {out}");
        assert_eq!(out.matches("compiled without GPU support").count(), 1);
    }

    #[test]
    fn test_nowelcome_hides_stack_but_keeps_warning() {
        let mut out = Vec::new();
        NativeRuntime::initialize_with_output(
            &quiet(),
            &StaticProbe::cpu_only(),
            &mut FixedSetup::none(),
            &mut out,
        )
        .unwrap();

        let out = text(out);
        assert!(!out.contains("fixed setup"), "stack printed: {out}");
        assert_eq!(out.matches("compiled without GPU support").count(), 1);
    }

    #[test]
    fn test_fatal_prints_stack_even_with_nowelcome() {
        let mut out = Vec::new();
        let result = NativeRuntime::initialize_with_output(
            &quiet(),
            &StaticProbe::cuda(1),
            &mut FixedSetup::none(),
            &mut out,
        );

        assert!(result.is_err());
        let out = text(out);
        assert!(out.contains("[setup] fixed setup"));
        assert!(out.contains("no native library loaded"));
        assert_eq!(out.matches("compiled without GPU support").count(), 0);
    }

    #[test]
    fn test_mps_missing_cpu_library_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig { library_dir: Some(dir.path().to_path_buf()), ..quiet() };
        let mut setup = FixedSetup::none();

        let err =
            NativeRuntime::initialize_with(&config, &StaticProbe::mps(), &mut setup).unwrap_err();
        assert!(matches!(err, NativeError::LibraryLoad { .. }));
        assert_eq!(setup.runs, 0, "MPS branch must not run CUDA setup");
    }

    #[test]
    fn test_capabilities_summary() {
        let caps = Capabilities {
            backend: Backend::Cuda,
            compiled_with_cuda: true,
            library_path: Some(PathBuf::from("/opt/libbitsandbytes_cuda118.so")),
            missing_symbols: Vec::new(),
        };
        let summary = caps.summary();
        assert!(summary.contains("backend=cuda"));
        assert!(summary.contains("libbitsandbytes_cuda118"));
        assert!(summary.contains("GPU kernels available"));
    }

    #[test]
    fn test_capabilities_summary_without_library() {
        let caps = Capabilities {
            backend: Backend::Cuda,
            compiled_with_cuda: false,
            library_path: None,
            missing_symbols: vec!["cadam32bit_g32".to_string()],
        };
        assert!(caps.summary().contains("no library"));
        assert!(caps.summary().contains("CPU only"));
    }

    #[test]
    fn test_runtime_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NativeRuntime>();
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    mod glibc {
        use super::*;

        fn libc_setup() -> FixedSetup {
            FixedSetup { library: Some(NativeLibrary::open("libc.so.6").unwrap()), runs: 0 }
        }

        #[test]
        fn test_library_without_cuda_symbols_degrades() {
            let mut setup = libc_setup();
            let runtime =
                NativeRuntime::initialize_with(&quiet(), &StaticProbe::cuda(1), &mut setup)
                    .unwrap();

            assert!(!runtime.compiled_with_cuda());
            assert!(runtime.library().is_some());
            assert_eq!(runtime.capabilities().missing_symbols.len(), 3);
            assert!(runtime.cuda().is_none());
            assert!(runtime.log().render().contains("missing symbols: cadam32bit_g32"));
        }

        #[test]
        fn test_flag_needs_entry_points_beyond_configured_symbols() {
            let config = RuntimeConfig {
                required_symbols: vec!["malloc".to_string(), "free".to_string()],
                ..quiet()
            };
            let mut setup = libc_setup();
            let mut out = Vec::new();
            let runtime = NativeRuntime::initialize_with_output(
                &config,
                &StaticProbe::cpu_only(),
                &mut setup,
                &mut out,
            )
            .unwrap();

            // malloc and free resolve, but libc has no get_context/get_cusparse
            assert!(!runtime.compiled_with_cuda());
            assert_eq!(
                runtime.capabilities().missing_symbols,
                vec!["get_context".to_string(), "get_cusparse".to_string()]
            );
            assert_eq!(
                runtime.capabilities().library_path,
                Some(PathBuf::from("libc.so.6"))
            );
            assert!(runtime.cuda().is_none());
            assert!(runtime.context().is_none());
            assert!(runtime.cusparse().is_none());
            assert!(runtime.log().has_level(Level::Warn));
        }

        #[test]
        fn test_entry_points_listed_once_when_configured() {
            let config = RuntimeConfig {
                required_symbols: vec!["get_cusparse".to_string(), "malloc".to_string()],
                ..quiet()
            };
            let mut setup = libc_setup();
            let runtime = NativeRuntime::initialize_with_output(
                &config,
                &StaticProbe::cpu_only(),
                &mut setup,
                &mut Vec::new(),
            )
            .unwrap();

            assert_eq!(
                runtime.capabilities().missing_symbols,
                vec!["get_cusparse".to_string(), "get_context".to_string()]
            );
        }
    }
}
