//! Native library setup for the CUDA path.
//!
//! Finds a `libbitsandbytes_*` binary next to the application (or in the
//! configured directory), preferring the highest CUDA build available and
//! falling back to the CPU build. Every attempt is recorded in the
//! [`SetupLog`] so a failed setup can be explained to the user.

use crate::config::{RuntimeConfig, CUDA_VERSION_ENV, LIBRARY_DIR_ENV};
use crate::error::Result;
use crate::library::NativeLibrary;
use crate::log::SetupLog;
use std::path::{Path, PathBuf};

const COMPONENT: &str = "setup";
const LIBRARY_PREFIX: &str = "libbitsandbytes_";

/// Produces the native library handle for the CUDA path.
pub trait LibrarySetup {
    /// Locates and loads the library, recording progress in `log`.
    /// Returns `None` if nothing could be loaded.
    fn run(&mut self, log: &mut SetupLog) -> Option<NativeLibrary>;

    /// Human-readable remedies for a failed setup.
    fn instructions(&self) -> String;
}

/// File name of a native binary variant, e.g. `cpu` or `cuda118`.
#[must_use]
pub fn library_file_name(variant: &str) -> String {
    format!("{LIBRARY_PREFIX}{variant}.{}", std::env::consts::DLL_EXTENSION)
}

/// Extracts the CUDA version digits from a binary file name, e.g.
/// `libbitsandbytes_cuda118.so` gives `118`.
#[must_use]
pub fn cuda_version_of(file_name: &str) -> Option<&str> {
    let stem = file_name.strip_suffix(std::env::consts::DLL_EXTENSION)?.strip_suffix('.')?;
    let version = stem.strip_prefix(LIBRARY_PREFIX)?.strip_prefix("cuda")?;
    (!version.is_empty() && version.bytes().all(|b| b.is_ascii_digit())).then_some(version)
}

/// Orders discovered CUDA versions highest first. Versions compare
/// numerically, so `121` sorts above `118` and `92`.
pub fn sort_versions_descending(versions: &mut Vec<String>) {
    versions.sort_by(|a, b| {
        let key = |v: &str| v.trim_start_matches('0').len();
        key(b)
            .cmp(&key(a))
            .then_with(|| b.trim_start_matches('0').cmp(a.trim_start_matches('0')))
    });
    versions.dedup();
}

/// Library setup that searches a directory for CUDA and CPU builds.
#[derive(Debug, Clone)]
pub struct CudaSetup {
    library_dir: PathBuf,
    cuda_version: Option<String>,
}

impl CudaSetup {
    /// Creates a setup searching `library_dir`, optionally pinned to one
    /// CUDA version.
    #[must_use]
    pub fn new(library_dir: impl Into<PathBuf>, cuda_version: Option<String>) -> Self {
        Self { library_dir: library_dir.into(), cuda_version }
    }

    /// Creates a setup from runtime configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the library directory cannot be resolved.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self> {
        Ok(Self::new(config.resolved_library_dir()?, config.cuda_version.clone()))
    }

    /// Directory being searched.
    #[must_use]
    pub fn library_dir(&self) -> &Path {
        &self.library_dir
    }

    fn discovered_versions(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.library_dir) else {
            return Vec::new();
        };
        let mut versions: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                cuda_version_of(&name).map(str::to_string)
            })
            .collect();
        sort_versions_descending(&mut versions);
        versions
    }

    /// Paths to try, in order. A pinned CUDA version is the only CUDA
    /// candidate; otherwise every discovered CUDA build is listed highest
    /// first. The CPU build is always last.
    #[must_use]
    pub fn candidates(&self) -> Vec<PathBuf> {
        let versions = match &self.cuda_version {
            Some(version) => vec![version.clone()],
            None => self.discovered_versions(),
        };
        versions
            .iter()
            .map(|v| format!("cuda{v}"))
            .chain(std::iter::once("cpu".to_string()))
            .map(|variant| self.library_dir.join(library_file_name(&variant)))
            .collect()
    }
}

impl LibrarySetup for CudaSetup {
    fn run(&mut self, log: &mut SetupLog) -> Option<NativeLibrary> {
        if !self.library_dir.is_dir() {
            log.error(
                COMPONENT,
                format!("library directory {} does not exist", self.library_dir.display()),
            );
            return None;
        }
        if let Some(version) = &self.cuda_version {
            log.info(COMPONENT, format!("{CUDA_VERSION_ENV} override: using CUDA {version} binary"));
        }

        for path in self.candidates() {
            if !path.is_file() {
                log.debug(COMPONENT, format!("{} not found", path.display()));
                continue;
            }
            log.info(COMPONENT, format!("Loading binary {}...", path.display()));
            match NativeLibrary::open(&path) {
                Ok(lib) => return Some(lib),
                Err(e) => log.error(COMPONENT, e.to_string()),
            }
        }

        log.error(
            COMPONENT,
            format!("no loadable {LIBRARY_PREFIX}* binary in {}", self.library_dir.display()),
        );
        None
    }

    fn instructions(&self) -> String {
        let mut text = String::from("Possible remedies:\n");
        text.push_str(&format!(
            "  - point {LIBRARY_DIR_ENV} at the directory containing {} (searched: {})\n",
            library_file_name("cuda<version>"),
            self.library_dir.display()
        ));
        text.push_str(&format!(
            "  - set {CUDA_VERSION_ENV} to the CUDA version of an installed binary, e.g. 118\n"
        ));
        text.push_str("  - add the CUDA runtime libraries to LD_LIBRARY_PATH\n");
        text.push_str("  - run `bnb-diagnose` and include its output when reporting a bug\n");
        text
    }
}
