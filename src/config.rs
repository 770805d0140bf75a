//! Runtime configuration.
//!
//! Supports YAML configuration with precedence: CLI > ENV > file > defaults.

use crate::error::{NativeError, Result};
use serde::{Deserialize, Serialize};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Suppresses the setup log printed after initialization unless set to `"0"`.
pub const NOWELCOME_ENV: &str = "BITSANDBYTES_NOWELCOME";
/// Overrides the directory holding `libbitsandbytes_*` binaries.
pub const LIBRARY_DIR_ENV: &str = "BNB_LIBRARY_DIR";
/// Pins the CUDA binary variant, e.g. `118` for `libbitsandbytes_cuda118`.
pub const CUDA_VERSION_ENV: &str = "BNB_CUDA_VERSION";
/// Echoes setup log entries to stderr as they are recorded.
pub const DEBUG_ENV: &str = "BNB_DEBUG";
/// Path of the YAML configuration file.
pub const CONFIG_ENV: &str = "BNB_CONFIG";

/// Symbol whose presence marks a CUDA build of the native library.
pub const CUDA_PROBE_SYMBOL: &str = "cadam32bit_g32";

/// Native runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Directory holding the native binaries. Defaults to the directory of
    /// the running executable.
    #[serde(default)]
    pub library_dir: Option<PathBuf>,

    /// CUDA binary variant to load instead of auto-discovery.
    #[serde(default)]
    pub cuda_version: Option<String>,

    /// Print the setup log after initialization.
    #[serde(default = "default_welcome")]
    pub welcome: bool,

    /// Echo setup log entries as they are recorded.
    #[serde(default)]
    pub debug: bool,

    /// Symbols that must all resolve for the library to count as a CUDA build.
    #[serde(default = "default_required_symbols")]
    pub required_symbols: Vec<String>,
}

fn default_welcome() -> bool {
    true
}
fn default_required_symbols() -> Vec<String> {
    vec![CUDA_PROBE_SYMBOL.to_string(), "get_context".to_string(), "get_cusparse".to_string()]
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            library_dir: None,
            cuda_version: None,
            welcome: default_welcome(),
            debug: false,
            required_symbols: default_required_symbols(),
        }
    }
}

/// Returns whether the welcome log should print for a given
/// `BITSANDBYTES_NOWELCOME` value. Only an unset variable or exactly `"0"`
/// keeps it on; any other value, including one that is not valid UTF-8,
/// turns it off.
#[must_use]
pub fn welcome_enabled(nowelcome: Option<&OsStr>) -> bool {
    match nowelcome {
        None => true,
        Some(value) => value == "0",
    }
}

fn flag_enabled(value: &OsStr) -> bool {
    matches!(
        value.to_string_lossy().trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl RuntimeConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .map_err(|_| NativeError::ConfigNotFound(path.display().to_string()))?;

        Self::parse(&content)
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error with line number if parsing fails, or if a value
    /// fails validation.
    pub fn parse(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml).map_err(|e| {
            let line = e.location().map(|l| l.line()).unwrap_or(0);
            NativeError::ConfigParse { line, message: e.to_string() }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("bitsandbytes/config.yaml"))
    }

    /// Builds the configuration from the process environment: the file named
    /// by `BNB_CONFIG` (which must exist), else the default file if present,
    /// else defaults; then environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly named file is missing or invalid,
    /// or an environment override fails validation.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(path)?,
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::load(path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var_os(key))?;
        Ok(config)
    }

    /// Applies environment overrides read through `lookup`, which should
    /// behave like [`std::env::var_os`].
    ///
    /// # Errors
    ///
    /// Returns an error if an override fails validation.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<OsString>) -> Result<()> {
        if let Some(dir) = lookup(LIBRARY_DIR_ENV).filter(|d| !d.is_empty()) {
            self.library_dir = Some(PathBuf::from(dir));
        }
        if let Some(version) = lookup(CUDA_VERSION_ENV).filter(|v| !v.is_empty()) {
            self.cuda_version = Some(version.to_string_lossy().into_owned());
        }
        if let Some(value) = lookup(NOWELCOME_ENV) {
            self.welcome = welcome_enabled(Some(&value));
        }
        if let Some(value) = lookup(DEBUG_ENV) {
            self.debug = flag_enabled(&value);
        }
        self.validate()
    }

    /// Checks value constraints.
    ///
    /// # Errors
    ///
    /// Returns [`NativeError::ConfigInvalid`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if let Some(version) = &self.cuda_version {
            if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
                return Err(NativeError::ConfigInvalid {
                    key: "cuda_version".to_string(),
                    message: format!("expected digits such as '118', got '{version}'"),
                });
            }
        }
        if self.required_symbols.is_empty() {
            return Err(NativeError::ConfigInvalid {
                key: "required_symbols".to_string(),
                message: "at least one symbol is required".to_string(),
            });
        }
        Ok(())
    }

    /// Directory to search for native binaries.
    ///
    /// # Errors
    ///
    /// Returns an error if no directory is configured and the executable
    /// path cannot be determined.
    pub fn resolved_library_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.library_dir {
            return Ok(dir.clone());
        }
        let exe = std::env::current_exe()?;
        Ok(exe.parent().map(Path::to_path_buf).unwrap_or_default())
    }
}
