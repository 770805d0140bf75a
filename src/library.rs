//! Dynamically loaded native libraries.
//!
//! Thin RAII wrapper over `dlopen`/`dlsym`/`dlclose` on unix and
//! `libloading` (`LoadLibraryW`/`GetProcAddress`) elsewhere. The handle is
//! closed when the [`NativeLibrary`] is dropped, so any function pointer
//! obtained through [`NativeLibrary::function`] must not outlive it.

use crate::error::{NativeError, Result};
use std::ffi::{c_void, CString};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// A loaded shared library.
pub struct NativeLibrary {
    handle: sys::Handle,
    path: PathBuf,
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary").field("path", &self.path).finish()
    }
}

impl NativeLibrary {
    /// Opens the library at `path`.
    ///
    /// A bare file name (no directory component) goes through the platform
    /// search path, e.g. `LD_LIBRARY_PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`NativeError::LibraryLoad`] with the loader's diagnostic if
    /// the library cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let handle = sys::Handle::open(path).map_err(|reason| NativeError::LibraryLoad {
            path: path.display().to_string(),
            reason,
        })?;
        Ok(Self { handle, path: path.to_path_buf() })
    }

    /// Path the library was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolves a symbol address.
    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<NonNull<c_void>> {
        let name = CString::new(name).ok()?;
        self.handle.symbol(&name)
    }

    /// Returns true if `name` resolves.
    #[must_use]
    pub fn has_symbol(&self, name: &str) -> bool {
        self.symbol(name).is_some()
    }

    /// Names from `names` that do not resolve, in input order.
    #[must_use]
    pub fn missing_symbols<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        names
            .iter()
            .map(|name| name.as_ref())
            .filter(|name| !self.has_symbol(name))
            .map(str::to_string)
            .collect()
    }

    /// Resolves `name` as a function pointer of type `F`.
    ///
    /// Returns `None` if the symbol is missing or `F` is not pointer-sized.
    ///
    /// # Safety
    ///
    /// `F` must be an `extern "C"` function pointer type matching the
    /// symbol's real signature, and the returned pointer must not be called
    /// after this library is dropped.
    #[must_use]
    #[allow(unsafe_code)]
    pub unsafe fn function<F: Copy>(&self, name: &str) -> Option<F> {
        if std::mem::size_of::<F>() != std::mem::size_of::<*mut c_void>() {
            return None;
        }
        let sym = self.symbol(name)?.as_ptr();
        // SAFETY: size checked above; signature correctness is the caller's contract.
        Some(unsafe { std::mem::transmute_copy::<*mut c_void, F>(&sym) })
    }
}

// SAFETY: the handle is an opaque loader token; symbol lookup and close are
// thread-safe on every supported loader.
#[allow(unsafe_code)]
unsafe impl Send for NativeLibrary {}
#[allow(unsafe_code)]
unsafe impl Sync for NativeLibrary {}

#[cfg(unix)]
#[allow(unsafe_code)]
mod sys {
    use std::ffi::{c_void, CStr, CString};
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;
    use std::ptr::NonNull;

    /// `dlopen` handle, closed on drop.
    pub(super) struct Handle(NonNull<c_void>);

    fn last_error() -> String {
        // SAFETY: dlerror returns null or a NUL-terminated string owned by the loader.
        unsafe {
            let err = libc::dlerror();
            if err.is_null() {
                "unknown dynamic loader error".to_string()
            } else {
                CStr::from_ptr(err).to_string_lossy().into_owned()
            }
        }
    }

    impl Handle {
        pub(super) fn open(path: &Path) -> Result<Self, String> {
            let path_cstr = CString::new(path.as_os_str().as_bytes())
                .map_err(|_| "path contains an interior NUL byte".to_string())?;

            // SAFETY: path_cstr is a valid NUL-terminated string for the call.
            let handle =
                unsafe { libc::dlopen(path_cstr.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
            NonNull::new(handle).map(Self).ok_or_else(last_error)
        }

        pub(super) fn symbol(&self, name: &CStr) -> Option<NonNull<c_void>> {
            // SAFETY: the handle came from a successful dlopen and is still open.
            NonNull::new(unsafe { libc::dlsym(self.0.as_ptr(), name.as_ptr()) })
        }
    }

    impl Drop for Handle {
        fn drop(&mut self) {
            // SAFETY: the handle came from dlopen and is closed exactly once.
            unsafe {
                libc::dlclose(self.0.as_ptr());
            }
        }
    }
}

#[cfg(not(unix))]
#[allow(unsafe_code)]
mod sys {
    use std::ffi::{c_void, CStr};
    use std::path::Path;
    use std::ptr::NonNull;

    /// `LoadLibraryW` handle, freed when the inner library drops.
    pub(super) struct Handle(libloading::Library);

    impl Handle {
        pub(super) fn open(path: &Path) -> Result<Self, String> {
            // SAFETY: loading runs the library's initialisers; callers only
            // open bitsandbytes binaries and the CUDA driver.
            unsafe { libloading::Library::new(path) }.map(Self).map_err(|e| e.to_string())
        }

        pub(super) fn symbol(&self, name: &CStr) -> Option<NonNull<c_void>> {
            // SAFETY: read as an untyped address and never dereferenced here.
            let sym = unsafe { self.0.get::<*mut c_void>(name.to_bytes_with_nul()) }.ok()?;
            NonNull::new(*sym)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_library_reports_path() {
        let err = NativeLibrary::open("/nonexistent/libbitsandbytes_cpu.so").unwrap_err();
        match err {
            NativeError::LibraryLoad { path, reason } => {
                assert!(path.contains("libbitsandbytes_cpu"));
                assert!(!reason.is_empty());
            }
            other => panic!("expected LibraryLoad, got {other:?}"),
        }
    }

    #[test]
    fn test_open_non_library_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libbitsandbytes_cuda118.so");
        std::fs::write(&path, b"not an ELF image").unwrap();

        assert!(NativeLibrary::open(&path).is_err());
    }

    #[cfg(windows)]
    mod windows {
        use super::*;

        #[test]
        #[allow(unsafe_code)]
        fn test_system_dll_resolves_and_calls() {
            let lib = NativeLibrary::open("kernel32.dll").unwrap();

            assert!(lib.has_symbol("GetTickCount"));
            assert!(!lib.has_symbol("cadam32bit_g32"));
            // SAFETY: GetTickCount has signature DWORD GetTickCount(void).
            let ticks: unsafe extern "system" fn() -> u32 =
                unsafe { lib.function("GetTickCount") }.unwrap();
            let _ = unsafe { ticks() };
        }

        #[test]
        fn test_missing_dll_reports_loader_error() {
            let err = NativeLibrary::open("libbitsandbytes_cuda999.dll").unwrap_err();
            assert!(matches!(err, NativeError::LibraryLoad { .. }));
        }
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    mod glibc {
        use super::*;
        use std::path::Path;

        #[test]
        fn test_symbols_resolve_in_libc() {
            let lib = NativeLibrary::open("libc.so.6").unwrap();

            assert!(lib.has_symbol("malloc"));
            assert!(!lib.has_symbol("cadam32bit_g32"));
            assert_eq!(lib.path(), Path::new("libc.so.6"));
        }

        #[test]
        fn test_interior_nul_symbol_is_missing() {
            let lib = NativeLibrary::open("libc.so.6").unwrap();
            assert!(lib.symbol("mal\0loc").is_none());
        }

        #[test]
        fn test_missing_symbols_keeps_order() {
            let lib = NativeLibrary::open("libc.so.6").unwrap();
            let missing = lib.missing_symbols(&["get_context", "free", "get_cusparse"]);

            assert_eq!(missing, vec!["get_context".to_string(), "get_cusparse".to_string()]);
        }

        #[test]
        #[allow(unsafe_code)]
        fn test_typed_function_call() {
            let lib = NativeLibrary::open("libc.so.6").unwrap();
            // SAFETY: abs has signature int abs(int).
            let abs: unsafe extern "C" fn(i32) -> i32 = unsafe { lib.function("abs") }.unwrap();
            assert_eq!(unsafe { abs(-7) }, 7);
        }

        #[test]
        #[allow(unsafe_code)]
        fn test_function_rejects_non_pointer_sized_type() {
            let lib = NativeLibrary::open("libc.so.6").unwrap();
            let wide: Option<[usize; 2]> = unsafe { lib.function("abs") };
            assert!(wide.is_none());
        }

        #[test]
        fn test_library_is_send_sync() {
            fn assert_send_sync<T: Send + Sync>() {}
            assert_send_sync::<NativeLibrary>();
        }
    }
}
