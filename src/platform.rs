//! Host accelerator detection.
//!
//! Decides which initialization branch runs: the Apple GPU (MPS) backend,
//! which ships a single CPU binary, or the CUDA path, which goes through
//! library setup and symbol probing.

use crate::library::NativeLibrary;

/// CUDA driver library names, tried in order.
const CUDA_DRIVER_PATHS: &[&str] = &["libcuda.so.1", "libcuda.so", "nvcuda.dll"];

const CUDA_SUCCESS: i32 = 0;

/// Initialization branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Apple GPU backend; loads the bundled CPU library directly.
    Mps,
    /// CUDA path; library chosen by setup and probed for GPU symbols.
    Cuda,
}

impl Backend {
    /// Picks the branch for a host.
    #[must_use]
    pub fn select(probe: &dyn HostProbe) -> Self {
        if probe.mps_built() {
            Backend::Mps
        } else {
            Backend::Cuda
        }
    }

    /// Short lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Mps => "mps",
            Backend::Cuda => "cuda",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answers the host questions initialization depends on.
pub trait HostProbe {
    /// Whether the Apple GPU backend is built for this host.
    fn mps_built(&self) -> bool;

    /// Number of usable CUDA devices.
    fn cuda_device_count(&self) -> u32;

    /// Whether at least one CUDA device is usable.
    fn cuda_available(&self) -> bool {
        self.cuda_device_count() > 0
    }
}

/// Probe that inspects the running host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl SystemProbe {
    /// Creates a system probe.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HostProbe for SystemProbe {
    fn mps_built(&self) -> bool {
        cfg!(target_os = "macos")
    }

    fn cuda_device_count(&self) -> u32 {
        CUDA_DRIVER_PATHS
            .iter()
            .find_map(|path| NativeLibrary::open(path).ok())
            .map_or(0, |driver| driver_device_count(&driver))
    }
}

#[allow(unsafe_code)]
fn driver_device_count(driver: &NativeLibrary) -> u32 {
    type CuInit = unsafe extern "C" fn(u32) -> i32;
    type CuDeviceGetCount = unsafe extern "C" fn(*mut i32) -> i32;

    // SAFETY: signatures match the CUDA driver API (CUresult cuInit(unsigned),
    // CUresult cuDeviceGetCount(int*)); driver outlives both calls.
    unsafe {
        let Some(cu_init) = driver.function::<CuInit>("cuInit") else {
            return 0;
        };
        let Some(cu_device_get_count) = driver.function::<CuDeviceGetCount>("cuDeviceGetCount")
        else {
            return 0;
        };

        if cu_init(0) != CUDA_SUCCESS {
            return 0;
        }
        let mut count: i32 = 0;
        if cu_device_get_count(&mut count) != CUDA_SUCCESS {
            return 0;
        }
        u32::try_from(count).unwrap_or(0)
    }
}

/// Probe with fixed answers, for embedding applications that already know
/// their host and for tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaticProbe {
    /// Reported MPS availability.
    pub mps_built: bool,
    /// Reported CUDA device count.
    pub cuda_devices: u32,
}

impl StaticProbe {
    /// A host with neither backend.
    #[must_use]
    pub fn cpu_only() -> Self {
        Self::default()
    }

    /// A CUDA host with `devices` GPUs.
    #[must_use]
    pub fn cuda(devices: u32) -> Self {
        Self { mps_built: false, cuda_devices: devices }
    }

    /// An Apple GPU host.
    #[must_use]
    pub fn mps() -> Self {
        Self { mps_built: true, cuda_devices: 0 }
    }
}

impl HostProbe for StaticProbe {
    fn mps_built(&self) -> bool {
        self.mps_built
    }

    fn cuda_device_count(&self) -> u32 {
        self.cuda_devices
    }
}
