//! bnb-diagnose: report how the bitsandbytes native library initializes.
//!
//! Prints what the host looks like, which binary setup picked and why, and
//! whether GPU kernels are available.
//!
//! Run: `bnb-diagnose --library-dir /path/to/lib`

use anyhow::{Context, Result};
use bitsandbytes_native::config::RuntimeConfig;
use bitsandbytes_native::platform::{Backend, HostProbe, SystemProbe};
use bitsandbytes_native::runtime::NativeRuntime;
use bitsandbytes_native::setup::CudaSetup;
use bitsandbytes_native::NativeError;
use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;

/// bnb-diagnose: native library setup diagnostics
#[derive(Parser, Debug)]
#[command(name = "bnb-diagnose")]
#[command(version)]
#[command(about = "Diagnose bitsandbytes native library setup", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory containing libbitsandbytes_* binaries
    #[arg(short, long)]
    library_dir: Option<PathBuf>,

    /// CUDA binary version to load, e.g. 118
    #[arg(long)]
    cuda_version: Option<String>,

    /// Echo setup log entries as they are recorded
    #[arg(long)]
    debug: bool,
}

fn load_config(cli: &Cli) -> Result<RuntimeConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = RuntimeConfig::load(path)?;
            config.apply_env(|key| std::env::var_os(key))?;
            config
        }
        None => RuntimeConfig::from_env()?,
    };

    if let Some(dir) = &cli.library_dir {
        config.library_dir = Some(dir.clone());
    }
    if let Some(version) = &cli.cuda_version {
        config.cuda_version = Some(version.clone());
    }
    config.debug |= cli.debug;
    // The report prints the log itself.
    config.welcome = false;
    config.validate()?;
    Ok(config)
}

/// Writes the diagnostic report for one initialization attempt and returns
/// the process exit code.
///
/// The runtime's own output is buffered: on success the report's setup log
/// already carries it, on failure it is forwarded to `err`.
fn run_report(
    config: &RuntimeConfig,
    probe: &dyn HostProbe,
    mut setup: CudaSetup,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> io::Result<i32> {
    writeln!(out, "bitsandbytes native setup")?;
    writeln!(out, "=========================\n")?;
    writeln!(out, "MPS backend built:  {}", probe.mps_built())?;
    writeln!(out, "CUDA devices:       {}", probe.cuda_device_count())?;
    writeln!(out, "Backend:            {}", Backend::select(probe))?;
    writeln!(out, "Library directory:  {}", setup.library_dir().display())?;
    if let Some(version) = &config.cuda_version {
        writeln!(out, "CUDA version pin:   {version}")?;
    }

    if Backend::select(probe) == Backend::Cuda {
        writeln!(out, "\nCandidates:")?;
        for path in setup.candidates() {
            let state = if path.is_file() { "found" } else { "missing" };
            writeln!(out, "  {} [{state}]", path.display())?;
        }
    }

    let mut runtime_output = Vec::new();
    match NativeRuntime::initialize_with_output(config, probe, &mut setup, &mut runtime_output) {
        Ok(runtime) => {
            writeln!(out, "\n{}", runtime.capabilities().summary())?;
            if !runtime.capabilities().missing_symbols.is_empty() && runtime.library().is_some() {
                writeln!(
                    out,
                    "Missing symbols:    {}",
                    runtime.capabilities().missing_symbols.join(", ")
                )?;
            }
            writeln!(out, "\nSetup log:")?;
            runtime.log().write_to(out)?;
            Ok(0)
        }
        Err(NativeError::SetupFailed { instructions }) => {
            err.write_all(&runtime_output)?;
            writeln!(err, "\nError: CUDA setup failed despite GPU being available.\n")?;
            writeln!(err, "{instructions}")?;
            Ok(1)
        }
        Err(e) => {
            err.write_all(&runtime_output)?;
            writeln!(err, "\nError: {e}")?;
            Ok(1)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli).context("invalid configuration")?;

    let setup = CudaSetup::from_config(&config)?;
    let code = run_report(
        &config,
        &SystemProbe::new(),
        setup,
        &mut io::stdout().lock(),
        &mut io::stderr().lock(),
    )?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
