//! Subcommands.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use clsession::kernels::{ElementType, MatrixLayout};
use clsession::matmul::{self, KernelElement};
use clsession::reference::{
    clear_matrix, first_mismatch, random_matrix, ref_matmul, seeded_rng, transpose,
};
use clsession::{ComputeDriver, HostDriver, InitOutcome, SelectedDevice, Session, SessionConfig};
use tracing::info;

/// Which driver runs the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// In-process reference driver
    Host,
    /// System OpenCL runtime
    Opencl,
}

impl Backend {
    /// OpenCL when compiled in, the host driver otherwise.
    pub fn default_for_build() -> Self {
        if cfg!(feature = "opencl") {
            Self::Opencl
        } else {
            Self::Host
        }
    }
}

/// Resolved settings shared by every subcommand.
pub struct RunContext {
    pub config: SessionConfig,
    pub backend: Backend,
}

/// Work done on a freshly constructed session.
trait SessionTask {
    fn run<D: ComputeDriver>(&self, session: Session<D>, config: &SessionConfig) -> Result<()>;
}

fn dispatch(task: &impl SessionTask, ctx: &RunContext) -> Result<()> {
    match ctx.backend {
        Backend::Host => {
            task.run(Session::with_config(HostDriver::new(), &ctx.config), &ctx.config)
        }
        Backend::Opencl => dispatch_opencl(task, ctx),
    }
}

#[cfg(feature = "opencl")]
fn dispatch_opencl(task: &impl SessionTask, ctx: &RunContext) -> Result<()> {
    let driver = clsession::OpenClDriver::new();
    task.run(Session::with_config(driver, &ctx.config), &ctx.config)
}

#[cfg(not(feature = "opencl"))]
fn dispatch_opencl(_task: &impl SessionTask, _ctx: &RunContext) -> Result<()> {
    bail!("built without the `opencl` feature; rebuild with it or pass --backend host")
}

/// Initialize for compute and return the selected device.
fn select<D: ComputeDriver>(
    session: &mut Session<D>,
    config: &SessionConfig,
) -> Result<SelectedDevice> {
    match session.initialize(config.selection(false)).context("device initialization failed")? {
        InitOutcome::Selected(selected) => Ok(selected),
        InitOutcome::NoPlatforms => bail!("no OpenCL platform found"),
        InitOutcome::NoDevices { platform } => bail!("platform '{platform}' has no devices"),
        InitOutcome::Listed(_) => bail!("session was not initialized for compute"),
    }
}

/// Computed result differs from the CPU reference.
#[derive(Debug, thiserror::Error)]
#[error("result mismatch at element {index}: expected {expected}, got {actual}")]
pub struct VerificationFailure {
    pub index: usize,
    pub expected: String,
    pub actual: String,
}

/// List every platform and device.
#[derive(Args, Debug)]
pub struct ListCommand {}

impl ListCommand {
    pub fn execute(&self, ctx: &RunContext) -> Result<()> {
        dispatch(self, ctx)
    }
}

impl SessionTask for ListCommand {
    fn run<D: ComputeDriver>(&self, mut session: Session<D>, config: &SessionConfig) -> Result<()> {
        match session.initialize(config.selection(true))? {
            InitOutcome::NoPlatforms => println!("No OpenCL platform found"),
            InitOutcome::NoDevices { platform } => println!("Platform '{platform}' has no devices"),
            InitOutcome::Listed(platforms) => {
                let devices: usize = platforms.iter().map(|p| p.devices.len()).sum();
                info!("{} platform(s), {devices} device(s)", platforms.len());
            }
            InitOutcome::Selected(_) => {}
        }
        Ok(())
    }
}

/// Compile a kernel file for the selected device.
#[derive(Args, Debug)]
pub struct BuildCommand {
    /// OpenCL C source file
    #[arg(long, value_name = "PATH")]
    pub kernel_file: PathBuf,

    /// Kernel entry point to resolve
    #[arg(long, value_name = "NAME")]
    pub entry: String,
}

impl BuildCommand {
    pub fn execute(&self, ctx: &RunContext) -> Result<()> {
        dispatch(self, ctx)
    }
}

impl SessionTask for BuildCommand {
    fn run<D: ComputeDriver>(&self, mut session: Session<D>, config: &SessionConfig) -> Result<()> {
        let selected = select(&mut session, config)?;
        session
            .build_kernel_from_file(&self.kernel_file, &self.entry)
            .with_context(|| format!("building {}", self.kernel_file.display()))?;
        println!("Kernel '{}' built for {}", self.entry, selected.device_name);
        Ok(())
    }
}

/// Matrix element type on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Dtype {
    Int,
    Double,
}

impl From<Dtype> for ElementType {
    fn from(dtype: Dtype) -> Self {
        match dtype {
            Dtype::Int => ElementType::Int,
            Dtype::Double => ElementType::Double,
        }
    }
}

/// Multiply random square matrices on the device and time it.
#[derive(Args, Debug)]
pub struct MatmulCommand {
    /// Matrix dimension M (matrices are M x M)
    #[arg(long, short = 'n', default_value_t = 1000)]
    pub dimension: usize,

    /// Pass B pre-transposed and use the transposed kernel
    #[arg(long)]
    pub transpose: bool,

    /// Element type
    #[arg(long, value_enum, default_value_t = Dtype::Int)]
    pub dtype: Dtype,

    /// Check the result against the CPU reference
    #[arg(long)]
    pub verify: bool,

    /// Seed for the random matrices
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of timed runs
    #[arg(long, default_value_t = 1)]
    pub runs: usize,
}

impl MatmulCommand {
    pub fn execute(&self, ctx: &RunContext) -> Result<()> {
        if self.dimension == 0 {
            bail!("--dimension must be at least 1");
        }
        let m = self.dimension;
        if i32::try_from(m).is_err() || m.checked_mul(m).is_none() {
            bail!("--dimension {m} is too large");
        }
        dispatch(self, ctx)
    }

    fn run_typed<D: ComputeDriver, T: KernelElement>(
        &self,
        session: &mut Session<D>,
    ) -> Result<()> {
        let m = self.dimension;
        let seed = self.seed.unwrap_or_else(rand::random);
        info!(seed, m, dtype = %T::ELEMENT, "generating matrices");
        let mut rng = seeded_rng(seed);
        let a: Vec<T> = random_matrix(&mut rng, m);
        let b: Vec<T> = random_matrix(&mut rng, m);

        let layout = if self.transpose { MatrixLayout::Transposed } else { MatrixLayout::Plain };
        let b_device = if self.transpose { transpose(&b, m) } else { b.clone() };
        matmul::build::<D, T>(session, layout)?;

        let mut c = vec![T::ZERO; m * m];
        for run in 1..=self.runs {
            clear_matrix(&mut c);
            let start = Instant::now();
            matmul::run(session, &a, &b_device, &mut c, m)?;
            let elapsed = start.elapsed();
            println!(
                "Run {run}: {m}x{m} {} multiplication ({}) took {:.3} ms",
                T::ELEMENT,
                layout.entry_point(),
                elapsed.as_secs_f64() * 1e3
            );
        }

        if self.verify {
            let mut expected = vec![T::ZERO; m * m];
            ref_matmul(&a, &b, &mut expected, m);
            if let Some(index) = first_mismatch(&c, &expected) {
                let show = |v: Option<&T>| v.map(ToString::to_string).unwrap_or_default();
                return Err(VerificationFailure {
                    index,
                    expected: show(expected.get(index)),
                    actual: show(c.get(index)),
                }
                .into());
            }
            println!("Result verified against CPU reference");
        }
        Ok(())
    }
}

impl SessionTask for MatmulCommand {
    fn run<D: ComputeDriver>(&self, mut session: Session<D>, config: &SessionConfig) -> Result<()> {
        let selected = select(&mut session, config)?;
        info!("Running on {} / {}", selected.platform_name, selected.device_name);
        match self.dtype {
            Dtype::Int => self.run_typed::<D, i32>(&mut session),
            Dtype::Double => self.run_typed::<D, f64>(&mut session),
        }
    }
}
