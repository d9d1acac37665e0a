//! Ordered OpenCL device session.
//!
//! This crate provides:
//! - [`Session`]: platform/device discovery and selection, kernel build,
//!   argument binding, dispatch, blocking read-back and exactly-once release
//! - [`driver`]: the [`ComputeDriver`] trait every backend implements
//! - [`host`]: an in-process driver for machines without an OpenCL runtime
//! - `opencl`: the real backend on `opencl3` (feature `opencl`)
//! - [`kernels`], [`matmul`], [`reference`]: matrix kernels, a square matmul
//!   driver and CPU reference results to check them against
//! - [`config`]: TOML + environment configuration

pub mod config;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod host;
pub mod kernels;
pub mod matmul;
#[cfg(feature = "opencl")]
pub mod opencl;
pub mod reference;
pub mod session;
pub mod signature;

// Re-export primary public types.
pub use config::{ConfigError, LogFormat, SessionConfig};
pub use discovery::{discover, DeviceListing, DeviceSelection, Discovery, PlatformListing};
pub use driver::{BufferAccess, BufferInit, ComputeDriver, NdRange};
pub use error::{BuildFailure, ClStatus, DriverError, FatalError, Result, SessionError, Stage};
pub use host::HostDriver;
pub use kernels::{ElementType, MatrixLayout};
#[cfg(feature = "opencl")]
pub use opencl::OpenClDriver;
pub use session::{BufferHandle, InitOutcome, Phase, SelectedDevice, Session};
