//! The compute-driver seam.
//!
//! [`ComputeDriver`] is the one-to-one surface of the device API the session
//! sequences: enumeration, context/queue creation, program build, kernel
//! arguments, dispatch, read-back and release. The OpenCL implementation
//! lives in [`crate::opencl`]; [`crate::host`] provides an in-process
//! implementation for machines without an OpenCL runtime.

use crate::error::DriverError;

/// Result of a single driver call.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Access mode of a device buffer as seen by kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferAccess {
    /// Kernel input, initialized from host memory at creation.
    ReadOnly,
    /// Kernel output, never initialized from host memory.
    WriteOnly,
}

/// How a device buffer is created.
#[derive(Debug, Clone, Copy)]
pub enum BufferInit<'a> {
    /// Read-only buffer holding a copy of these bytes.
    CopyHost(&'a [u8]),
    /// Write-only buffer of this many bytes.
    WriteOnly(usize),
}

impl BufferInit<'_> {
    pub fn byte_len(&self) -> usize {
        match self {
            Self::CopyHost(bytes) => bytes.len(),
            Self::WriteOnly(len) => *len,
        }
    }

    pub fn access(&self) -> BufferAccess {
        match self {
            Self::CopyHost(_) => BufferAccess::ReadOnly,
            Self::WriteOnly(_) => BufferAccess::WriteOnly,
        }
    }
}

/// An N-dimensional index space with zero offset.
#[derive(Debug, Clone, Copy)]
pub struct NdRange<'a> {
    /// Global work-item count per dimension.
    pub global: &'a [usize],
    /// Work-group size per dimension; `None` lets the driver choose.
    pub local: Option<&'a [usize]>,
}

impl<'a> NdRange<'a> {
    pub fn new(global: &'a [usize], local: Option<&'a [usize]>) -> Self {
        Self { global, local }
    }

    pub fn dimensions(&self) -> usize {
        self.global.len()
    }

    /// Total number of work items.
    pub fn work_items(&self) -> usize {
        self.global.iter().product()
    }
}

/// Device compute API as used by [`Session`](crate::Session).
///
/// Handles are owned values; each `release_*` call consumes one. The
/// session guarantees every handle it created is released exactly once.
pub trait ComputeDriver {
    type Platform: Clone;
    type Device: Clone;
    type Context;
    type Queue;
    type Program;
    type Kernel;
    type Buffer;

    /// All platforms. An empty list is a valid answer.
    fn platforms(&self) -> DriverResult<Vec<Self::Platform>>;

    fn platform_name(&self, platform: &Self::Platform) -> DriverResult<String>;

    /// All devices of every type on `platform`.
    fn devices(&self, platform: &Self::Platform) -> DriverResult<Vec<Self::Device>>;

    fn device_name(&self, device: &Self::Device) -> DriverResult<String>;

    /// Context on exactly `device`, with `platform` as its platform property.
    fn create_context(
        &self,
        platform: &Self::Platform,
        device: &Self::Device,
    ) -> DriverResult<Self::Context>;

    fn create_queue(
        &self,
        context: &Self::Context,
        device: &Self::Device,
    ) -> DriverResult<Self::Queue>;

    fn create_program(&self, context: &Self::Context, source: &str)
        -> DriverResult<Self::Program>;

    fn build_program(
        &self,
        program: &mut Self::Program,
        device: &Self::Device,
        options: &str,
    ) -> DriverResult<()>;

    fn build_log(&self, program: &Self::Program, device: &Self::Device) -> DriverResult<String>;

    fn create_kernel(&self, program: &Self::Program, entry_point: &str)
        -> DriverResult<Self::Kernel>;

    fn create_buffer(
        &self,
        context: &Self::Context,
        init: BufferInit<'_>,
    ) -> DriverResult<Self::Buffer>;

    fn set_buffer_arg(
        &self,
        kernel: &mut Self::Kernel,
        index: u32,
        buffer: &Self::Buffer,
    ) -> DriverResult<()>;

    /// Bind the raw bytes of a plain value to parameter `index`.
    fn set_scalar_arg(&self, kernel: &mut Self::Kernel, index: u32, bytes: &[u8])
        -> DriverResult<()>;

    /// Enqueue without waiting for completion.
    fn enqueue_kernel(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        range: NdRange<'_>,
    ) -> DriverResult<()>;

    /// Blocking read of `dst.len()` bytes from the start of `buffer`.
    fn read_buffer(
        &self,
        queue: &Self::Queue,
        buffer: &Self::Buffer,
        dst: &mut [u8],
    ) -> DriverResult<()>;

    fn flush(&self, queue: &Self::Queue) -> DriverResult<()>;

    fn finish(&self, queue: &Self::Queue) -> DriverResult<()>;

    fn release_kernel(&self, kernel: Self::Kernel) -> DriverResult<()>;

    fn release_program(&self, program: Self::Program) -> DriverResult<()>;

    fn release_buffer(&self, buffer: Self::Buffer) -> DriverResult<()>;

    fn release_queue(&self, queue: Self::Queue) -> DriverResult<()>;

    fn release_context(&self, context: Self::Context) -> DriverResult<()>;
}
