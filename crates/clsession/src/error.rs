//! Session and driver error types.
//!
//! Failures fall into two tiers. Program compilation is the only recoverable
//! case and surfaces as [`SessionError::Build`]; everything else is a
//! [`FatalError`] that the caller is expected to stop on.

use std::fmt;

use thiserror::Error;

/// OpenCL status codes (subset reported by name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ClStatus {
    Success = 0,
    DeviceNotFound = -1,
    DeviceNotAvailable = -2,
    CompilerNotAvailable = -3,
    MemObjectAllocationFailure = -4,
    OutOfResources = -5,
    OutOfHostMemory = -6,
    BuildProgramFailure = -11,
    InvalidValue = -30,
    InvalidDeviceType = -31,
    InvalidPlatform = -32,
    InvalidDevice = -33,
    InvalidContext = -34,
    InvalidQueueProperties = -35,
    InvalidCommandQueue = -36,
    InvalidHostPtr = -37,
    InvalidMemObject = -38,
    InvalidBinary = -42,
    InvalidBuildOptions = -43,
    InvalidProgram = -44,
    InvalidProgramExecutable = -45,
    InvalidKernelName = -46,
    InvalidKernelDefinition = -47,
    InvalidKernel = -48,
    InvalidArgIndex = -49,
    InvalidArgValue = -50,
    InvalidArgSize = -51,
    InvalidKernelArgs = -52,
    InvalidWorkDimension = -53,
    InvalidWorkGroupSize = -54,
    InvalidWorkItemSize = -55,
    InvalidGlobalOffset = -56,
    InvalidOperation = -59,
    InvalidBufferSize = -61,
    InvalidGlobalWorkSize = -63,
    PlatformNotFoundKhr = -1001,
    Unknown = -9999,
}

impl ClStatus {
    pub fn from_raw(code: i32) -> Self {
        match code {
            0 => Self::Success,
            -1 => Self::DeviceNotFound,
            -2 => Self::DeviceNotAvailable,
            -3 => Self::CompilerNotAvailable,
            -4 => Self::MemObjectAllocationFailure,
            -5 => Self::OutOfResources,
            -6 => Self::OutOfHostMemory,
            -11 => Self::BuildProgramFailure,
            -30 => Self::InvalidValue,
            -31 => Self::InvalidDeviceType,
            -32 => Self::InvalidPlatform,
            -33 => Self::InvalidDevice,
            -34 => Self::InvalidContext,
            -35 => Self::InvalidQueueProperties,
            -36 => Self::InvalidCommandQueue,
            -37 => Self::InvalidHostPtr,
            -38 => Self::InvalidMemObject,
            -42 => Self::InvalidBinary,
            -43 => Self::InvalidBuildOptions,
            -44 => Self::InvalidProgram,
            -45 => Self::InvalidProgramExecutable,
            -46 => Self::InvalidKernelName,
            -47 => Self::InvalidKernelDefinition,
            -48 => Self::InvalidKernel,
            -49 => Self::InvalidArgIndex,
            -50 => Self::InvalidArgValue,
            -51 => Self::InvalidArgSize,
            -52 => Self::InvalidKernelArgs,
            -53 => Self::InvalidWorkDimension,
            -54 => Self::InvalidWorkGroupSize,
            -55 => Self::InvalidWorkItemSize,
            -56 => Self::InvalidGlobalOffset,
            -59 => Self::InvalidOperation,
            -61 => Self::InvalidBufferSize,
            -63 => Self::InvalidGlobalWorkSize,
            -1001 => Self::PlatformNotFoundKhr,
            _ => Self::Unknown,
        }
    }

    /// The `CL_*` constant name of this status.
    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "CL_SUCCESS",
            Self::DeviceNotFound => "CL_DEVICE_NOT_FOUND",
            Self::DeviceNotAvailable => "CL_DEVICE_NOT_AVAILABLE",
            Self::CompilerNotAvailable => "CL_COMPILER_NOT_AVAILABLE",
            Self::MemObjectAllocationFailure => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
            Self::OutOfResources => "CL_OUT_OF_RESOURCES",
            Self::OutOfHostMemory => "CL_OUT_OF_HOST_MEMORY",
            Self::BuildProgramFailure => "CL_BUILD_PROGRAM_FAILURE",
            Self::InvalidValue => "CL_INVALID_VALUE",
            Self::InvalidDeviceType => "CL_INVALID_DEVICE_TYPE",
            Self::InvalidPlatform => "CL_INVALID_PLATFORM",
            Self::InvalidDevice => "CL_INVALID_DEVICE",
            Self::InvalidContext => "CL_INVALID_CONTEXT",
            Self::InvalidQueueProperties => "CL_INVALID_QUEUE_PROPERTIES",
            Self::InvalidCommandQueue => "CL_INVALID_COMMAND_QUEUE",
            Self::InvalidHostPtr => "CL_INVALID_HOST_PTR",
            Self::InvalidMemObject => "CL_INVALID_MEM_OBJECT",
            Self::InvalidBinary => "CL_INVALID_BINARY",
            Self::InvalidBuildOptions => "CL_INVALID_BUILD_OPTIONS",
            Self::InvalidProgram => "CL_INVALID_PROGRAM",
            Self::InvalidProgramExecutable => "CL_INVALID_PROGRAM_EXECUTABLE",
            Self::InvalidKernelName => "CL_INVALID_KERNEL_NAME",
            Self::InvalidKernelDefinition => "CL_INVALID_KERNEL_DEFINITION",
            Self::InvalidKernel => "CL_INVALID_KERNEL",
            Self::InvalidArgIndex => "CL_INVALID_ARG_INDEX",
            Self::InvalidArgValue => "CL_INVALID_ARG_VALUE",
            Self::InvalidArgSize => "CL_INVALID_ARG_SIZE",
            Self::InvalidKernelArgs => "CL_INVALID_KERNEL_ARGS",
            Self::InvalidWorkDimension => "CL_INVALID_WORK_DIMENSION",
            Self::InvalidWorkGroupSize => "CL_INVALID_WORK_GROUP_SIZE",
            Self::InvalidWorkItemSize => "CL_INVALID_WORK_ITEM_SIZE",
            Self::InvalidGlobalOffset => "CL_INVALID_GLOBAL_OFFSET",
            Self::InvalidOperation => "CL_INVALID_OPERATION",
            Self::InvalidBufferSize => "CL_INVALID_BUFFER_SIZE",
            Self::InvalidGlobalWorkSize => "CL_INVALID_GLOBAL_WORK_SIZE",
            Self::PlatformNotFoundKhr => "CL_PLATFORM_NOT_FOUND_KHR",
            Self::Unknown => "CL_UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ClStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A non-success status returned by the compute driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{status} ({code})")]
pub struct DriverError {
    /// Raw status code as returned by the driver.
    pub code: i32,
    /// Named status, [`ClStatus::Unknown`] for codes outside the known subset.
    pub status: ClStatus,
}

impl DriverError {
    pub fn new(code: i32) -> Self {
        Self { code, status: ClStatus::from_raw(code) }
    }
}

impl From<ClStatus> for DriverError {
    fn from(status: ClStatus) -> Self {
        Self { code: status as i32, status }
    }
}

/// Which session step a fatal error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Enumerate,
    Select,
    CreateContext,
    CreateQueue,
    CreateKernel,
    CreateBuffer,
    SetArgument,
    Enqueue,
    ReadBuffer,
    /// A call was made before the session reached the phase it needs.
    Phase,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Enumerate => "enumerate",
            Self::Select => "select",
            Self::CreateContext => "create-context",
            Self::CreateQueue => "create-queue",
            Self::CreateKernel => "create-kernel",
            Self::CreateBuffer => "create-buffer",
            Self::SetArgument => "set-argument",
            Self::Enqueue => "enqueue",
            Self::ReadBuffer => "read-buffer",
            Self::Phase => "phase",
        };
        f.write_str(s)
    }
}

/// Message used when a failing call site supplies none.
pub const GENERIC_FAILURE_MESSAGE: &str = "OpenCL call failed with error";

/// An unrecoverable failure. The session must not be used further.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}: {source}")]
pub struct FatalError {
    pub stage: Stage,
    pub message: String,
    #[source]
    pub source: DriverError,
}

impl FatalError {
    pub fn new(stage: Stage, message: impl Into<String>, source: DriverError) -> Self {
        let message = message.into();
        let message =
            if message.is_empty() { GENERIC_FAILURE_MESSAGE.to_string() } else { message };
        Self { stage, message, source }
    }

    /// Raw status code of the failing call.
    pub fn code(&self) -> i32 {
        self.source.code
    }
}

/// Program compilation failed; the session is still usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("build of kernel '{entry_point}' failed: {source}")]
pub struct BuildFailure {
    pub entry_point: String,
    /// Driver build log for the selected device (may be empty).
    pub log: String,
    #[source]
    pub source: DriverError,
}

/// Errors returned by [`Session`](crate::Session) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Fatal(#[from] FatalError),

    #[error(transparent)]
    Build(#[from] BuildFailure),
}

impl SessionError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Raw status code of the underlying driver failure.
    pub fn code(&self) -> i32 {
        match self {
            Self::Fatal(e) => e.source.code,
            Self::Build(e) => e.source.code,
        }
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Turn a driver status into a fatal session error.
pub(crate) trait OrFatal<T> {
    fn or_fatal(self, stage: Stage, message: &str) -> Result<T>;
}

impl<T> OrFatal<T> for std::result::Result<T, DriverError> {
    fn or_fatal(self, stage: Stage, message: &str) -> Result<T> {
        self.map_err(|e| FatalError::new(stage, message, e).into())
    }
}
