//! The device session: an ordered, stateful wrapper over a [`ComputeDriver`].
//!
//! A [`Session`] moves through three phases:
//!
//! 1. **Uninitialized**: nothing created.
//! 2. **Initialized**: a device is selected and a context and command queue
//!    exist ([`Session::initialize`]).
//! 3. **Ready**: a program is built and its kernel resolved
//!    ([`Session::build_kernel`]); arguments can be bound, the kernel
//!    executed and results read back.
//!
//! Calls made in the wrong phase return a fatal [`SessionError`] with stage
//! [`Stage::Phase`]. Every device resource is released exactly once when the
//! session is dropped or re-initialized.

use std::cell::Cell;
use std::fs;
use std::marker::PhantomData;
use std::path::Path;

use bytemuck::{bytes_of, cast_slice, cast_slice_mut, Pod};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::discovery::{discover, DeviceSelection, Discovery, PlatformListing};
use crate::driver::{BufferAccess, BufferInit, ComputeDriver, NdRange};
use crate::error::{BuildFailure, ClStatus, FatalError, OrFatal, Result, SessionError, Stage};

/// Lifecycle phase of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Initialized,
    Ready,
}

/// The platform and device a session runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedDevice {
    pub platform_index: usize,
    pub platform_name: String,
    pub device_index: usize,
    pub device_name: String,
}

/// What [`Session::initialize`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// No platform is installed; nothing was created.
    NoPlatforms,
    /// Enumeration hit a platform without devices; nothing was created.
    NoDevices { platform: String },
    /// List-only run; nothing was created.
    Listed(Vec<PlatformListing>),
    /// A context and command queue now exist on this device.
    Selected(SelectedDevice),
}

/// Names a device buffer by the order in which it was bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    position: usize,
    byte_len: usize,
    access: BufferAccess,
}

impl BufferHandle {
    /// Zero-based append position in the session's buffer list.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    pub fn access(&self) -> BufferAccess {
        self.access
    }
}

struct BoundBuffer<B> {
    buffer: B,
    handle: BufferHandle,
    arg_index: u32,
}

struct Active<D: ComputeDriver> {
    selected: SelectedDevice,
    device: D::Device,
    context: D::Context,
    queue: D::Queue,
}

fn phase_error(message: &str) -> SessionError {
    FatalError::new(Stage::Phase, message, ClStatus::InvalidOperation.into()).into()
}

/// One compute context, one kernel and the buffers bound to it.
pub struct Session<D: ComputeDriver> {
    driver: D,
    build_options: String,
    active: Option<Active<D>>,
    program: Option<D::Program>,
    kernel: Option<D::Kernel>,
    buffers: Vec<BoundBuffer<D::Buffer>>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<D: ComputeDriver> Session<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            build_options: String::new(),
            active: None,
            program: None,
            kernel: None,
            buffers: Vec::new(),
            _not_sync: PhantomData,
        }
    }

    /// Session whose program builds use the configured options.
    pub fn with_config(driver: D, config: &SessionConfig) -> Self {
        let mut session = Self::new(driver);
        session.build_options = config.build_options.clone();
        session
    }

    pub fn set_build_options(&mut self, options: impl Into<String>) {
        self.build_options = options.into();
    }

    pub fn build_options(&self) -> &str {
        &self.build_options
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn phase(&self) -> Phase {
        match (&self.active, &self.kernel) {
            (None, _) => Phase::Uninitialized,
            (Some(_), None) => Phase::Initialized,
            (Some(_), Some(_)) => Phase::Ready,
        }
    }

    pub fn selected(&self) -> Option<&SelectedDevice> {
        self.active.as_ref().map(|a| &a.selected)
    }

    pub fn has_kernel(&self) -> bool {
        self.kernel.is_some()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Handle of the buffer appended at `position`.
    pub fn buffer_handle(&self, position: usize) -> Option<BufferHandle> {
        self.buffers.get(position).map(|b| b.handle)
    }

    /// Kernel parameter the buffer at `handle` was bound to.
    pub fn buffer_arg_index(&self, handle: BufferHandle) -> Option<u32> {
        self.buffers.get(handle.position).map(|b| b.arg_index)
    }

    /// Enumerate platforms and devices, then select one and create a context
    /// and command queue on it unless `selection.list_only` is set.
    ///
    /// Missing platforms or devices are reported through [`InitOutcome`]
    /// without creating anything. Selecting replaces any state from an
    /// earlier initialization.
    pub fn initialize(&mut self, selection: DeviceSelection) -> Result<InitOutcome> {
        let listed = match discover(&self.driver)? {
            Discovery::NoPlatforms => return Ok(InitOutcome::NoPlatforms),
            Discovery::NoDevices { platform, .. } => return Ok(InitOutcome::NoDevices { platform }),
            Discovery::Found(listed) => listed,
        };
        if selection.list_only {
            debug!("List-only initialization, no context created");
            return Ok(InitOutcome::Listed(listed));
        }

        // One resolved platform drives both the context property and the device lookup.
        let platform_index = selection.platform_index();
        let device_index = selection.device_index();
        let platforms = self.driver.platforms().or_fatal(Stage::Select, "Platform query failed")?;
        let platform = platforms.get(platform_index).cloned().ok_or_else(|| {
            FatalError::new(
                Stage::Select,
                format!("Platform index {platform_index} out of range ({} found)", platforms.len()),
                ClStatus::InvalidPlatform.into(),
            )
        })?;

        let devices =
            self.driver.devices(&platform).or_fatal(Stage::Select, "Device query failed")?;
        if devices.is_empty() {
            return Err(FatalError::new(
                Stage::Select,
                "Selected platform has no devices",
                ClStatus::DeviceNotFound.into(),
            )
            .into());
        }
        let device = devices.get(device_index).cloned().ok_or_else(|| {
            FatalError::new(
                Stage::Select,
                format!("Device index {device_index} out of range ({} found)", devices.len()),
                ClStatus::InvalidDevice.into(),
            )
        })?;

        let selected = SelectedDevice {
            platform_index,
            platform_name: self.driver.platform_name(&platform).unwrap_or_default(),
            device_index,
            device_name: self.driver.device_name(&device).unwrap_or_default(),
        };
        println!("\t Selected Platform Name : {}", selected.platform_name);
        println!("\t Selected Device Name : {}", selected.device_name);

        self.release_all();

        let context = self
            .driver
            .create_context(&platform, &device)
            .or_fatal(Stage::CreateContext, "Create Context Failed")?;
        info!("Context created");

        let queue = match self.driver.create_queue(&context, &device) {
            Ok(queue) => queue,
            Err(e) => {
                if let Err(release) = self.driver.release_context(context) {
                    warn!("Failed to release context: {release}");
                }
                let message = "Fail to create command queue";
                return Err(FatalError::new(Stage::CreateQueue, message, e).into());
            }
        };
        info!("Command Queue created");

        self.active = Some(Active { selected: selected.clone(), device, context, queue });
        Ok(InitOutcome::Selected(selected))
    }

    /// Compile `source` for the selected device and resolve `entry_point`.
    ///
    /// A compilation failure is recoverable: the build log is logged and
    /// returned in [`SessionError::Build`], and the session keeps no kernel.
    /// Failing to resolve the entry point of a compiled program is fatal.
    pub fn build_kernel(&mut self, source: &str, entry_point: &str) -> Result<()> {
        let active =
            self.active.as_ref().ok_or_else(|| phase_error("build_kernel before initialize"))?;

        if let Some(kernel) = self.kernel.take() {
            if let Err(e) = self.driver.release_kernel(kernel) {
                warn!("Failed to release previous kernel: {e}");
            }
        }
        if let Some(program) = self.program.take() {
            if let Err(e) = self.driver.release_program(program) {
                warn!("Failed to release previous program: {e}");
            }
        }

        let mut program = match self.driver.create_program(&active.context, source) {
            Ok(program) => program,
            Err(e) => {
                warn!("Program creation for '{entry_point}' failed: {e}");
                let entry_point = entry_point.to_string();
                return Err(BuildFailure { entry_point, log: String::new(), source: e }.into());
            }
        };

        let built = self.driver.build_program(&mut program, &active.device, &self.build_options);
        if let Err(e) = built {
            let log = self.driver.build_log(&program, &active.device).unwrap_or_default();
            warn!("Build of '{entry_point}' failed: {e}\n{log}");
            if let Err(release) = self.driver.release_program(program) {
                warn!("Failed to release program: {release}");
            }
            let entry_point = entry_point.to_string();
            return Err(BuildFailure { entry_point, log, source: e }.into());
        }

        let program = self.program.insert(program);
        let kernel = self
            .driver
            .create_kernel(program, entry_point)
            .or_fatal(Stage::CreateKernel, "Create Kernel Failed")?;
        debug!("Kernel '{entry_point}' created");
        self.kernel = Some(kernel);
        Ok(())
    }

    /// Read `path` as kernel source and build it.
    ///
    /// An unreadable file is treated as empty source, so the build fails
    /// recoverably.
    pub fn build_kernel_from_file(
        &mut self,
        path: impl AsRef<Path>,
        entry_point: &str,
    ) -> Result<()> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).unwrap_or_else(|e| {
            warn!("Cannot read kernel file {}: {e}", path.display());
            String::new()
        });
        self.build_kernel(&source, entry_point)
    }

    /// Copy `data` into a new read-only device buffer and bind it to
    /// parameter `index`.
    pub fn bind_buffer<T: Pod>(&mut self, index: u32, data: &[T]) -> Result<BufferHandle> {
        self.bind(index, BufferInit::CopyHost(cast_slice(data)))
    }

    /// Allocate a write-only device buffer of `byte_len` bytes and bind it
    /// to parameter `index`. Its contents are unspecified until written.
    pub fn bind_output(&mut self, index: u32, byte_len: usize) -> Result<BufferHandle> {
        self.bind(index, BufferInit::WriteOnly(byte_len))
    }

    fn bind(&mut self, index: u32, init: BufferInit<'_>) -> Result<BufferHandle> {
        let (Some(active), Some(kernel)) = (self.active.as_ref(), self.kernel.as_mut()) else {
            return Err(phase_error("bind_buffer before build_kernel"));
        };

        let buffer = self
            .driver
            .create_buffer(&active.context, init)
            .or_fatal(Stage::CreateBuffer, "Create Buffer Failed")?;
        let handle = BufferHandle {
            position: self.buffers.len(),
            byte_len: init.byte_len(),
            access: init.access(),
        };
        debug!(position = handle.position, index, bytes = handle.byte_len, "buffer created");

        let bound = self.driver.set_buffer_arg(kernel, index, &buffer);
        self.buffers.push(BoundBuffer { buffer, handle, arg_index: index });
        bound.or_fatal(Stage::SetArgument, "Set Kernel Arg Failed")?;
        Ok(handle)
    }

    /// Bind a plain value to parameter `index`.
    pub fn bind_scalar<T: Pod>(&mut self, index: u32, value: T) -> Result<()> {
        self.bind_scalar_bytes(index, bytes_of(&value))
    }

    /// Bind raw bytes to parameter `index`.
    pub fn bind_scalar_bytes(&mut self, index: u32, bytes: &[u8]) -> Result<()> {
        let kernel =
            self.kernel.as_mut().ok_or_else(|| phase_error("bind_scalar before build_kernel"))?;
        self.driver
            .set_scalar_arg(kernel, index, bytes)
            .or_fatal(Stage::SetArgument, "Set Kernel Arg Failed")
    }

    /// Enqueue the kernel over `global` work items, grouped by `local` when
    /// given. Does not wait for completion.
    pub fn execute(&self, global: &[usize], local: Option<&[usize]>) -> Result<()> {
        let (Some(active), Some(kernel)) = (self.active.as_ref(), self.kernel.as_ref()) else {
            return Err(phase_error("execute before build_kernel"));
        };
        debug!(?global, ?local, "enqueue");
        self.driver
            .enqueue_kernel(&active.queue, kernel, NdRange::new(global, local))
            .or_fatal(Stage::Enqueue, "Enqueue NDRange Kernel Failed")
    }

    /// Blocking copy of the buffer at `handle` into `dst`, after all work
    /// enqueued before it has completed.
    pub fn read_result<T: Pod>(&self, handle: BufferHandle, dst: &mut [T]) -> Result<()> {
        let active =
            self.active.as_ref().ok_or_else(|| phase_error("read_result before initialize"))?;
        let bound = self.buffers.get(handle.position).ok_or_else(|| {
            FatalError::new(
                Stage::ReadBuffer,
                format!("No buffer at position {}", handle.position),
                ClStatus::InvalidMemObject.into(),
            )
        })?;
        self.driver
            .read_buffer(&active.queue, &bound.buffer, cast_slice_mut(dst))
            .or_fatal(Stage::ReadBuffer, "Enqueue Read Buffer Failed")
    }

    /// Wait for queued work, then release every bound buffer and clear the
    /// list. The kernel stays built; its buffer arguments must be rebound
    /// before the next [`execute`](Self::execute).
    pub fn release_buffers(&mut self) {
        if self.buffers.is_empty() {
            return;
        }
        if let Some(active) = &self.active {
            if let Err(e) = self.driver.finish(&active.queue) {
                warn!("Queue finish failed: {e}");
            }
        }
        for bound in self.buffers.drain(..) {
            if let Err(e) = self.driver.release_buffer(bound.buffer) {
                warn!("Release buffer {} failed: {e}", bound.handle.position);
            }
        }
        debug!("Bound buffers released");
    }

    /// Flush and finish the queue, then release kernel, program, buffers,
    /// queue and context in that order. Failures are logged, never raised.
    fn release_all(&mut self) {
        if let Some(active) = &self.active {
            if let Err(e) = self.driver.flush(&active.queue) {
                warn!("Queue flush failed: {e}");
            }
            if let Err(e) = self.driver.finish(&active.queue) {
                warn!("Queue finish failed: {e}");
            }
        }
        if let Some(kernel) = self.kernel.take() {
            if let Err(e) = self.driver.release_kernel(kernel) {
                warn!("Release kernel failed: {e}");
            }
        }
        if let Some(program) = self.program.take() {
            if let Err(e) = self.driver.release_program(program) {
                warn!("Release program failed: {e}");
            }
        }
        for bound in self.buffers.drain(..) {
            if let Err(e) = self.driver.release_buffer(bound.buffer) {
                warn!("Release buffer {} failed: {e}", bound.handle.position);
            }
        }
        if let Some(active) = self.active.take() {
            if let Err(e) = self.driver.release_queue(active.queue) {
                warn!("Release command queue failed: {e}");
            }
            if let Err(e) = self.driver.release_context(active.context) {
                warn!("Release context failed: {e}");
            }
            debug!("Session resources released");
        }
    }
}

impl<D: ComputeDriver> Drop for Session<D> {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HandleKind, HostDriver};
    use crate::kernels::{copy_source, ElementType, COPY_ENTRY};

    fn ready_session() -> Session<HostDriver> {
        let mut session = Session::new(HostDriver::new());
        session.initialize(DeviceSelection::first()).unwrap();
        session.build_kernel(copy_source(ElementType::Int), COPY_ENTRY).unwrap();
        session
    }

    #[test]
    fn phases_advance_in_order() {
        let mut session = Session::new(HostDriver::new());
        assert_eq!(session.phase(), Phase::Uninitialized);
        session.initialize(DeviceSelection::first()).unwrap();
        assert_eq!(session.phase(), Phase::Initialized);
        session.build_kernel(copy_source(ElementType::Int), COPY_ENTRY).unwrap();
        assert_eq!(session.phase(), Phase::Ready);
    }

    #[test]
    fn build_before_initialize_is_phase_error() {
        let mut session = Session::new(HostDriver::new());
        let err = session.build_kernel(copy_source(ElementType::Int), COPY_ENTRY).unwrap_err();
        match err {
            SessionError::Fatal(fatal) => assert_eq!(fatal.stage, Stage::Phase),
            other => panic!("expected phase error, got {other:?}"),
        }
    }

    #[test]
    fn bind_and_execute_before_build_are_phase_errors() {
        let mut session = Session::new(HostDriver::new());
        session.initialize(DeviceSelection::first()).unwrap();
        assert!(session.bind_output(0, 16).unwrap_err().is_fatal());
        assert!(session.bind_scalar(0, 1i32).unwrap_err().is_fatal());
        assert!(session.execute(&[4], None).unwrap_err().is_fatal());
        assert_eq!(session.buffer_count(), 0);
    }

    #[test]
    fn handles_record_position_and_access() {
        let mut session = ready_session();
        let input = session.bind_buffer(0, &[1i32, 2, 3]).unwrap();
        let output = session.bind_output(1, 12).unwrap();
        assert_eq!((input.position(), input.access()), (0, BufferAccess::ReadOnly));
        assert_eq!((output.position(), output.access()), (1, BufferAccess::WriteOnly));
        assert_eq!(session.buffer_handle(1), Some(output));
        assert_eq!(session.buffer_arg_index(output), Some(1));
        assert_eq!(session.buffer_handle(2), None);
    }

    #[test]
    fn rebuilding_replaces_program_and_kernel() {
        let mut session = ready_session();
        session.build_kernel(copy_source(ElementType::Double), COPY_ENTRY).unwrap();
        let ledger = session.driver().ledger();
        assert_eq!(ledger.live(HandleKind::Program), 1);
        assert_eq!(ledger.live(HandleKind::Kernel), 1);
        assert_eq!(ledger.released(HandleKind::Program), 1);
    }

    #[test]
    fn reinitialize_releases_previous_state() {
        let mut session = ready_session();
        session.bind_output(1, 8).unwrap();
        session.initialize(DeviceSelection::first()).unwrap();
        let ledger = session.driver().ledger();
        assert_eq!(session.phase(), Phase::Initialized);
        assert_eq!(session.buffer_count(), 0);
        assert_eq!(ledger.live(HandleKind::Context), 1);
        assert_eq!(ledger.live(HandleKind::Buffer), 0);
        assert_eq!(ledger.double_releases(), 0);
    }

    #[test]
    fn config_build_options_reach_the_driver() {
        let config = SessionConfig { build_options: "-cl-mad-enable".into(), ..Default::default() };
        let mut session = Session::with_config(HostDriver::new(), &config);
        session.initialize(DeviceSelection::first()).unwrap();
        session.build_kernel(copy_source(ElementType::Int), COPY_ENTRY).unwrap();
        assert_eq!(session.driver().ledger().build_options(), vec!["-cl-mad-enable"]);
    }

    #[test]
    fn set_build_options_applies_to_the_next_build() {
        let mut session = ready_session();
        session.set_build_options("-cl-fast-relaxed-math");
        assert_eq!(session.build_options(), "-cl-fast-relaxed-math");
        session.build_kernel(copy_source(ElementType::Double), COPY_ENTRY).unwrap();
        assert_eq!(session.driver().ledger().build_options(), vec!["", "-cl-fast-relaxed-math"]);
        assert_eq!(session.driver().programs_built(), 2);
    }

    #[test]
    fn release_buffers_keeps_the_kernel() {
        let mut session = ready_session();
        session.bind_buffer(0, &[1i32, 2]).unwrap();
        session.bind_output(1, 8).unwrap();
        session.release_buffers();

        let ledger = session.driver().ledger();
        assert_eq!(session.buffer_count(), 0);
        assert_eq!(ledger.live(HandleKind::Buffer), 0);
        assert_eq!(session.phase(), Phase::Ready);

        let handle = session.bind_output(1, 8).unwrap();
        assert_eq!(handle.position(), 0);
        drop(session);
        assert_eq!(ledger.released(HandleKind::Buffer), 3);
        assert_eq!(ledger.double_releases(), 0);
    }
}
