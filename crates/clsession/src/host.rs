//! In-process reference driver.
//!
//! [`HostDriver`] implements [`ComputeDriver`] without any device runtime.
//! Programs are "compiled" by parsing their `__kernel` signatures and kernels
//! run synchronously through registered host functions. Every handle created
//! or released is recorded in a [`HostLedger`], and any operation can be made
//! to fail with a chosen status, so the session's sequencing and resource
//! discipline can be tested on machines without an OpenCL runtime.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::mem::size_of;
use std::rc::Rc;

use bytemuck::{cast_slice, pod_read_unaligned, Pod};
use tracing::{debug, trace};

use crate::driver::{BufferAccess, BufferInit, ComputeDriver, DriverResult, NdRange};
use crate::error::{ClStatus, DriverError};
use crate::reference::MatrixElement;
use crate::signature::{scalar_size, validate_kernel_source, KernelSignature};

pub const DEFAULT_PLATFORM_NAME: &str = "Host Reference Platform";
pub const DEFAULT_DEVICE_NAME: &str = "Host Reference Device";

/// A platform and the names of its devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPlatformSpec {
    pub name: String,
    pub devices: Vec<String>,
}

impl HostPlatformSpec {
    pub fn new(name: &str, devices: &[&str]) -> Self {
        Self { name: name.to_string(), devices: devices.iter().map(|d| d.to_string()).collect() }
    }
}

/// Driver operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOp {
    Platforms,
    Devices,
    CreateContext,
    CreateQueue,
    CreateProgram,
    BuildProgram,
    CreateKernel,
    CreateBuffer,
    SetArg,
    Enqueue,
    ReadBuffer,
    Release,
}

/// Kinds of handle the ledger tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandleKind {
    Context,
    Queue,
    Program,
    Kernel,
    Buffer,
}

#[derive(Debug, Default)]
struct LedgerState {
    next_id: u64,
    created: HashMap<HandleKind, usize>,
    released: HashMap<HandleKind, usize>,
    live: BTreeSet<(HandleKind, u64)>,
    release_order: Vec<HandleKind>,
    double_releases: usize,
    contexts: Vec<(String, String)>,
    build_options: Vec<String>,
    launches: usize,
    finishes: usize,
}

/// Shared record of everything a [`HostDriver`] created and released.
///
/// Cloning yields another view of the same record, so it stays readable after
/// the driver itself has been dropped along with its session.
#[derive(Debug, Clone, Default)]
pub struct HostLedger(Rc<RefCell<LedgerState>>);

impl HostLedger {
    fn create(&self, kind: HandleKind) -> u64 {
        let mut state = self.0.borrow_mut();
        state.next_id += 1;
        let id = state.next_id;
        *state.created.entry(kind).or_default() += 1;
        state.live.insert((kind, id));
        trace!(?kind, id, "handle created");
        id
    }

    fn release(&self, kind: HandleKind, id: u64) {
        let mut state = self.0.borrow_mut();
        if state.live.remove(&(kind, id)) {
            *state.released.entry(kind).or_default() += 1;
            state.release_order.push(kind);
            trace!(?kind, id, "handle released");
        } else {
            state.double_releases += 1;
        }
    }

    pub fn created(&self, kind: HandleKind) -> usize {
        self.0.borrow().created.get(&kind).copied().unwrap_or(0)
    }

    pub fn released(&self, kind: HandleKind) -> usize {
        self.0.borrow().released.get(&kind).copied().unwrap_or(0)
    }

    /// Handles of `kind` created but not yet released.
    pub fn live(&self, kind: HandleKind) -> usize {
        self.0.borrow().live.iter().filter(|(k, _)| *k == kind).count()
    }

    pub fn live_total(&self) -> usize {
        self.0.borrow().live.len()
    }

    /// Kinds in the order their handles were released.
    pub fn release_order(&self) -> Vec<HandleKind> {
        self.0.borrow().release_order.clone()
    }

    /// Releases of a handle that was not live.
    pub fn double_releases(&self) -> usize {
        self.0.borrow().double_releases
    }

    /// `(platform, device)` names of every context created, in order.
    pub fn contexts(&self) -> Vec<(String, String)> {
        self.0.borrow().contexts.clone()
    }

    /// Option strings passed to every program build, in order.
    pub fn build_options(&self) -> Vec<String> {
        self.0.borrow().build_options.clone()
    }

    pub fn launches(&self) -> usize {
        self.0.borrow().launches
    }

    pub fn finishes(&self) -> usize {
        self.0.borrow().finishes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPlatform {
    index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDevice {
    platform: usize,
    index: usize,
}

#[derive(Debug)]
pub struct HostContext {
    id: u64,
    device: HostDevice,
}

#[derive(Debug)]
pub struct HostQueue {
    id: u64,
}

#[derive(Debug)]
pub struct HostProgram {
    id: u64,
    source: String,
    signatures: Vec<KernelSignature>,
    log: String,
    built: bool,
}

#[derive(Debug, Clone)]
enum HostArg {
    Buffer(Rc<RefCell<Vec<u8>>>),
    Scalar(Vec<u8>),
}

#[derive(Debug)]
pub struct HostKernel {
    id: u64,
    signature: KernelSignature,
    args: Vec<Option<HostArg>>,
}

#[derive(Debug)]
pub struct HostBuffer {
    id: u64,
    access: BufferAccess,
    data: Rc<RefCell<Vec<u8>>>,
}

impl HostBuffer {
    pub fn access(&self) -> BufferAccess {
        self.access
    }

    pub fn byte_len(&self) -> usize {
        self.data.borrow().len()
    }
}

/// A host implementation of a kernel, run once per launch over the whole
/// index space.
pub type HostKernelFn = fn(&HostInvocation<'_>) -> DriverResult<()>;

/// Arguments and index space of one kernel launch.
pub struct HostInvocation<'a> {
    signature: &'a KernelSignature,
    args: Vec<HostArg>,
    global: &'a [usize],
}

impl HostInvocation<'_> {
    pub fn kernel_name(&self) -> &str {
        &self.signature.name
    }

    /// Global size in dimension `dim`; 1 for dimensions beyond the range.
    pub fn global_size(&self, dim: usize) -> usize {
        self.global.get(dim).copied().unwrap_or(1)
    }

    /// Declared base type of parameter `index`, e.g. `int`.
    pub fn base_type(&self, index: usize) -> DriverResult<String> {
        self.signature
            .args
            .get(index)
            .map(|arg| arg.base_type())
            .ok_or_else(|| ClStatus::InvalidArgIndex.into())
    }

    /// Value bound to a by-value parameter.
    pub fn scalar<T: Pod>(&self, index: usize) -> DriverResult<T> {
        match self.args.get(index) {
            Some(HostArg::Scalar(bytes)) if bytes.len() == size_of::<T>() => {
                Ok(pod_read_unaligned(bytes))
            }
            Some(HostArg::Scalar(_)) => Err(ClStatus::InvalidArgSize.into()),
            _ => Err(ClStatus::InvalidArgValue.into()),
        }
    }

    /// Copy of the buffer bound to parameter `index`, as elements of `T`.
    pub fn read<T: Pod>(&self, index: usize) -> DriverResult<Vec<T>> {
        let data = self.buffer(index)?.borrow();
        Ok(data.chunks_exact(size_of::<T>()).map(pod_read_unaligned).collect())
    }

    /// Overwrite the start of the buffer bound to parameter `index`.
    pub fn write<T: Pod>(&self, index: usize, values: &[T]) -> DriverResult<()> {
        let bytes: &[u8] = cast_slice(values);
        let mut data = self.buffer(index)?.borrow_mut();
        let dst = data.get_mut(..bytes.len()).ok_or(DriverError::from(ClStatus::OutOfResources))?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    fn buffer(&self, index: usize) -> DriverResult<&Rc<RefCell<Vec<u8>>>> {
        match self.args.get(index) {
            Some(HostArg::Buffer(data)) => Ok(data),
            _ => Err(ClStatus::InvalidMemObject.into()),
        }
    }
}

/// Pure-Rust [`ComputeDriver`].
pub struct HostDriver {
    topology: Vec<HostPlatformSpec>,
    ledger: HostLedger,
    failures: RefCell<HashMap<HostOp, ClStatus>>,
    kernels: RefCell<HashMap<String, HostKernelFn>>,
    program_count: Cell<usize>,
}

impl Default for HostDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDriver {
    /// One platform with one device.
    pub fn new() -> Self {
        Self::with_topology(vec![HostPlatformSpec::new(
            DEFAULT_PLATFORM_NAME,
            &[DEFAULT_DEVICE_NAME],
        )])
    }

    pub fn with_topology(topology: Vec<HostPlatformSpec>) -> Self {
        let mut kernels: HashMap<String, HostKernelFn> = HashMap::new();
        kernels.insert("multiplyMatrices".into(), multiply_matrices);
        kernels.insert("multiplyMatricesTrans".into(), multiply_matrices_trans);
        kernels.insert("copyBuffer".into(), copy_buffer);
        Self {
            topology,
            ledger: HostLedger::default(),
            failures: RefCell::new(HashMap::new()),
            kernels: RefCell::new(kernels),
            program_count: Cell::new(0),
        }
    }

    /// Make every later call of `op` fail with `status`.
    pub fn fail(&self, op: HostOp, status: ClStatus) {
        self.failures.borrow_mut().insert(op, status);
    }

    pub fn clear_failure(&self, op: HostOp) {
        self.failures.borrow_mut().remove(&op);
    }

    /// Provide a host implementation for kernels named `name`.
    pub fn register_kernel(&self, name: &str, kernel: HostKernelFn) {
        self.kernels.borrow_mut().insert(name.to_string(), kernel);
    }

    pub fn ledger(&self) -> HostLedger {
        self.ledger.clone()
    }

    /// Number of programs built successfully.
    pub fn programs_built(&self) -> usize {
        self.program_count.get()
    }

    fn check(&self, op: HostOp) -> DriverResult<()> {
        match self.failures.borrow().get(&op) {
            Some(&status) => {
                debug!(?op, %status, "injected failure");
                Err(status.into())
            }
            None => Ok(()),
        }
    }

    fn platform_spec(&self, index: usize) -> DriverResult<&HostPlatformSpec> {
        self.topology.get(index).ok_or_else(|| ClStatus::InvalidPlatform.into())
    }
}

impl ComputeDriver for HostDriver {
    type Platform = HostPlatform;
    type Device = HostDevice;
    type Context = HostContext;
    type Queue = HostQueue;
    type Program = HostProgram;
    type Kernel = HostKernel;
    type Buffer = HostBuffer;

    fn platforms(&self) -> DriverResult<Vec<HostPlatform>> {
        self.check(HostOp::Platforms)?;
        Ok((0..self.topology.len()).map(|index| HostPlatform { index }).collect())
    }

    fn platform_name(&self, platform: &HostPlatform) -> DriverResult<String> {
        Ok(self.platform_spec(platform.index)?.name.clone())
    }

    fn devices(&self, platform: &HostPlatform) -> DriverResult<Vec<HostDevice>> {
        self.check(HostOp::Devices)?;
        let spec = self.platform_spec(platform.index)?;
        Ok((0..spec.devices.len())
            .map(|index| HostDevice { platform: platform.index, index })
            .collect())
    }

    fn device_name(&self, device: &HostDevice) -> DriverResult<String> {
        let spec = self.platform_spec(device.platform)?;
        spec.devices.get(device.index).cloned().ok_or_else(|| ClStatus::InvalidDevice.into())
    }

    fn create_context(
        &self,
        platform: &HostPlatform,
        device: &HostDevice,
    ) -> DriverResult<HostContext> {
        self.check(HostOp::CreateContext)?;
        if device.platform != platform.index {
            return Err(ClStatus::InvalidDevice.into());
        }
        let names = (self.platform_name(platform)?, self.device_name(device)?);
        self.ledger.0.borrow_mut().contexts.push(names);
        let id = self.ledger.create(HandleKind::Context);
        Ok(HostContext { id, device: device.clone() })
    }

    fn create_queue(&self, context: &HostContext, device: &HostDevice) -> DriverResult<HostQueue> {
        self.check(HostOp::CreateQueue)?;
        if context.device != *device {
            return Err(ClStatus::InvalidDevice.into());
        }
        Ok(HostQueue { id: self.ledger.create(HandleKind::Queue) })
    }

    fn create_program(&self, _context: &HostContext, source: &str) -> DriverResult<HostProgram> {
        self.check(HostOp::CreateProgram)?;
        Ok(HostProgram {
            id: self.ledger.create(HandleKind::Program),
            source: source.to_string(),
            signatures: Vec::new(),
            log: String::new(),
            built: false,
        })
    }

    fn build_program(
        &self,
        program: &mut HostProgram,
        _device: &HostDevice,
        options: &str,
    ) -> DriverResult<()> {
        self.ledger.0.borrow_mut().build_options.push(options.to_string());
        if let Err(e) = self.check(HostOp::BuildProgram) {
            program.log = format!("error: build failed with {}", e.status);
            return Err(e);
        }
        if let Some(bad) = options.split_whitespace().find(|opt| !opt.starts_with('-')) {
            program.log = format!("error: invalid build option '{bad}'");
            return Err(ClStatus::InvalidBuildOptions.into());
        }
        match validate_kernel_source(&program.source) {
            Ok(signatures) => {
                debug!(kernels = signatures.len(), "host program built");
                program.signatures = signatures;
                program.log.clear();
                program.built = true;
                self.program_count.set(self.program_count.get() + 1);
                Ok(())
            }
            Err(e) => {
                program.log = format!("<kernel>: error: {e}");
                Err(ClStatus::BuildProgramFailure.into())
            }
        }
    }

    fn build_log(&self, program: &HostProgram, _device: &HostDevice) -> DriverResult<String> {
        Ok(program.log.clone())
    }

    fn create_kernel(&self, program: &HostProgram, entry_point: &str) -> DriverResult<HostKernel> {
        self.check(HostOp::CreateKernel)?;
        if !program.built {
            return Err(ClStatus::InvalidProgramExecutable.into());
        }
        let signature = program
            .signatures
            .iter()
            .find(|sig| sig.name == entry_point)
            .cloned()
            .ok_or(DriverError::from(ClStatus::InvalidKernelName))?;
        let args = vec![None; signature.args.len()];
        Ok(HostKernel { id: self.ledger.create(HandleKind::Kernel), signature, args })
    }

    fn create_buffer(
        &self,
        _context: &HostContext,
        init: BufferInit<'_>,
    ) -> DriverResult<HostBuffer> {
        self.check(HostOp::CreateBuffer)?;
        if init.byte_len() == 0 {
            return Err(ClStatus::InvalidBufferSize.into());
        }
        let data = match init {
            BufferInit::CopyHost(bytes) => bytes.to_vec(),
            // Contents of an output buffer are unspecified until a kernel writes them.
            BufferInit::WriteOnly(len) => vec![0; len],
        };
        Ok(HostBuffer {
            id: self.ledger.create(HandleKind::Buffer),
            access: init.access(),
            data: Rc::new(RefCell::new(data)),
        })
    }

    fn set_buffer_arg(
        &self,
        kernel: &mut HostKernel,
        index: u32,
        buffer: &HostBuffer,
    ) -> DriverResult<()> {
        self.check(HostOp::SetArg)?;
        let slot = index as usize;
        let param = kernel.signature.args.get(slot).ok_or(ClStatus::InvalidArgIndex)?;
        if !param.is_pointer {
            return Err(ClStatus::InvalidArgValue.into());
        }
        kernel.args[slot] = Some(HostArg::Buffer(Rc::clone(&buffer.data)));
        Ok(())
    }

    fn set_scalar_arg(
        &self,
        kernel: &mut HostKernel,
        index: u32,
        bytes: &[u8],
    ) -> DriverResult<()> {
        self.check(HostOp::SetArg)?;
        let slot = index as usize;
        let param = kernel.signature.args.get(slot).ok_or(ClStatus::InvalidArgIndex)?;
        if param.is_pointer {
            return Err(ClStatus::InvalidArgValue.into());
        }
        let size_ok = match param.value_size() {
            Some(size) => size == bytes.len(),
            None => !bytes.is_empty(),
        };
        if !size_ok {
            return Err(ClStatus::InvalidArgSize.into());
        }
        kernel.args[slot] = Some(HostArg::Scalar(bytes.to_vec()));
        Ok(())
    }

    fn enqueue_kernel(
        &self,
        queue: &HostQueue,
        kernel: &HostKernel,
        range: NdRange<'_>,
    ) -> DriverResult<()> {
        self.check(HostOp::Enqueue)?;
        if !(1..=3).contains(&range.dimensions()) {
            return Err(ClStatus::InvalidWorkDimension.into());
        }
        if range.global.contains(&0) {
            return Err(ClStatus::InvalidGlobalWorkSize.into());
        }
        if let Some(local) = range.local {
            let divides =
                local.len() == range.global.len()
                    && local.iter().zip(range.global).all(|(&l, &g)| l != 0 && g % l == 0);
            if !divides {
                return Err(ClStatus::InvalidWorkGroupSize.into());
            }
        }
        let args = kernel
            .args
            .iter()
            .cloned()
            .collect::<Option<Vec<_>>>()
            .ok_or(DriverError::from(ClStatus::InvalidKernelArgs))?;
        let run = self
            .kernels
            .borrow()
            .get(&kernel.signature.name)
            .copied()
            .ok_or(DriverError::from(ClStatus::InvalidOperation))?;

        trace!(queue = queue.id, kernel = %kernel.signature.name, global = ?range.global, "launch");
        run(&HostInvocation { signature: &kernel.signature, args, global: range.global })?;
        self.ledger.0.borrow_mut().launches += 1;
        Ok(())
    }

    fn read_buffer(
        &self,
        _queue: &HostQueue,
        buffer: &HostBuffer,
        dst: &mut [u8],
    ) -> DriverResult<()> {
        self.check(HostOp::ReadBuffer)?;
        let data = buffer.data.borrow();
        let src = data.get(..dst.len()).ok_or(DriverError::from(ClStatus::InvalidValue))?;
        dst.copy_from_slice(src);
        Ok(())
    }

    fn flush(&self, _queue: &HostQueue) -> DriverResult<()> {
        Ok(())
    }

    fn finish(&self, _queue: &HostQueue) -> DriverResult<()> {
        self.ledger.0.borrow_mut().finishes += 1;
        Ok(())
    }

    fn release_kernel(&self, kernel: HostKernel) -> DriverResult<()> {
        self.check(HostOp::Release)?;
        self.ledger.release(HandleKind::Kernel, kernel.id);
        Ok(())
    }

    fn release_program(&self, program: HostProgram) -> DriverResult<()> {
        self.check(HostOp::Release)?;
        self.ledger.release(HandleKind::Program, program.id);
        Ok(())
    }

    fn release_buffer(&self, buffer: HostBuffer) -> DriverResult<()> {
        self.check(HostOp::Release)?;
        self.ledger.release(HandleKind::Buffer, buffer.id);
        Ok(())
    }

    fn release_queue(&self, queue: HostQueue) -> DriverResult<()> {
        self.check(HostOp::Release)?;
        self.ledger.release(HandleKind::Queue, queue.id);
        Ok(())
    }

    fn release_context(&self, context: HostContext) -> DriverResult<()> {
        self.check(HostOp::Release)?;
        self.ledger.release(HandleKind::Context, context.id);
        Ok(())
    }
}

// ── Built-in kernels ────────────────────────────────────────────────────────

fn multiply_matrices(inv: &HostInvocation<'_>) -> DriverResult<()> {
    dispatch_matmul(inv, false)
}

fn multiply_matrices_trans(inv: &HostInvocation<'_>) -> DriverResult<()> {
    dispatch_matmul(inv, true)
}

fn dispatch_matmul(inv: &HostInvocation<'_>, transposed: bool) -> DriverResult<()> {
    match inv.base_type(0)?.as_str() {
        "int" => run_matmul::<i32>(inv, transposed),
        "float" => run_matmul::<f32>(inv, transposed),
        "double" => run_matmul::<f64>(inv, transposed),
        _ => Err(ClStatus::InvalidOperation.into()),
    }
}

/// Parameters `(a, b, c, M)`; work item `(col, row)` computes `c[row * M + col]`.
fn run_matmul<T: MatrixElement>(inv: &HostInvocation<'_>, transposed: bool) -> DriverResult<()> {
    let a: Vec<T> = inv.read(0)?;
    let b: Vec<T> = inv.read(1)?;
    let mut c: Vec<T> = inv.read(2)?;
    let m = usize::try_from(inv.scalar::<i32>(3)?)
        .map_err(|_| DriverError::from(ClStatus::InvalidArgValue))?;
    let oob = || DriverError::from(ClStatus::OutOfResources);

    for row in 0..inv.global_size(1) {
        for col in 0..inv.global_size(0) {
            let mut sum = T::ZERO;
            for k in 0..m {
                let b_at = if transposed { col * m + k } else { k * m + col };
                let x = *a.get(row * m + k).ok_or_else(oob)?;
                let y = *b.get(b_at).ok_or_else(oob)?;
                sum = T::mul_add(sum, x, y);
            }
            *c.get_mut(row * m + col).ok_or_else(oob)? = sum;
        }
    }
    inv.write(2, &c)
}

/// Parameters `(src, dst)`; work item `i` copies element `i`.
fn copy_buffer(inv: &HostInvocation<'_>) -> DriverResult<()> {
    let width = scalar_size(&inv.base_type(0)?).ok_or(ClStatus::InvalidOperation)?;
    let src: Vec<u8> = inv.read(0)?;
    let mut dst: Vec<u8> = inv.read(1)?;
    let bytes = inv.global_size(0) * width;
    let (from, to) = (src.get(..bytes), dst.get_mut(..bytes));
    match (from, to) {
        (Some(from), Some(to)) => to.copy_from_slice(from),
        _ => return Err(ClStatus::OutOfResources.into()),
    }
    inv.write(1, &dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COPY_SRC: &str =
        "__kernel void copyBuffer(__global const int* src, __global int* dst) { \
         int i = get_global_id(0); dst[i] = src[i]; }";

    fn selected(driver: &HostDriver) -> (HostContext, HostQueue, HostDevice) {
        let platform = driver.platforms().unwrap().remove(0);
        let device = driver.devices(&platform).unwrap().remove(0);
        let ctx = driver.create_context(&platform, &device).unwrap();
        let queue = driver.create_queue(&ctx, &device).unwrap();
        (ctx, queue, device)
    }

    fn built(driver: &HostDriver, ctx: &HostContext, dev: &HostDevice, src: &str) -> HostProgram {
        let mut program = driver.create_program(ctx, src).unwrap();
        driver.build_program(&mut program, dev, "").unwrap();
        program
    }

    #[test]
    fn default_topology_has_one_device() {
        let driver = HostDriver::new();
        let platforms = driver.platforms().unwrap();
        assert_eq!(platforms.len(), 1);
        assert_eq!(driver.platform_name(&platforms[0]).unwrap(), DEFAULT_PLATFORM_NAME);
        let devices = driver.devices(&platforms[0]).unwrap();
        assert_eq!(driver.device_name(&devices[0]).unwrap(), DEFAULT_DEVICE_NAME);
    }

    #[test]
    fn context_rejects_device_from_other_platform() {
        let driver = HostDriver::with_topology(vec![
            HostPlatformSpec::new("A", &["a0"]),
            HostPlatformSpec::new("B", &["b0"]),
        ]);
        let platforms = driver.platforms().unwrap();
        let foreign = driver.devices(&platforms[1]).unwrap().remove(0);
        let err = driver.create_context(&platforms[0], &foreign).unwrap_err();
        assert_eq!(err.status, ClStatus::InvalidDevice);
    }

    #[test]
    fn malformed_source_fails_with_log() {
        let driver = HostDriver::new();
        let (ctx, _queue, dev) = selected(&driver);
        let mut program = driver.create_program(&ctx, "__kernel void broken(int a) {").unwrap();
        let err = driver.build_program(&mut program, &dev, "").unwrap_err();
        assert_eq!(err.status, ClStatus::BuildProgramFailure);
        assert!(driver.build_log(&program, &dev).unwrap().contains("unbalanced"));
    }

    #[test]
    fn non_flag_build_option_is_rejected() {
        let driver = HostDriver::new();
        let (ctx, _queue, dev) = selected(&driver);
        let mut program = driver.create_program(&ctx, COPY_SRC).unwrap();
        let options = "-cl-fast-relaxed-math oops";
        let err = driver.build_program(&mut program, &dev, options).unwrap_err();
        assert_eq!(err.status, ClStatus::InvalidBuildOptions);
        assert_eq!(driver.ledger().build_options(), vec!["-cl-fast-relaxed-math oops"]);
    }

    #[test]
    fn kernel_requires_known_entry_point() {
        let driver = HostDriver::new();
        let (ctx, _queue, dev) = selected(&driver);
        let program = built(&driver, &ctx, &dev, COPY_SRC);
        let err = driver.create_kernel(&program, "nope").unwrap_err();
        assert_eq!(err.status, ClStatus::InvalidKernelName);
    }

    #[test]
    fn kernel_requires_built_program() {
        let driver = HostDriver::new();
        let (ctx, _queue, _dev) = selected(&driver);
        let program = driver.create_program(&ctx, COPY_SRC).unwrap();
        let err = driver.create_kernel(&program, "copyBuffer").unwrap_err();
        assert_eq!(err.status, ClStatus::InvalidProgramExecutable);
    }

    #[test]
    fn argument_checks_follow_signature() {
        let driver = HostDriver::new();
        let (ctx, _queue, dev) = selected(&driver);
        let program = built(&driver, &ctx, &dev, COPY_SRC);
        let mut kernel = driver.create_kernel(&program, "copyBuffer").unwrap();
        let buf = driver.create_buffer(&ctx, BufferInit::WriteOnly(16)).unwrap();

        let err = driver.set_buffer_arg(&mut kernel, 2, &buf).unwrap_err();
        assert_eq!(err.status, ClStatus::InvalidArgIndex);
        let err = driver.set_scalar_arg(&mut kernel, 0, &7i32.to_ne_bytes()).unwrap_err();
        assert_eq!(err.status, ClStatus::InvalidArgValue);
    }

    #[test]
    fn copy_kernel_copies_elements() {
        let driver = HostDriver::new();
        let (ctx, queue, dev) = selected(&driver);
        let program = built(&driver, &ctx, &dev, COPY_SRC);
        let mut kernel = driver.create_kernel(&program, "copyBuffer").unwrap();

        let input = [5i32, -3, 12, 99];
        let src = driver.create_buffer(&ctx, BufferInit::CopyHost(cast_slice(&input))).unwrap();
        let dst = driver.create_buffer(&ctx, BufferInit::WriteOnly(16)).unwrap();
        driver.set_buffer_arg(&mut kernel, 0, &src).unwrap();
        driver.set_buffer_arg(&mut kernel, 1, &dst).unwrap();
        driver.enqueue_kernel(&queue, &kernel, NdRange::new(&[4], Some(&[2]))).unwrap();

        let mut out = [0u8; 16];
        driver.read_buffer(&queue, &dst, &mut out).unwrap();
        let values: Vec<i32> = out.chunks_exact(4).map(pod_read_unaligned).collect();
        assert_eq!(values, input);
        assert_eq!(driver.ledger().launches(), 1);
    }

    #[test]
    fn enqueue_validates_index_space() {
        let driver = HostDriver::new();
        let (ctx, queue, dev) = selected(&driver);
        let program = built(&driver, &ctx, &dev, COPY_SRC);
        let kernel = driver.create_kernel(&program, "copyBuffer").unwrap();

        let cases: [(&[usize], Option<&[usize]>, ClStatus); 4] = [
            (&[], None, ClStatus::InvalidWorkDimension),
            (&[1, 1, 1, 1], None, ClStatus::InvalidWorkDimension),
            (&[0], None, ClStatus::InvalidGlobalWorkSize),
            (&[6], Some(&[4]), ClStatus::InvalidWorkGroupSize),
        ];
        for (global, local, expected) in cases {
            let range = NdRange::new(global, local);
            let err = driver.enqueue_kernel(&queue, &kernel, range).unwrap_err();
            assert_eq!(err.status, expected, "global {global:?} local {local:?}");
        }
        let err = driver.enqueue_kernel(&queue, &kernel, NdRange::new(&[4], None)).unwrap_err();
        assert_eq!(err.status, ClStatus::InvalidKernelArgs);
    }

    #[test]
    fn unregistered_kernel_cannot_launch_until_registered() {
        fn fill_sevens(inv: &HostInvocation<'_>) -> DriverResult<()> {
            inv.write(0, &vec![7i32; inv.global_size(0)])
        }

        let driver = HostDriver::new();
        let (ctx, queue, dev) = selected(&driver);
        let program = built(&driver, &ctx, &dev, "__kernel void fill(__global int* out) { }");
        let mut kernel = driver.create_kernel(&program, "fill").unwrap();
        let out = driver.create_buffer(&ctx, BufferInit::WriteOnly(12)).unwrap();
        driver.set_buffer_arg(&mut kernel, 0, &out).unwrap();

        let range = NdRange::new(&[3], None);
        let err = driver.enqueue_kernel(&queue, &kernel, range).unwrap_err();
        assert_eq!(err.status, ClStatus::InvalidOperation);

        driver.register_kernel("fill", fill_sevens);
        driver.enqueue_kernel(&queue, &kernel, range).unwrap();
        let mut bytes = [0u8; 12];
        driver.read_buffer(&queue, &out, &mut bytes).unwrap();
        assert_eq!(bytes.chunks_exact(4).map(pod_read_unaligned).collect::<Vec<i32>>(), [7, 7, 7]);
    }

    #[test]
    fn oversized_read_is_rejected() {
        let driver = HostDriver::new();
        let (ctx, queue, _dev) = selected(&driver);
        let buf = driver.create_buffer(&ctx, BufferInit::WriteOnly(4)).unwrap();
        let mut dst = [0u8; 8];
        let err = driver.read_buffer(&queue, &buf, &mut dst).unwrap_err();
        assert_eq!(err.status, ClStatus::InvalidValue);
    }

    #[test]
    fn ledger_tracks_create_and_release() {
        let driver = HostDriver::new();
        let ledger = driver.ledger();
        let (ctx, queue, _dev) = selected(&driver);
        assert_eq!(ledger.live_total(), 2);

        driver.release_queue(queue).unwrap();
        driver.release_context(ctx).unwrap();
        assert_eq!(ledger.live_total(), 0);
        assert_eq!(ledger.release_order(), vec![HandleKind::Queue, HandleKind::Context]);
        assert_eq!(ledger.double_releases(), 0);
        assert_eq!(ledger.contexts(), vec![(
            DEFAULT_PLATFORM_NAME.to_string(),
            DEFAULT_DEVICE_NAME.to_string()
        )]);
    }

    #[test]
    fn injected_failure_persists_until_cleared() {
        let driver = HostDriver::new();
        driver.fail(HostOp::Platforms, ClStatus::OutOfHostMemory);
        assert_eq!(driver.platforms().unwrap_err().status, ClStatus::OutOfHostMemory);
        assert_eq!(driver.platforms().unwrap_err().status, ClStatus::OutOfHostMemory);
        driver.clear_failure(HostOp::Platforms);
        assert!(driver.platforms().is_ok());
    }
}
