//! [`ComputeDriver`] over a real OpenCL runtime via the `opencl3` crate.
//!
//! Every method is a single OpenCL call. Status codes come back as
//! [`DriverError`]s carrying the raw code; handles are released by dropping
//! their `opencl3` wrappers.

use std::ffi::c_void;
use std::ptr;

use cl3::context::CL_CONTEXT_PLATFORM;
use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{Device, CL_DEVICE_TYPE_ALL};
use opencl3::error_codes::ClError;
use opencl3::kernel::Kernel;
use opencl3::memory::{Buffer, ClMem, CL_MEM_COPY_HOST_PTR, CL_MEM_READ_ONLY, CL_MEM_WRITE_ONLY};
use opencl3::platform::{get_platforms, Platform};
use opencl3::program::Program;
use opencl3::types::{cl_context_properties, cl_uint, CL_BLOCKING};
use tracing::debug;

use crate::driver::{BufferInit, ComputeDriver, DriverResult, NdRange};
use crate::error::DriverError;

fn cl(e: ClError) -> DriverError {
    DriverError::new(e.0)
}

/// The OpenCL ICD loader as a [`ComputeDriver`].
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenClDriver;

impl OpenClDriver {
    pub fn new() -> Self {
        Self
    }
}

impl ComputeDriver for OpenClDriver {
    type Platform = Platform;
    type Device = Device;
    type Context = Context;
    type Queue = CommandQueue;
    type Program = Program;
    type Kernel = Kernel;
    type Buffer = Buffer<u8>;

    fn platforms(&self) -> DriverResult<Vec<Platform>> {
        get_platforms().map_err(cl)
    }

    fn platform_name(&self, platform: &Platform) -> DriverResult<String> {
        platform.name().map_err(cl)
    }

    fn devices(&self, platform: &Platform) -> DriverResult<Vec<Device>> {
        let ids = platform.get_devices(CL_DEVICE_TYPE_ALL).map_err(cl)?;
        Ok(ids.into_iter().map(Device::new).collect())
    }

    fn device_name(&self, device: &Device) -> DriverResult<String> {
        device.name().map_err(cl)
    }

    fn create_context(&self, platform: &Platform, device: &Device) -> DriverResult<Context> {
        let properties = [
            CL_CONTEXT_PLATFORM as cl_context_properties,
            platform.id() as cl_context_properties,
            0,
        ];
        Context::from_devices(&[device.id()], &properties, None, ptr::null_mut()).map_err(cl)
    }

    fn create_queue(&self, context: &Context, _device: &Device) -> DriverResult<CommandQueue> {
        // The context holds exactly one device, which the default queue targets.
        CommandQueue::create_default_with_properties(context, 0, 0).map_err(cl)
    }

    fn create_program(&self, context: &Context, source: &str) -> DriverResult<Program> {
        Program::create_from_source(context, source).map_err(cl)
    }

    fn build_program(
        &self,
        program: &mut Program,
        device: &Device,
        options: &str,
    ) -> DriverResult<()> {
        program.build(&[device.id()], options).map_err(cl)
    }

    fn build_log(&self, program: &Program, device: &Device) -> DriverResult<String> {
        program.get_build_log(device.id()).map_err(cl)
    }

    fn create_kernel(&self, program: &Program, entry_point: &str) -> DriverResult<Kernel> {
        Kernel::create(program, entry_point).map_err(cl)
    }

    fn create_buffer(&self, context: &Context, init: BufferInit<'_>) -> DriverResult<Buffer<u8>> {
        // SAFETY: with CL_MEM_COPY_HOST_PTR the runtime copies `bytes` before
        // returning and never writes through the pointer; otherwise it is null.
        let buffer = unsafe {
            match init {
                BufferInit::CopyHost(bytes) => Buffer::<u8>::create(
                    context,
                    CL_MEM_READ_ONLY | CL_MEM_COPY_HOST_PTR,
                    bytes.len(),
                    bytes.as_ptr() as *mut c_void,
                ),
                BufferInit::WriteOnly(len) => {
                    Buffer::<u8>::create(context, CL_MEM_WRITE_ONLY, len, ptr::null_mut())
                }
            }
        };
        buffer.map_err(cl)
    }

    fn set_buffer_arg(
        &self,
        kernel: &mut Kernel,
        index: u32,
        buffer: &Buffer<u8>,
    ) -> DriverResult<()> {
        // SAFETY: the argument is a live cl_mem handle of the expected size.
        unsafe { kernel.set_arg(index as cl_uint, &buffer.get()) }.map_err(cl)
    }

    fn set_scalar_arg(&self, kernel: &mut Kernel, index: u32, bytes: &[u8]) -> DriverResult<()> {
        // SAFETY: the runtime copies `bytes.len()` bytes before returning.
        unsafe {
            cl3::kernel::set_kernel_arg(
                kernel.get(),
                index as cl_uint,
                bytes.len(),
                bytes.as_ptr() as *const c_void,
            )
        }
        .map_err(DriverError::new)
    }

    fn enqueue_kernel(
        &self,
        queue: &CommandQueue,
        kernel: &Kernel,
        range: NdRange<'_>,
    ) -> DriverResult<()> {
        let local = range.local.map_or(ptr::null(), |l| l.as_ptr());
        debug!(dims = range.dimensions(), global = ?range.global, "clEnqueueNDRangeKernel");
        // SAFETY: `global` and `local` hold `dimensions()` entries and outlive the call.
        let event = unsafe {
            queue.enqueue_nd_range_kernel(
                kernel.get(),
                range.dimensions() as cl_uint,
                ptr::null(),
                range.global.as_ptr(),
                local,
                &[],
            )
        }
        .map_err(cl)?;
        drop(event);
        Ok(())
    }

    fn read_buffer(
        &self,
        queue: &CommandQueue,
        buffer: &Buffer<u8>,
        dst: &mut [u8],
    ) -> DriverResult<()> {
        // SAFETY: blocking read, so `dst` is fully written before the call returns.
        unsafe { queue.enqueue_read_buffer(buffer, CL_BLOCKING, 0, dst, &[]) }.map_err(cl)?;
        Ok(())
    }

    fn flush(&self, queue: &CommandQueue) -> DriverResult<()> {
        queue.flush().map_err(cl)
    }

    fn finish(&self, queue: &CommandQueue) -> DriverResult<()> {
        queue.finish().map_err(cl)
    }

    fn release_kernel(&self, kernel: Kernel) -> DriverResult<()> {
        drop(kernel);
        Ok(())
    }

    fn release_program(&self, program: Program) -> DriverResult<()> {
        drop(program);
        Ok(())
    }

    fn release_buffer(&self, buffer: Buffer<u8>) -> DriverResult<()> {
        drop(buffer);
        Ok(())
    }

    fn release_queue(&self, queue: CommandQueue) -> DriverResult<()> {
        drop(queue);
        Ok(())
    }

    fn release_context(&self, context: Context) -> DriverResult<()> {
        drop(context);
        Ok(())
    }
}
