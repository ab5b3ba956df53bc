use super::{
    BufferUsage, DeviceEngine, DeviceEngineBuffer, DeviceEngineImage, DeviceEngineKernel,
    DeviceInfo, DeviceLost, EngineArg, HostKernelFn, HostOptions, ImageUsage, KernelDesc,
};
use crate::{
    buffer::{error::AlreadyMapped, Extent3d, Mapped, MappedBytes},
    kernel::WorkgroupDimensions,
    pixel::{Pixel, PixelType},
};
use anyhow::{anyhow, bail, Result};
use bytemuck::Pod;
use parking_lot::{Mutex, MutexGuard};
use std::{
    collections::{HashMap, HashSet},
    ops::{Deref, DerefMut},
    sync::Arc,
};

pub(crate) struct Engine {
    info: Arc<DeviceInfo>,
    kernels: HashMap<String, HostKernelFn>,
    unsupported_formats: HashSet<PixelType>,
}

impl Engine {
    pub(crate) fn new(options: HostOptions) -> Arc<Self> {
        let HostOptions {
            kernels,
            unsupported_formats,
            max_workgroup_size,
        } = options;
        let info = Arc::new(DeviceInfo {
            index: None,
            name: "host".to_string(),
            max_workgroup_size,
            max_workgroup_invocations: 1024,
        });
        tracing::debug!(kernels = kernels.len(), "created host device");
        Arc::new(Self {
            info,
            kernels,
            unsupported_formats,
        })
    }
}

impl DeviceEngine for Engine {
    type Buffer = Buffer;
    type Image = Image;
    type Kernel = Kernel;
    fn info(&self) -> &Arc<DeviceInfo> {
        &self.info
    }
    fn supports_format_use(&self, format: PixelType, _usage: ImageUsage) -> bool {
        !self.unsupported_formats.contains(&format)
    }
    fn copy_image_to_buffer(&self, src: &Image, dst: &Buffer) -> Result<()> {
        let src_bytes = src.memory.map()?;
        let mut dst_bytes = dst.memory.map()?;
        if dst_bytes.len() < src_bytes.len() {
            bail!(
                "buffer of {} bytes is too small for an image of {} bytes",
                dst_bytes.len(),
                src_bytes.len()
            );
        }
        dst_bytes[..src_bytes.len()].copy_from_slice(&src_bytes);
        Ok(())
    }
    fn copy_buffer_to_image(&self, src: &Buffer, dst: &Image) -> Result<()> {
        let src_bytes = src.memory.map()?;
        let mut dst_bytes = dst.memory.map()?;
        if src_bytes.len() < dst_bytes.len() {
            bail!(
                "buffer of {} bytes is too small for an image of {} bytes",
                src_bytes.len(),
                dst_bytes.len()
            );
        }
        let len = dst_bytes.len();
        dst_bytes.copy_from_slice(&src_bytes[..len]);
        Ok(())
    }
    fn wait(&self) -> Result<(), DeviceLost> {
        Ok(())
    }
}

/// Host memory, stored as words so that it can be cast to any [`Pod`] with
/// an alignment of at most 4.
struct Memory {
    words: Mutex<Vec<u32>>,
    len: usize,
}

impl Memory {
    fn new(len: usize) -> Self {
        Self {
            words: Mutex::new(vec![0; (len + 3) / 4]),
            len,
        }
    }
    fn map(&self) -> Result<HostMapped<'_>, AlreadyMapped> {
        let guard = self.words.try_lock().ok_or(AlreadyMapped)?;
        Ok(HostMapped {
            guard,
            len: self.len,
        })
    }
}

pub(crate) struct HostMapped<'a> {
    guard: MutexGuard<'a, Vec<u32>>,
    len: usize,
}

impl Deref for HostMapped<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &bytemuck::cast_slice(self.guard.as_slice())[..self.len]
    }
}

impl DerefMut for HostMapped<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut bytemuck::cast_slice_mut(self.guard.as_mut_slice())[..len]
    }
}

pub(crate) struct Buffer {
    memory: Memory,
}

impl DeviceEngineBuffer for Buffer {
    type Engine = Engine;
    fn new(_engine: &Arc<Engine>, len: usize, _usage: BufferUsage) -> Result<Self> {
        Ok(Self {
            memory: Memory::new(len),
        })
    }
    fn len(&self) -> usize {
        self.memory.len
    }
    fn map(&self) -> Result<MappedBytes<'_>> {
        Ok(MappedBytes::Host(self.memory.map()?))
    }
}

pub(crate) struct Image {
    extent: Extent3d,
    format: PixelType,
    memory: Memory,
}

impl DeviceEngineImage for Image {
    type Engine = Engine;
    fn new(
        _engine: &Arc<Engine>,
        extent: Extent3d,
        format: PixelType,
        _usage: ImageUsage,
    ) -> Result<Self> {
        Ok(Self {
            extent,
            format,
            memory: Memory::new(extent.len() * format.size()),
        })
    }
}

pub(crate) struct Kernel {
    f: HostKernelFn,
    workgroup_size: WorkgroupDimensions,
}

impl DeviceEngineKernel for Kernel {
    type Engine = Engine;
    fn new(engine: &Arc<Engine>, desc: &KernelDesc) -> Result<Self> {
        let name = desc.spec.name();
        let f = engine
            .kernels
            .get(name)
            .ok_or_else(|| anyhow!("no host implementation of entry point {name:?}"))?
            .clone();
        Ok(Self {
            f,
            workgroup_size: desc.workgroup_size,
        })
    }
    fn dispatch(&self, groups: [u32; 3], args: &[EngineArg<Engine>]) -> Result<()> {
        let invocation = HostInvocation {
            workgroup_size: self.workgroup_size,
            num_workgroups: groups,
            args,
        };
        (self.f)(&invocation)
    }
}

/** A dispatch of a host kernel.

The host implementation is called once per dispatch, and is responsible for
covering every invocation of every workgroup. Arguments are accessed by
their ordinal in the descriptor map.
*/
pub struct HostInvocation<'a> {
    workgroup_size: WorkgroupDimensions,
    num_workgroups: [u32; 3],
    args: &'a [EngineArg<'a, Engine>],
}

impl<'a> HostInvocation<'a> {
    /// The workgroup size the kernel was created with.
    pub fn workgroup_size(&self) -> WorkgroupDimensions {
        self.workgroup_size
    }
    /// The number of workgroups per dimension.
    pub fn num_workgroups(&self) -> [u32; 3] {
        self.num_workgroups
    }
    /// The number of invocations per dimension.
    pub fn global_size(&self) -> [u32; 3] {
        let [x, y, z] = self.workgroup_size.to_array();
        let [gx, gy, gz] = self.num_workgroups;
        [x * gx, y * gy, z * gz]
    }
    fn arg(&self, index: usize) -> Result<&EngineArg<'a, Engine>> {
        self.args
            .get(index)
            .ok_or_else(|| anyhow!("kernel argument {index} is out of range"))
    }
    /// Maps buffer argument `index`.
    pub fn buffer<T: Pod>(&self, index: usize) -> Result<Mapped<'_, T>> {
        match self.arg(index)? {
            EngineArg::Buffer(buffer) => Mapped::new(buffer.map()?),
            _ => bail!("kernel argument {index} is not a buffer"),
        }
    }
    /// Maps image argument `index`.
    pub fn image(&self, index: usize) -> Result<MappedImage<'_>> {
        match self.arg(index)? {
            EngineArg::Image(image) => Ok(MappedImage {
                extent: image.extent,
                format: image.format,
                bytes: image.memory.map()?,
            }),
            _ => bail!("kernel argument {index} is not an image"),
        }
    }
    /// Reads plain data argument `index`.
    pub fn pod<T: Pod>(&self, index: usize) -> Result<T> {
        match self.arg(index)? {
            EngineArg::Pod(bytes) => bytemuck::try_pod_read_unaligned(bytes).map_err(|e| {
                anyhow!(
                    "kernel argument {index} of {} bytes is not a {}: {e}",
                    bytes.len(),
                    std::any::type_name::<T>()
                )
            }),
            _ => bail!("kernel argument {index} is not plain data"),
        }
    }
}

/// A mapped image argument of a [`HostInvocation`].
pub struct MappedImage<'a> {
    extent: Extent3d,
    format: PixelType,
    bytes: HostMapped<'a>,
}

impl MappedImage<'_> {
    /// The extent.
    pub fn extent(&self) -> Extent3d {
        self.extent
    }
    /// The pixel format.
    pub fn format(&self) -> PixelType {
        self.format
    }
    fn offset(&self, x: u32, y: u32) -> usize {
        assert!(
            x < self.extent.width && y < self.extent.height,
            "pixel ({x}, {y}) is outside of the image"
        );
        (y as usize * self.extent.width as usize + x as usize) * self.format.size()
    }
    /// Reads the pixel at `(x, y)`.
    ///
    /// **panics**
    /// Panics if `(x, y)` is outside of the image.
    pub fn pixel(&self, x: u32, y: u32) -> Pixel {
        let offset = self.offset(x, y);
        self.format.decode(&self.bytes[offset..])
    }
    /// Writes the pixel at `(x, y)`, converting it to the image format.
    ///
    /// **panics**
    /// Panics if `(x, y)` is outside of the image.
    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: Pixel) {
        let offset = self.offset(x, y);
        let format = self.format;
        format.encode(pixel, &mut self.bytes[offset..]);
    }
}
