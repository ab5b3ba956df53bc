/*!

A [`Device`] allocates [buffers and images](crate::buffer), compiles
[kernels](crate::kernel) and runs them.

[`Device::host()`] is an in-process emulation of a compute device. It supports
every pixel format unless told otherwise, and "compiles" an entry point by
looking up a host implementation registered with
[`HostDeviceBuilder::kernel`](builder::HostDeviceBuilder::kernel). With the
"device" feature, [`Device::builder()`] creates a Vulkan device.

Every operation that touches device memory is submitted and waited on before
it returns, so results and timings never overlap with other work.

```
# use spvcheck::{anyhow::Result, device::Device};
# fn main() -> Result<()> {
let device = Device::host_builder()
    .kernel("fill", |invocation| {
        invocation.buffer::<u32>(0)?.fill(1);
        Ok(())
    })
    .build();
assert!(device.is_host());
# Ok(())
# }
```
*/

use crate::{
    buffer::{Buffer, Extent3d, Image, MappedBytes},
    kernel::{KernelArg, WorkgroupDimensions},
    module::spvmap::KernelSpec,
    pixel::PixelType,
};
use anyhow::Result;
use std::{
    collections::{HashMap, HashSet},
    fmt::{self, Debug},
    sync::Arc,
};

pub(crate) mod host_engine;
pub use host_engine::{HostInvocation, MappedImage};

#[cfg(feature = "device")]
pub(crate) mod vulkan_engine;

/// Errors.
pub mod error {
    use crate::pixel::PixelType;
    use std::fmt::{self, Debug, Display};

    /** Device is unavailable.

    - The "device" feature is not enabled.
    - Failed to load the Vulkan library.
    */
    #[derive(Clone, Copy, Debug, thiserror::Error)]
    #[error("DeviceUnavailable")]
    pub struct DeviceUnavailable;

    /// The device index is greater than or equal to the number of devices.
    #[derive(Clone, Copy, Debug, thiserror::Error)]
    #[error("Device index {index} is out of range 0..{devices}!")]
    pub struct DeviceIndexOutOfRange {
        pub(crate) index: usize,
        pub(crate) devices: usize,
    }

    /// The device was lost.
    #[derive(Clone, Copy, Debug, thiserror::Error)]
    pub struct DeviceLost {
        pub(crate) index: Option<usize>,
    }

    impl Display for DeviceLost {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            Debug::fmt(self, f)
        }
    }

    /// The device can not use the format for storage images.
    #[derive(Clone, Copy, Debug, thiserror::Error)]
    #[error("Format {format} not supported for storage")]
    pub struct FormatNotSupported {
        pub(crate) format: PixelType,
    }

    /// A buffer or image was passed to a different device than the one that
    /// created it.
    #[derive(Clone, Debug, thiserror::Error)]
    #[error("{what} belongs to a different device")]
    pub struct ForeignResource {
        pub(crate) what: String,
    }
}
use error::*;

/// Builders.
pub mod builder {
    use super::*;

    /// Builder for creating a host [`Device`].
    pub struct HostDeviceBuilder {
        pub(super) options: HostOptions,
    }

    impl HostDeviceBuilder {
        /// Registers the host implementation of entry point `entry`.
        ///
        /// Creating a kernel for an entry point without an implementation
        /// fails, the way a compile failure would.
        pub fn kernel(
            mut self,
            entry: impl Into<String>,
            f: impl Fn(&HostInvocation) -> Result<()> + Send + Sync + 'static,
        ) -> Self {
            self.options.kernels.insert(entry.into(), Arc::new(f));
            self
        }
        /// Removes storage support for `format`.
        pub fn unsupported_format(mut self, format: PixelType) -> Self {
            self.options.unsupported_formats.insert(format);
            self
        }
        /// The largest workgroup size per dimension, defaults to
        /// `[1024, 1024, 64]`.
        pub fn max_workgroup_size(mut self, max_workgroup_size: [u32; 3]) -> Self {
            self.options.max_workgroup_size = max_workgroup_size;
            self
        }
        /// Creates the device.
        pub fn build(self) -> Device {
            Device {
                inner: DeviceInner::Host(host_engine::Engine::new(self.options)),
            }
        }
    }

    /// Builder for creating a Vulkan [`Device`].
    pub struct DeviceBuilder {
        #[cfg(feature = "device")]
        pub(super) options: DeviceOptions,
    }

    impl DeviceBuilder {
        /// Index of the device, defaults to 0.
        pub fn index(self, index: usize) -> Self {
            #[cfg(feature = "device")]
            {
                let mut this = self;
                this.options.index = index;
                this
            }
            #[cfg(not(feature = "device"))]
            {
                let _ = index;
                self
            }
        }
        /// Creates a device.
        ///
        /// **errors**
        ///
        /// - [`DeviceUnavailable`](super::error::DeviceUnavailable)
        /// - [`DeviceIndexOutOfRange`](super::error::DeviceIndexOutOfRange)
        /// - The device could not be created.
        pub fn build(self) -> Result<Device> {
            #[cfg(feature = "device")]
            {
                let engine = vulkan_engine::Engine::new(self.options)?;
                Ok(Device {
                    inner: DeviceInner::Device(engine),
                })
            }
            #[cfg(not(feature = "device"))]
            {
                Err(DeviceUnavailable.into())
            }
        }
    }
}
use builder::*;

pub(crate) type HostKernelFn = Arc<dyn Fn(&HostInvocation) -> Result<()> + Send + Sync>;

pub(crate) struct HostOptions {
    kernels: HashMap<String, HostKernelFn>,
    unsupported_formats: HashSet<PixelType>,
    max_workgroup_size: [u32; 3],
}

#[cfg(feature = "device")]
pub(crate) struct DeviceOptions {
    index: usize,
}

/// How a kernel accesses an image.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum ImageUsage {
    /// Sampled or read by the kernel.
    ReadOnly,
    /// Written by the kernel.
    WriteOnly,
    /// Read and written by the kernel.
    ReadWrite,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub(crate) enum BufferUsage {
    Storage,
    Staging,
}

pub(crate) trait DeviceEngine: Sized + Send + Sync + 'static {
    type Buffer: DeviceEngineBuffer<Engine = Self>;
    type Image: DeviceEngineImage<Engine = Self>;
    type Kernel: DeviceEngineKernel<Engine = Self>;
    fn info(&self) -> &Arc<DeviceInfo>;
    fn supports_format_use(&self, format: PixelType, usage: ImageUsage) -> bool;
    fn copy_image_to_buffer(&self, src: &Self::Image, dst: &Self::Buffer) -> Result<()>;
    fn copy_buffer_to_image(&self, src: &Self::Buffer, dst: &Self::Image) -> Result<()>;
    fn wait(&self) -> Result<(), DeviceLost>;
}

pub(crate) trait DeviceEngineBuffer: Sized {
    type Engine;
    fn new(engine: &Arc<Self::Engine>, len: usize, usage: BufferUsage) -> Result<Self>;
    fn len(&self) -> usize;
    fn map(&self) -> Result<MappedBytes<'_>>;
}

pub(crate) trait DeviceEngineImage: Sized {
    type Engine;
    fn new(
        engine: &Arc<Self::Engine>,
        extent: Extent3d,
        format: PixelType,
        usage: ImageUsage,
    ) -> Result<Self>;
}

pub(crate) trait DeviceEngineKernel: Sized {
    type Engine: DeviceEngine;
    fn new(engine: &Arc<Self::Engine>, desc: &KernelDesc) -> Result<Self>;
    fn dispatch(&self, groups: [u32; 3], args: &[EngineArg<Self::Engine>]) -> Result<()>;
}

/// Everything an engine needs to build a pipeline for one entry point.
pub(crate) struct KernelDesc<'a> {
    pub(crate) spirv: &'a [u32],
    pub(crate) spec: &'a KernelSpec,
    pub(crate) workgroup_size: WorkgroupDimensions,
}

pub(crate) enum EngineArg<'a, E: DeviceEngine> {
    Buffer(&'a E::Buffer),
    Image(&'a E::Image),
    Pod(&'a [u8]),
}

/** A device.

Devices can be cloned, which is equivalent to [`Arc::clone()`]. Two handles
compare equal if they refer to the same device.
*/
#[derive(Clone, Eq, PartialEq)]
pub struct Device {
    inner: DeviceInner,
}

impl Device {
    /// The host, without any kernel implementations.
    pub fn host() -> Self {
        Self::host_builder().build()
    }
    /// A builder for creating a host device.
    pub fn host_builder() -> HostDeviceBuilder {
        HostDeviceBuilder {
            options: HostOptions {
                kernels: HashMap::new(),
                unsupported_formats: HashSet::new(),
                max_workgroup_size: [1024, 1024, 64],
            },
        }
    }
    /// A builder for creating a Vulkan device.
    pub fn builder() -> DeviceBuilder {
        DeviceBuilder {
            #[cfg(feature = "device")]
            options: DeviceOptions { index: 0 },
        }
    }
    /// Is the host.
    pub fn is_host(&self) -> bool {
        matches!(self.inner, DeviceInner::Host(_))
    }
    /// Is a device.
    pub fn is_device(&self) -> bool {
        !self.is_host()
    }
    pub(crate) fn inner(&self) -> &DeviceInner {
        &self.inner
    }
    /// Device info.
    pub fn info(&self) -> &Arc<DeviceInfo> {
        match self.inner() {
            DeviceInner::Host(engine) => engine.info(),
            #[cfg(feature = "device")]
            DeviceInner::Device(engine) => engine.info(),
        }
    }
    /// Whether images of `format` can be created with `usage`.
    pub fn supports_format_use(&self, format: PixelType, usage: ImageUsage) -> bool {
        match self.inner() {
            DeviceInner::Host(engine) => engine.supports_format_use(format, usage),
            #[cfg(feature = "device")]
            DeviceInner::Device(engine) => engine.supports_format_use(format, usage),
        }
    }
    /** Copies the whole of `src` into `dst`, tightly packed, and waits.

    **errors**
    - `dst` is smaller than the image.
    - Either resource belongs to another device.
    - The device was lost. */
    pub fn copy_image_to_buffer(&self, src: &Image, dst: &Buffer) -> Result<()> {
        self.check_owned("image", src.device())?;
        self.check_owned("buffer", dst.device())?;
        match (self.inner(), src.raw(), dst.raw()) {
            (DeviceInner::Host(engine), RawImage::Host(src), RawBuffer::Host(dst)) => {
                engine.copy_image_to_buffer(src, dst)
            }
            #[cfg(feature = "device")]
            (DeviceInner::Device(engine), RawImage::Device(src), RawBuffer::Device(dst)) => {
                engine.copy_image_to_buffer(src, dst)
            }
            #[allow(unreachable_patterns)]
            _ => Err(ForeignResource {
                what: "image or buffer".into(),
            }
            .into()),
        }
    }
    /// Copies `src` into the whole of `dst` and waits.
    ///
    /// See [`.copy_image_to_buffer()`](Device::copy_image_to_buffer).
    pub fn copy_buffer_to_image(&self, src: &Buffer, dst: &Image) -> Result<()> {
        self.check_owned("buffer", src.device())?;
        self.check_owned("image", dst.device())?;
        match (self.inner(), src.raw(), dst.raw()) {
            (DeviceInner::Host(engine), RawBuffer::Host(src), RawImage::Host(dst)) => {
                engine.copy_buffer_to_image(src, dst)
            }
            #[cfg(feature = "device")]
            (DeviceInner::Device(engine), RawBuffer::Device(src), RawImage::Device(dst)) => {
                engine.copy_buffer_to_image(src, dst)
            }
            #[allow(unreachable_patterns)]
            _ => Err(ForeignResource {
                what: "image or buffer".into(),
            }
            .into()),
        }
    }
    pub(crate) fn check_owned(&self, what: &str, device: &Device) -> Result<(), ForeignResource> {
        if self == device {
            Ok(())
        } else {
            Err(ForeignResource { what: what.into() })
        }
    }
    /** Waits for all submitted work to finish.

    **errors**
    Returns an error if the device was lost while waiting. */
    pub fn wait(&self) -> Result<(), DeviceLost> {
        match self.inner() {
            DeviceInner::Host(engine) => engine.wait(),
            #[cfg(feature = "device")]
            DeviceInner::Device(engine) => engine.wait(),
        }
    }
}

/// See [`Device::host()`].
impl Default for Device {
    fn default() -> Self {
        Self::host()
    }
}

impl Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

#[derive(Clone)]
pub(crate) enum DeviceInner {
    Host(Arc<host_engine::Engine>),
    #[cfg(feature = "device")]
    Device(Arc<vulkan_engine::Engine>),
}

impl PartialEq for DeviceInner {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Host(a), Self::Host(b)) => Arc::ptr_eq(a, b),
            #[cfg(feature = "device")]
            (Self::Device(a), Self::Device(b)) => Arc::ptr_eq(a, b),
            #[allow(unreachable_patterns)]
            _ => false,
        }
    }
}

impl Eq for DeviceInner {}

impl Debug for DeviceInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(_) => f.debug_struct("Host").finish(),
            #[cfg(feature = "device")]
            Self::Device(engine) => f
                .debug_tuple("Device")
                .field(&engine.info().index.unwrap_or_default())
                .finish(),
        }
    }
}

/// Device info.
#[derive(Debug)]
pub struct DeviceInfo {
    pub(crate) index: Option<usize>,
    pub(crate) name: String,
    pub(crate) max_workgroup_size: [u32; 3],
    pub(crate) max_workgroup_invocations: u32,
}

impl DeviceInfo {
    /// The index passed to [`DeviceBuilder::index`], `None` for the host.
    pub fn index(&self) -> Option<usize> {
        self.index
    }
    /// The device name.
    pub fn name(&self) -> &str {
        &self.name
    }
    /// The largest workgroup size per dimension.
    pub fn max_workgroup_size(&self) -> [u32; 3] {
        self.max_workgroup_size
    }
    /// The largest number of invocations in one workgroup.
    pub fn max_workgroup_invocations(&self) -> u32 {
        self.max_workgroup_invocations
    }
}

pub(crate) enum RawBuffer {
    Host(host_engine::Buffer),
    #[cfg(feature = "device")]
    Device(vulkan_engine::Buffer),
}

impl RawBuffer {
    pub(crate) fn new(device: &Device, len: usize, usage: BufferUsage) -> Result<Self> {
        match device.inner() {
            DeviceInner::Host(engine) => Ok(Self::Host(DeviceEngineBuffer::new(engine, len, usage)?)),
            #[cfg(feature = "device")]
            DeviceInner::Device(engine) => {
                Ok(Self::Device(DeviceEngineBuffer::new(engine, len, usage)?))
            }
        }
    }
    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Host(buffer) => buffer.len(),
            #[cfg(feature = "device")]
            Self::Device(buffer) => buffer.len(),
        }
    }
    pub(crate) fn map(&self) -> Result<MappedBytes<'_>> {
        match self {
            Self::Host(buffer) => buffer.map(),
            #[cfg(feature = "device")]
            Self::Device(buffer) => buffer.map(),
        }
    }
}

pub(crate) enum RawImage {
    Host(host_engine::Image),
    #[cfg(feature = "device")]
    Device(vulkan_engine::Image),
}

impl RawImage {
    pub(crate) fn new(
        device: &Device,
        extent: Extent3d,
        format: PixelType,
        usage: ImageUsage,
    ) -> Result<Self> {
        if !device.supports_format_use(format, usage) {
            return Err(FormatNotSupported { format }.into());
        }
        match device.inner() {
            DeviceInner::Host(engine) => Ok(Self::Host(DeviceEngineImage::new(
                engine, extent, format, usage,
            )?)),
            #[cfg(feature = "device")]
            DeviceInner::Device(engine) => Ok(Self::Device(DeviceEngineImage::new(
                engine, extent, format, usage,
            )?)),
        }
    }
}

pub(crate) enum RawKernel {
    Host(host_engine::Kernel),
    #[cfg(feature = "device")]
    Device(vulkan_engine::Kernel),
}

impl RawKernel {
    pub(crate) fn new(device: &Device, desc: &KernelDesc) -> Result<Self> {
        match device.inner() {
            DeviceInner::Host(engine) => Ok(Self::Host(DeviceEngineKernel::new(engine, desc)?)),
            #[cfg(feature = "device")]
            DeviceInner::Device(engine) => {
                Ok(Self::Device(DeviceEngineKernel::new(engine, desc)?))
            }
        }
    }
    pub(crate) fn dispatch(&self, groups: [u32; 3], args: &[KernelArg]) -> Result<()> {
        match self {
            Self::Host(kernel) => {
                let args = args
                    .iter()
                    .enumerate()
                    .map(|(i, arg)| match arg {
                        KernelArg::Buffer(buffer) => match buffer.raw() {
                            RawBuffer::Host(buffer) => Ok(EngineArg::Buffer(buffer)),
                            #[allow(unreachable_patterns)]
                            _ => Err(foreign_arg(i)),
                        },
                        KernelArg::Image(image) => match image.raw() {
                            RawImage::Host(image) => Ok(EngineArg::Image(image)),
                            #[allow(unreachable_patterns)]
                            _ => Err(foreign_arg(i)),
                        },
                        KernelArg::Pod(bytes) => Ok(EngineArg::Pod(bytes.as_slice())),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                kernel.dispatch(groups, &args)
            }
            #[cfg(feature = "device")]
            Self::Device(kernel) => {
                let args = args
                    .iter()
                    .enumerate()
                    .map(|(i, arg)| match arg {
                        KernelArg::Buffer(buffer) => match buffer.raw() {
                            RawBuffer::Device(buffer) => Ok(EngineArg::Buffer(buffer)),
                            _ => Err(foreign_arg(i)),
                        },
                        KernelArg::Image(image) => match image.raw() {
                            RawImage::Device(image) => Ok(EngineArg::Image(image)),
                            _ => Err(foreign_arg(i)),
                        },
                        KernelArg::Pod(bytes) => Ok(EngineArg::Pod(bytes.as_slice())),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                kernel.dispatch(groups, &args)
            }
        }
    }
}

fn foreign_arg(index: usize) -> ForeignResource {
    ForeignResource {
        what: format!("kernel argument {index}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::{float4, uchar4, PixelFormat};

    #[test]
    fn host_devices_are_unique() {
        let a = Device::host();
        let b = Device::host();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert!(a.is_host());
        assert_eq!(a.info().name(), "host");
        assert_eq!(a.info().index(), None);
    }

    #[test]
    fn unsupported_format() {
        let device = Device::host_builder()
            .unsupported_format(float4::PIXEL_TYPE)
            .build();
        assert!(!device.supports_format_use(float4::PIXEL_TYPE, ImageUsage::ReadWrite));
        assert!(device.supports_format_use(uchar4::PIXEL_TYPE, ImageUsage::ReadWrite));
        let error = Image::new(
            &device,
            Extent3d::new(4, 4, 1),
            float4::PIXEL_TYPE,
            ImageUsage::ReadWrite,
        )
        .unwrap_err();
        assert!(error.to_string().contains("float4"), "{error}");
    }

    #[test]
    fn copy_between_devices_fails() {
        let a = Device::host();
        let b = Device::host();
        let image = Image::new(
            &a,
            Extent3d::new(2, 2, 1),
            uchar4::PIXEL_TYPE,
            ImageUsage::ReadWrite,
        )
        .unwrap();
        let buffer = Buffer::staging_for_image(&a, &image).unwrap();
        a.copy_image_to_buffer(&image, &buffer).unwrap();
        assert!(b.copy_image_to_buffer(&image, &buffer).is_err());
    }

    #[cfg(not(feature = "device"))]
    #[test]
    fn device_unavailable() {
        let error = Device::builder().build().unwrap_err();
        assert!(error.downcast_ref::<DeviceUnavailable>().is_some());
    }
}
