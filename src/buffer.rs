/*!
Buffers and images.

Buffers are host visible. [`Buffer::map()`] returns a [`Mapped`] guard that
derefs to a typed slice; the mapping is released when the guard is dropped,
including when the caller returns early with an error. Images are only
accessed by kernels and by [`Device::copy_image_to_buffer`] /
[`Device::copy_buffer_to_image`].

```
# use spvcheck::{anyhow::Result, buffer::Buffer, device::Device};
# fn main() -> Result<()> {
let device = Device::host();
let buffer = Buffer::storage(&device, 16)?;
{
    let mut mapped = buffer.map::<u32>()?;
    mapped.copy_from_slice(&[1, 2, 3, 4]);
}
assert_eq!(buffer.map::<u32>()?[3], 4);
# Ok(())
# }
```
*/

use crate::{
    device::{BufferUsage, Device, ImageUsage, RawBuffer, RawImage},
    pixel::PixelType,
};
use anyhow::Result;
use bytemuck::Pod;
use std::{
    fmt::{self, Debug},
    marker::PhantomData,
    ops::{Deref, DerefMut},
};

/// Errors.
pub mod error {
    /// The mapped bytes can not be viewed as the requested type.
    #[derive(Clone, Debug, thiserror::Error)]
    #[error("cannot map {len} bytes as {ty}: {reason}")]
    pub struct MapError {
        pub(crate) len: usize,
        pub(crate) ty: &'static str,
        pub(crate) reason: String,
    }

    /// The buffer is already mapped.
    #[derive(Clone, Copy, Debug, thiserror::Error)]
    #[error("buffer is already mapped")]
    pub struct AlreadyMapped;
}
use error::*;

/// The size of an image, in pixels.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    /// Creates an extent.
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }
    /// The number of pixels.
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize * self.depth as usize
    }
    /// Has no pixels.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A device buffer.
pub struct Buffer {
    raw: RawBuffer,
    device: Device,
}

impl Buffer {
    fn new(device: &Device, len: usize, usage: BufferUsage) -> Result<Self> {
        Ok(Self {
            raw: RawBuffer::new(device, len, usage)?,
            device: device.clone(),
        })
    }
    /// A buffer of `len` bytes for kernel arguments.
    pub fn storage(device: &Device, len: usize) -> Result<Self> {
        Self::new(device, len, BufferUsage::Storage)
    }
    /// A buffer of `len` bytes for transfers to and from images.
    pub fn staging(device: &Device, len: usize) -> Result<Self> {
        Self::new(device, len, BufferUsage::Staging)
    }
    /// A staging buffer large enough to hold all of `image`, tightly packed.
    pub fn staging_for_image(device: &Device, image: &Image) -> Result<Self> {
        Self::staging(device, image.len_bytes())
    }
    pub(crate) fn raw(&self) -> &RawBuffer {
        &self.raw
    }
    /// The device.
    pub fn device(&self) -> &Device {
        &self.device
    }
    /// The length in bytes.
    pub fn len(&self) -> usize {
        self.raw.len()
    }
    /// Has no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /** Maps the buffer as a slice of `T`.

    **errors**
    - The buffer is already mapped.
    - The length is not a multiple of `size_of::<T>()`.
    - The device failed to map the memory. */
    pub fn map<T: Pod>(&self) -> Result<Mapped<'_, T>> {
        Mapped::new(self.raw.map()?)
    }
}

impl Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("device", &self.device)
            .field("len", &self.len())
            .finish()
    }
}

/// A 2D or 3D device image.
pub struct Image {
    raw: RawImage,
    device: Device,
    extent: Extent3d,
    format: PixelType,
    usage: ImageUsage,
}

impl Image {
    /** Creates an image.

    **errors**
    - [`FormatNotSupported`](crate::device::error::FormatNotSupported) if the
      device can not use `format` for `usage`.
    - The device failed to allocate the image. */
    pub fn new(
        device: &Device,
        extent: Extent3d,
        format: PixelType,
        usage: ImageUsage,
    ) -> Result<Self> {
        Ok(Self {
            raw: RawImage::new(device, extent, format, usage)?,
            device: device.clone(),
            extent,
            format,
            usage,
        })
    }
    pub(crate) fn raw(&self) -> &RawImage {
        &self.raw
    }
    /// The device.
    pub fn device(&self) -> &Device {
        &self.device
    }
    /// The extent.
    pub fn extent(&self) -> Extent3d {
        self.extent
    }
    /// The pixel format.
    pub fn format(&self) -> PixelType {
        self.format
    }
    /// The usage the image was created with.
    pub fn usage(&self) -> ImageUsage {
        self.usage
    }
    /// The size of the image tightly packed, in bytes.
    pub fn len_bytes(&self) -> usize {
        self.extent.len() * self.format.size()
    }
}

impl Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Image")
            .field("device", &self.device)
            .field("extent", &self.extent)
            .field("format", &self.format)
            .field("usage", &self.usage)
            .finish()
    }
}

pub(crate) enum MappedBytes<'a> {
    Host(crate::device::host_engine::HostMapped<'a>),
    #[cfg(feature = "device")]
    Device(vulkano::buffer::BufferWriteGuard<'a, [u8]>),
}

impl Deref for MappedBytes<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match self {
            Self::Host(mapped) => mapped,
            #[cfg(feature = "device")]
            Self::Device(mapped) => mapped,
        }
    }
}

impl DerefMut for MappedBytes<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            Self::Host(mapped) => mapped,
            #[cfg(feature = "device")]
            Self::Device(mapped) => mapped,
        }
    }
}

/// A mapped buffer, viewed as a slice of `T`.
///
/// Unmapped when dropped.
pub struct Mapped<'a, T> {
    bytes: MappedBytes<'a>,
    _m: PhantomData<&'a mut [T]>,
}

impl<'a, T: Pod> Mapped<'a, T> {
    pub(crate) fn new(bytes: MappedBytes<'a>) -> Result<Self> {
        if let Err(e) = bytemuck::try_cast_slice::<u8, T>(&bytes) {
            return Err(MapError {
                len: bytes.len(),
                ty: std::any::type_name::<T>(),
                reason: e.to_string(),
            }
            .into());
        }
        Ok(Self {
            bytes,
            _m: PhantomData,
        })
    }
}

impl<T: Pod> Deref for Mapped<'_, T> {
    type Target = [T];
    fn deref(&self) -> &[T] {
        bytemuck::cast_slice(&self.bytes)
    }
}

impl<T: Pod> DerefMut for Mapped<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        bytemuck::cast_slice_mut(&mut self.bytes)
    }
}

impl<T: Pod + Debug> Debug for Mapped<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::{float4, uchar4, PixelFormat};

    #[test]
    fn map_write_read() {
        let device = Device::host();
        let buffer = Buffer::storage(&device, 16).unwrap();
        assert_eq!(buffer.len(), 16);
        buffer.map::<f32>().unwrap().copy_from_slice(&[1., 2., 3., 4.]);
        let mapped = buffer.map::<[f32; 4]>().unwrap();
        assert_eq!(mapped[0], [1., 2., 3., 4.]);
    }

    #[test]
    fn map_is_released_on_error_path() {
        fn fails(buffer: &Buffer) -> Result<()> {
            let _mapped = buffer.map::<u8>()?;
            anyhow::bail!("failed while mapped");
        }
        let buffer = Buffer::storage(&Device::host(), 4).unwrap();
        assert!(fails(&buffer).is_err());
        assert!(buffer.map::<u8>().is_ok());
    }

    #[test]
    fn double_map_fails() {
        let buffer = Buffer::storage(&Device::host(), 4).unwrap();
        let _mapped = buffer.map::<u8>().unwrap();
        let error = buffer.map::<u8>().unwrap_err();
        assert!(error.downcast_ref::<AlreadyMapped>().is_some());
    }

    #[test]
    fn map_with_bad_length_fails() {
        let buffer = Buffer::storage(&Device::host(), 6).unwrap();
        assert!(buffer.map::<u32>().is_err());
        assert!(buffer.map::<u16>().is_ok());
    }

    #[test]
    fn image_staging_round_trip() {
        let device = Device::host();
        let image = Image::new(
            &device,
            Extent3d::new(3, 2, 1),
            uchar4::PIXEL_TYPE,
            ImageUsage::ReadWrite,
        )
        .unwrap();
        assert_eq!(image.len_bytes(), 24);
        let upload = Buffer::staging_for_image(&device, &image).unwrap();
        let download = Buffer::staging_for_image(&device, &image).unwrap();
        for (i, x) in upload.map::<u8>().unwrap().iter_mut().enumerate() {
            *x = i as u8;
        }
        device.copy_buffer_to_image(&upload, &image).unwrap();
        device.copy_image_to_buffer(&image, &download).unwrap();
        assert_eq!(*upload.map::<u8>().unwrap(), *download.map::<u8>().unwrap());
    }

    #[test]
    fn staging_too_small_fails() {
        let device = Device::host();
        let image = Image::new(
            &device,
            Extent3d::new(4, 4, 1),
            float4::PIXEL_TYPE,
            ImageUsage::ReadWrite,
        )
        .unwrap();
        let buffer = Buffer::staging(&device, 16).unwrap();
        assert!(device.copy_image_to_buffer(&image, &buffer).is_err());
    }
}
