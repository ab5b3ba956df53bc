/*!
`copyBufferToImageKernel`: copies a pitched pixel buffer into a float image.

```text
kernel void copyBufferToImageKernel(global uchar* src, write_only image2d_t dst, args_t args);
```

The source pixel layout is given by an OpenCL channel order and type, so one
kernel handles every [`PixelFormat`]. The components can be swizzled from BGRA
and premultiplied by alpha.
*/

use crate::{
    buffer::{Buffer, Extent3d, Image},
    device::{HostInvocation, ImageUsage},
    harness::{
        compare_mapped_region, make_invocation_test, Evaluation, InvocationTest, KernelTest,
        ModuleTest, Options, Region, Test, TestFixture,
    },
    kernel::{ExecutionTime, Kernel, KernelArg, WorkgroupDimensions},
    pixel::{
        float, float2, float4, half, half2, half4, uchar, uchar2, uchar4, Pixel, PixelFormat,
        PixelType,
    },
    pixels::{copy_pixel_buffer, fill_random_pixels, invert_pixel_buffer},
    result::Result,
};
use anyhow::{anyhow, bail};
use bytemuck::{Pod, Zeroable};
use std::marker::PhantomData;

/// The module name.
pub const MODULE: &str = "copyBufferToImageKernel";
/// The entry point.
pub const ENTRY: &str = "copyBufferToImageKernel";

/// The descriptor map of the module.
pub const SPVMAP: &str = "\
kernel,copyBufferToImageKernel,arg,src,argOrdinal,0,descriptorSet,0,binding,0,offset,0,argKind,buffer
kernel,copyBufferToImageKernel,arg,dst,argOrdinal,1,descriptorSet,0,binding,1,offset,0,argKind,wo_image
kernel,copyBufferToImageKernel,arg,args,argOrdinal,2,descriptorSet,0,binding,2,offset,0,argKind,pod
";

/// The `args` argument.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct CopyBufferToImageArgs {
    /// Offset of the first pixel, in pixels.
    pub src_offset: u32,
    /// Pixels between rows.
    pub src_pitch: u32,
    pub src_channel_order: u32,
    pub src_channel_type: u32,
    /// Non zero to read BGRA.
    pub swap_components: u32,
    /// Non zero to multiply color by alpha.
    pub premultiply: u32,
    pub width: u32,
    pub height: u32,
}

impl CopyBufferToImageArgs {
    /// Copies a packed `width` x `height` buffer of `src` pixels.
    pub fn packed(src: PixelType, width: u32, height: u32) -> Self {
        Self {
            src_offset: 0,
            src_pitch: width,
            src_channel_order: src.cl_channel_order(),
            src_channel_type: src.cl_channel_type(),
            swap_components: 0,
            premultiply: 0,
            width,
            height,
        }
    }
}

/** Dispatches `kernel` with enough workgroups to cover `width` x `height`.

**errors**
See [`Kernel::dispatch`]. */
pub fn invoke(
    kernel: &Kernel,
    src: &Buffer,
    dst: &Image,
    args: &CopyBufferToImageArgs,
) -> Result<ExecutionTime> {
    let workgroup_size = kernel.workgroup_size();
    let num_workgroups = [
        (args.width + workgroup_size.x - 1) / workgroup_size.x,
        (args.height + workgroup_size.y - 1) / workgroup_size.y,
        1,
    ];
    kernel.dispatch(
        num_workgroups,
        &[
            KernelArg::Buffer(src),
            KernelArg::Image(dst),
            KernelArg::pod(args),
        ],
    )
}

/// Host implementation of the kernel.
pub fn host_kernel(invocation: &HostInvocation) -> Result<()> {
    let args = invocation.pod::<CopyBufferToImageArgs>(2)?;
    let src_type = PixelType::from_cl(args.src_channel_order, args.src_channel_type)
        .ok_or_else(|| {
            anyhow!(
                "unsupported channel order {:#x} and type {:#x}",
                args.src_channel_order,
                args.src_channel_type
            )
        })?;
    let src = invocation.buffer::<u8>(0)?;
    let mut dst = invocation.image(1)?;
    let extent = dst.extent();
    let [global_x, global_y, _] = invocation.global_size();
    let width = args.width.min(global_x);
    let height = args.height.min(global_y);
    if width > extent.width || height > extent.height {
        bail!(
            "{width}x{height} is larger than the image {}x{}",
            extent.width,
            extent.height
        );
    }
    let size = src_type.size();
    for y in 0..height {
        for x in 0..width {
            let index = args.src_offset as usize + (y * args.src_pitch + x) as usize;
            let bytes = src
                .get(index * size..(index + 1) * size)
                .ok_or_else(|| anyhow!("source pixel {index} is out of bounds"))?;
            let mut values = src_type.decode(bytes).to_float4();
            if src_type.channels() < 4 {
                values[3] = 1.;
            }
            if args.swap_components != 0 {
                values.swap(0, 2);
            }
            if args.premultiply != 0 {
                let alpha = values[3];
                for value in values[..3].iter_mut() {
                    *value *= alpha;
                }
            }
            dst.set_pixel(x, y, Pixel::new(float4::PIXEL_TYPE, values));
        }
    }
    Ok(())
}

/// Copies a random 64 x 64 buffer of `B` into an image of `I`.
///
/// The image is seeded with the inverted source, so every pixel the kernel
/// misses is wrong.
pub struct CopyBufferToImageTest<B, I> {
    extent: Extent3d,
    src: Buffer,
    dst: Image,
    staging: Buffer,
    _m: PhantomData<fn() -> (B, I)>,
}

impl<B: PixelFormat, I: PixelFormat> CopyBufferToImageTest<B, I> {
    fn region(&self) -> Region {
        Region::packed(self.extent.width as usize, self.extent.height as usize)
    }
}

impl<B: PixelFormat, I: PixelFormat> Test for CopyBufferToImageTest<B, I> {
    fn parameters(&self) -> String {
        format!("{}x{}", self.extent.width, self.extent.height)
    }
    fn prepare(&mut self) -> Result<()> {
        {
            let src = self.src.map::<B>()?;
            let mut staging = self.staging.map::<I>()?;
            copy_pixel_buffer(&src, &mut staging);
            invert_pixel_buffer(&mut staging);
        }
        self.dst.device().copy_buffer_to_image(&self.staging, &self.dst)
    }
    fn run(&mut self, kernel: &Kernel) -> Result<ExecutionTime> {
        let args = CopyBufferToImageArgs::packed(B::PIXEL_TYPE, self.extent.width, self.extent.height);
        invoke(kernel, &self.src, &self.dst, &args)
    }
    fn evaluate(&mut self, options: &Options) -> Result<Evaluation> {
        self.dst.device().copy_image_to_buffer(&self.dst, &self.staging)?;
        compare_mapped_region::<B, I>(&self.src, &self.staging, self.region(), ENTRY, options)
    }
}

impl<B: PixelFormat, I: PixelFormat> TestFixture for CopyBufferToImageTest<B, I> {
    fn new(kernel: &Kernel, _args: &[String]) -> Result<Self> {
        let device = kernel.device();
        let extent = Extent3d::new(64, 64, 1);
        let dst = Image::new(device, extent, I::PIXEL_TYPE, ImageUsage::ReadWrite)?;
        let src = Buffer::storage(device, extent.len() * std::mem::size_of::<B>())?;
        let staging = Buffer::staging_for_image(device, &dst)?;
        fill_random_pixels(&mut src.map::<B>()?);
        Ok(Self {
            extent,
            src,
            dst,
            staging,
            _m: PhantomData,
        })
    }
}

/// The invocation test for `B` to `I`, labelled `<src:B dst:I>`.
pub fn variant<B: PixelFormat, I: PixelFormat>() -> InvocationTest {
    make_invocation_test::<CopyBufferToImageTest<B, I>>(format!(
        "<src:{} dst:{}>",
        B::PIXEL_TYPE,
        I::PIXEL_TYPE
    ))
}

macro_rules! variants {
    (@row $b:ty [$($i:ty),+]) => {
        vec![$(variant::<$b, $i>()),+]
    };
    (@expand [$($b:ty),+] $i:tt) => {
        vec![$(variants!(@row $b $i)),+].concat()
    };
    ($($b:ty),+ => $i:tt) => {
        variants!(@expand [$($b),+] $i)
    };
}

/// Every buffer type into `float4`, `half4`, and `uchar4` images.
pub fn all_variants() -> Vec<InvocationTest> {
    variants!(uchar, uchar2, uchar4, half, half2, half4, float, float2, float4 => [float4, half4, uchar4])
}

/// Tests [`ENTRY`] with a 32 x 32 workgroup over [`all_variants`].
pub fn module_test() -> ModuleTest {
    ModuleTest::new(MODULE).kernel_test(
        KernelTest::new(ENTRY, WorkgroupDimensions::new(32, 32)).invocation_tests(all_variants()),
    )
}
