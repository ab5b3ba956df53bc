/*!
Pixel layouts and values.

A [`PixelType`] is a component type and a channel count. Pixels of any type
are held as a [`Pixel`], whose components live in the normalized float
domain, so that comparing a `uchar4` buffer against a `float4` image reduces
to converting both into a common [`PixelType`] and comparing componentwise.
*/

use crate::{
    fp::{self, ULP_TOLERANCE},
    scalar::{Component, ComponentType},
};
use bytemuck::Pod;
use ::half::f16;
use paste::paste;
use std::fmt::{self, Debug, Display};

/// OpenCL `cl_channel_order` values.
pub mod channel_order {
    pub const CL_R: u32 = 0x10B0;
    pub const CL_RG: u32 = 0x10B2;
    pub const CL_RGBA: u32 = 0x10B5;
}

/// OpenCL `cl_channel_type` values.
pub mod channel_type {
    pub const CL_UNORM_INT8: u32 = 0x10D2;
    pub const CL_HALF_FLOAT: u32 = 0x10DD;
    pub const CL_FLOAT: u32 = 0x10DE;
}

/// The layout of a pixel: a component type and 1, 2, or 4 channels.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub struct PixelType {
    component: ComponentType,
    channels: usize,
}

impl PixelType {
    /// Creates a pixel type.
    ///
    /// Returns `None` if `channels` is not 1, 2, or 4.
    pub const fn new(component: ComponentType, channels: usize) -> Option<Self> {
        match channels {
            1 | 2 | 4 => Some(Self {
                component,
                channels,
            }),
            _ => None,
        }
    }
    /// The component type.
    pub const fn component(&self) -> ComponentType {
        self.component
    }
    /// The number of channels.
    pub const fn channels(&self) -> usize {
        self.channels
    }
    /// Size of one pixel in bytes.
    pub fn size(&self) -> usize {
        self.component.size() * self.channels
    }
    /// OpenCL C name, ie "uchar4", "half2", "float".
    pub fn name(&self) -> String {
        if self.channels == 1 {
            self.component.name().to_string()
        } else {
            format!("{}{}", self.component.name(), self.channels)
        }
    }
    /// The `cl_channel_order` of an image with this pixel type.
    pub fn cl_channel_order(&self) -> u32 {
        use channel_order::*;
        match self.channels {
            1 => CL_R,
            2 => CL_RG,
            _ => CL_RGBA,
        }
    }
    /// The `cl_channel_type` of an image with this pixel type.
    pub fn cl_channel_type(&self) -> u32 {
        use channel_type::*;
        match self.component {
            ComponentType::U8 => CL_UNORM_INT8,
            ComponentType::F16 => CL_HALF_FLOAT,
            ComponentType::F32 => CL_FLOAT,
        }
    }
    /// The pixel type with `cl_channel_order` `order` and `cl_channel_type`
    /// `ty`, if supported.
    pub fn from_cl(order: u32, ty: u32) -> Option<Self> {
        let channels = match order {
            channel_order::CL_R => 1,
            channel_order::CL_RG => 2,
            channel_order::CL_RGBA => 4,
            _ => return None,
        };
        let component = match ty {
            channel_type::CL_UNORM_INT8 => ComponentType::U8,
            channel_type::CL_HALF_FLOAT => ComponentType::F16,
            channel_type::CL_FLOAT => ComponentType::F32,
            _ => return None,
        };
        Self::new(component, channels)
    }
    /// The type both sides of a comparison are converted to.
    ///
    /// The channel count is the smaller of the two. The component type is the
    /// narrower one if it is floating point, and otherwise the wider one, so
    /// that quantizing to a narrow integer type never hides a difference that
    /// a float would show.
    pub fn promote(expected: PixelType, observed: PixelType) -> PixelType {
        let channels = expected.channels.min(observed.channels);
        let expected_is_smaller = expected.component.size() < observed.component.size();
        let (smaller, larger) = if expected_is_smaller {
            (expected.component, observed.component)
        } else {
            (observed.component, expected.component)
        };
        let component = if smaller.is_float() { smaller } else { larger };
        PixelType {
            component,
            channels,
        }
    }
    /// Reads one pixel from the start of `bytes`.
    ///
    /// **panics**
    /// Panics if `bytes` is shorter than [`.size()`](PixelType::size).
    pub fn decode(&self, bytes: &[u8]) -> Pixel {
        let width = self.component.size();
        let mut values = [0f32; 4];
        for (i, value) in values.iter_mut().take(self.channels).enumerate() {
            *value = self.component.read(&bytes[i * width..]);
        }
        Pixel {
            pixel_type: *self,
            values,
        }
    }
    /// Writes `pixel` to the start of `bytes`, converting it to this type.
    ///
    /// **panics**
    /// Panics if `bytes` is shorter than [`.size()`](PixelType::size).
    pub fn encode(&self, pixel: Pixel, bytes: &mut [u8]) {
        let pixel = pixel.translate(*self);
        let width = self.component.size();
        for (i, value) in pixel.values.iter().take(self.channels).enumerate() {
            self.component.write(*value, &mut bytes[i * width..]);
        }
    }
}

impl Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// A pixel value.
///
/// Components are stored in the normalized float domain and are exactly
/// representable in `pixel_type`. Channels past
/// [`.channels()`](PixelType::channels) are zero.
#[derive(Clone, Copy, PartialEq)]
pub struct Pixel {
    pixel_type: PixelType,
    values: [f32; 4],
}

impl Pixel {
    /// Creates a pixel, quantizing `values` to `pixel_type`.
    pub fn new(pixel_type: PixelType, values: [f32; 4]) -> Self {
        let mut output = [0f32; 4];
        for (y, x) in output.iter_mut().zip(values).take(pixel_type.channels) {
            *y = pixel_type.component.quantize(x);
        }
        Self {
            pixel_type,
            values: output,
        }
    }
    /// The [`PixelType`].
    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }
    /// The components actually present.
    pub fn values(&self) -> &[f32] {
        &self.values[..self.pixel_type.channels]
    }
    /// Converts to `pixel_type`.
    ///
    /// Extra channels are dropped, missing channels are zero.
    pub fn translate(&self, pixel_type: PixelType) -> Self {
        Self::new(pixel_type, self.values)
    }
    /// All four components, missing channels zero.
    pub fn to_float4(&self) -> [f32; 4] {
        self.values
    }
}

impl Debug for Pixel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{:?}", self.pixel_type, self.values())
    }
}

/// Whether two pixels of the same type are equal within tolerance.
///
/// Float components must be within [`ULP_TOLERANCE`] of each other in their
/// own precision; unorm components are compared as floats. Returns false if
/// the types differ, see [`PixelType::promote`].
pub fn pixel_compare(l: &Pixel, r: &Pixel) -> bool {
    if l.pixel_type != r.pixel_type {
        return false;
    }
    let component = l.pixel_type.component;
    l.values()
        .iter()
        .zip(r.values())
        .all(|(&a, &b)| match component {
            ComponentType::F16 => {
                fp::almost_equal_f16(f16::from_f32(a), f16::from_f32(b), ULP_TOLERANCE)
            }
            ComponentType::U8 | ComponentType::F32 => fp::almost_equal(a, b, ULP_TOLERANCE),
        })
}

/// An expected / observed pair of pixel types with their comparison type
/// resolved up front.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Comparison {
    expected: PixelType,
    observed: PixelType,
    promoted: PixelType,
}

impl Comparison {
    /// Resolves the comparison type with [`PixelType::promote`].
    pub fn new(expected: PixelType, observed: PixelType) -> Self {
        Self {
            expected,
            observed,
            promoted: PixelType::promote(expected, observed),
        }
    }
    /// The expected pixel type.
    pub fn expected(&self) -> PixelType {
        self.expected
    }
    /// The observed pixel type.
    pub fn observed(&self) -> PixelType {
        self.observed
    }
    /// The type both sides are converted to.
    pub fn promoted(&self) -> PixelType {
        self.promoted
    }
    /// Whether `expected` and `observed` are equal in the promoted type.
    pub fn is_equal(&self, expected: &Pixel, observed: &Pixel) -> bool {
        pixel_compare(
            &expected.translate(self.promoted),
            &observed.translate(self.promoted),
        )
    }
}

mod sealed {
    #[doc(hidden)]
    pub trait Sealed {}
}
use sealed::Sealed;

/// Host types with the memory layout of a pixel.
///
/// Implemented for components `T` and `[T; 2]`, `[T; 4]` for every
/// [`Component`].
pub trait PixelFormat: Default + Copy + Pod + Debug + PartialEq + Sealed + 'static {
    /// The [`PixelType`].
    const PIXEL_TYPE: PixelType;
    /// Converts to a [`Pixel`].
    fn to_pixel(&self) -> Pixel;
    /// Converts from a [`Pixel`], rounding components to nearest.
    fn from_pixel(pixel: Pixel) -> Self;
}

const fn pixel_type(component: ComponentType, channels: usize) -> PixelType {
    PixelType {
        component,
        channels,
    }
}

macro_rules! impl_pixel_format {
    (@vec $t:ty, $n:literal) => {
        impl Sealed for [$t; $n] {}

        impl PixelFormat for [$t; $n] {
            const PIXEL_TYPE: PixelType = pixel_type(<$t as Component>::COMPONENT_TYPE, $n);
            fn to_pixel(&self) -> Pixel {
                let mut values = [0f32; 4];
                for (y, x) in values.iter_mut().zip(self) {
                    *y = x.to_f32();
                }
                Pixel::new(Self::PIXEL_TYPE, values)
            }
            fn from_pixel(pixel: Pixel) -> Self {
                let pixel = pixel.translate(Self::PIXEL_TYPE);
                let mut output = [<$t>::default(); $n];
                for (y, x) in output.iter_mut().zip(pixel.values) {
                    *y = <$t>::from_f32(x);
                }
                output
            }
        }
    };
    ($($t:ty),+) => {
        $(
            impl Sealed for $t {}

            impl PixelFormat for $t {
                const PIXEL_TYPE: PixelType = pixel_type(<$t as Component>::COMPONENT_TYPE, 1);
                fn to_pixel(&self) -> Pixel {
                    Pixel::new(Self::PIXEL_TYPE, [self.to_f32(), 0., 0., 0.])
                }
                fn from_pixel(pixel: Pixel) -> Self {
                    <$t>::from_f32(pixel.translate(Self::PIXEL_TYPE).values[0])
                }
            }

            impl_pixel_format!(@vec $t, 2);
            impl_pixel_format!(@vec $t, 4);
        )+
    };
}

impl_pixel_format!(u8, f16, f32);

macro_rules! pixel_aliases {
    ($($name:ident => $t:ty),+) => {
        paste! {
            $(
                #[doc = "`" $name "`"]
                #[allow(non_camel_case_types)]
                pub type $name = $t;
            )+
        }
    };
}

pixel_aliases!(
    uchar => u8,
    uchar2 => [u8; 2],
    uchar4 => [u8; 4],
    half => f16,
    half2 => [f16; 2],
    half4 => [f16; 4],
    float => f32,
    float2 => [f32; 2],
    float4 => [f32; 4]
);
