use bytemuck::Pod;
use derive_more::Display;
use half::f16;
#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt::Debug, str::FromStr};

mod sealed {
    use half::f16;

    #[doc(hidden)]
    pub trait Sealed {}

    impl Sealed for u8 {}
    impl Sealed for f16 {}
    impl Sealed for f32 {}
}
use sealed::Sealed;

/// Component types of pixels read and written by kernels.
///
/// Integer components are unsigned normalized (unorm), the way images with
/// `CL_UNORM_INT8` channels are sampled.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug, Display)]
pub enum ComponentType {
    #[display(fmt = "uchar")]
    U8,
    #[display(fmt = "half")]
    F16,
    #[display(fmt = "float")]
    F32,
}

impl ComponentType {
    pub(crate) fn iter() -> impl Iterator<Item = Self> {
        use ComponentType::*;
        [U8, F16, F32].into_iter()
    }
    /// Size of the type in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        use ComponentType::*;
        match self {
            U8 => 1,
            F16 => 2,
            F32 => 4,
        }
    }
    /// Name of the type, as spelled in OpenCL C.
    ///
    /// Lowercase, ie "uchar", "half", "float".
    #[inline]
    pub fn name(&self) -> &'static str {
        use ComponentType::*;
        match self {
            U8 => "uchar",
            F16 => "half",
            F32 => "float",
        }
    }
    /// Name of the variant, ie "U8", "F16".
    #[inline]
    pub fn as_str(&self) -> &'static str {
        use ComponentType::*;
        match self {
            U8 => "U8",
            F16 => "F16",
            F32 => "F32",
        }
    }
    /// Is a floating point type.
    #[inline]
    pub fn is_float(&self) -> bool {
        !matches!(self, Self::U8)
    }
    /// Rounds `x` to the nearest value representable by this type.
    ///
    /// The result is expressed in the normalized float domain, so U8 values
    /// are multiples of 1/255 in 0..=1.
    #[inline]
    pub fn quantize(&self, x: f32) -> f32 {
        use ComponentType::*;
        match self {
            U8 => unorm8_to_f32(f32_to_unorm8(x)),
            F16 => f16::from_f32(x).to_f32(),
            F32 => x,
        }
    }
    pub(crate) fn read(&self, bytes: &[u8]) -> f32 {
        use ComponentType::*;
        match self {
            U8 => bytes[0].to_f32(),
            F16 => bytemuck::pod_read_unaligned::<f16>(&bytes[..2]).to_f32(),
            F32 => bytemuck::pod_read_unaligned::<f32>(&bytes[..4]),
        }
    }
    pub(crate) fn write(&self, x: f32, bytes: &mut [u8]) {
        use ComponentType::*;
        match self {
            U8 => bytes[0] = u8::from_f32(x),
            F16 => bytes[..2].copy_from_slice(bytemuck::bytes_of(&f16::from_f32(x))),
            F32 => bytes[..4].copy_from_slice(bytemuck::bytes_of(&x)),
        }
    }
}

/// Parses either [`.name()`](ComponentType::name) or
/// [`.as_str()`](ComponentType::as_str).
impl FromStr for ComponentType {
    type Err = ();
    fn from_str(input: &str) -> Result<Self, ()> {
        Self::iter()
            .find(|x| x.as_str() == input || x.name() == input)
            .ok_or(())
    }
}

#[cfg(feature = "serde")]
impl Serialize for ComponentType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for ComponentType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        ComponentType::from_str(&name)
            .map_err(|_| serde::de::Error::custom(format!("unknown ComponentType {name}")))
    }
}

fn f32_to_unorm8(x: f32) -> u8 {
    if x.is_nan() {
        return 0;
    }
    (x.clamp(0., 1.) * 255.).round() as u8
}

fn unorm8_to_f32(x: u8) -> f32 {
    f32::from(x) / 255.
}

/// Host representations of a single pixel component.
pub trait Component: Default + Copy + Pod + Debug + PartialEq + Sealed + 'static {
    /// The [`ComponentType`].
    const COMPONENT_TYPE: ComponentType;
    /// Converts to the normalized float domain.
    fn to_f32(self) -> f32;
    /// Converts from the normalized float domain, rounding to nearest.
    fn from_f32(x: f32) -> Self;
}

impl Component for u8 {
    const COMPONENT_TYPE: ComponentType = ComponentType::U8;
    #[inline]
    fn to_f32(self) -> f32 {
        unorm8_to_f32(self)
    }
    #[inline]
    fn from_f32(x: f32) -> Self {
        f32_to_unorm8(x)
    }
}

impl Component for f16 {
    const COMPONENT_TYPE: ComponentType = ComponentType::F16;
    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }
    #[inline]
    fn from_f32(x: f32) -> Self {
        f16::from_f32(x)
    }
}

impl Component for f32 {
    const COMPONENT_TYPE: ComponentType = ComponentType::F32;
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }
    #[inline]
    fn from_f32(x: f32) -> Self {
        x
    }
}
