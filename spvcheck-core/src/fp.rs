/*!
Floating point comparison in units in the last place (ULP).

Values are mapped from sign-magnitude bit patterns onto a single ordered
integer line, so the distance between two floats is the number of
representable values between them. Positive and negative zero map to the
same point; NaN is never equal to anything.
*/

use half::f16;
use num_traits::Float;

/// Tolerance used when comparing floating point pixel components.
pub const ULP_TOLERANCE: u32 = 2;

/// Floats that can be compared by ULP distance.
pub trait Ulp: Float {
    /// The signed position of `self` on the ordered integer line.
    fn ordered(self) -> i64;
    /// The number of representable values between `self` and `other`.
    ///
    /// Returns `None` if either value is NaN.
    fn ulp_distance(self, other: Self) -> Option<u64> {
        if self.is_nan() || other.is_nan() {
            return None;
        }
        Some(self.ordered().abs_diff(other.ordered()))
    }
}

macro_rules! impl_ulp {
    ($($t:ty => $sign:expr),+ $(,)?) => {
        $(
            impl Ulp for $t {
                #[inline]
                fn ordered(self) -> i64 {
                    let bits = self.to_bits();
                    let magnitude = i64::from(bits & !$sign);
                    if bits & $sign != 0 {
                        -magnitude
                    } else {
                        magnitude
                    }
                }
            }
        )+
    };
}

impl_ulp!(f32 => 0x8000_0000u32, f16 => 0x8000u16);

/// Whether `a` and `b` are within `ulps` of each other.
///
/// Infinities are only equal to themselves.
pub fn almost_equal<T: Ulp>(a: T, b: T, ulps: u32) -> bool {
    if a == b {
        return true;
    }
    if a.is_infinite() || b.is_infinite() {
        return false;
    }
    a.ulp_distance(b)
        .map_or(false, |distance| distance <= u64::from(ulps))
}

/// [`almost_equal`] for [`f16`].
pub fn almost_equal_f16(a: f16, b: f16, ulps: u32) -> bool {
    almost_equal(a, b, ulps)
}
