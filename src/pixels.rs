//! Host side pixel buffer helpers for seeding test inputs.

use crate::pixel::{Pixel, PixelFormat};
use rand::Rng;

/// Fills `pixels` with random values.
///
/// Components are multiples of 1/255 in `[0, 1]`, so that they survive
/// conversion between every pixel type exactly.
pub fn fill_random_pixels<T: PixelFormat>(pixels: &mut [T]) {
    fill_random_pixels_with(&mut rand::thread_rng(), pixels);
}

/// Fills `pixels` with random values from `rng`.
///
/// See [`fill_random_pixels`].
pub fn fill_random_pixels_with<T: PixelFormat>(rng: &mut impl Rng, pixels: &mut [T]) {
    for pixel in pixels.iter_mut() {
        let mut values = [0f32; 4];
        for value in values.iter_mut() {
            *value = rng.gen_range(0..=255u8) as f32 / 255.;
        }
        *pixel = T::from_pixel(Pixel::new(T::PIXEL_TYPE, values));
    }
}

/// Converts each pixel of `src` into `dst`.
///
/// **panics**
/// Panics if the lengths differ.
pub fn copy_pixel_buffer<S: PixelFormat, D: PixelFormat>(src: &[S], dst: &mut [D]) {
    assert_eq!(src.len(), dst.len(), "pixel buffer lengths differ");
    for (x, y) in src.iter().zip(dst.iter_mut()) {
        *y = D::from_pixel(x.to_pixel());
    }
}

/// Replaces each component `x` with `1 - x`.
pub fn invert_pixel_buffer<T: PixelFormat>(pixels: &mut [T]) {
    for pixel in pixels.iter_mut() {
        let mut values = pixel.to_pixel().to_float4();
        for value in values.iter_mut() {
            *value = 1. - *value;
        }
        *pixel = T::from_pixel(Pixel::new(T::PIXEL_TYPE, values));
    }
}
