#![forbid(unsafe_code)]
/*!
Host-side pixel math for **spvcheck**.

Nothing in this crate touches a device. It describes the component and pixel
layouts kernels read and write, converts between them, and decides whether
two pixels are equal within tolerance.
*/

pub use half;
pub use num_traits;

pub mod fp;
pub mod pixel;
pub mod scalar;
