/*!
Kernel tests.

Each module here registers a [`ModuleTest`](crate::harness::ModuleTest) for one
compiled kernel, the fixtures it runs, and a host implementation of the kernel
for running on [`Device::host`](crate::device::Device::host).
*/

pub mod copy_buffer_to_image;
pub mod read_local_size;

use crate::{device::builder::HostDeviceBuilder, harness::ModuleTest};

/// Every module test.
pub fn module_tests() -> Vec<ModuleTest> {
    vec![
        copy_buffer_to_image::module_test(),
        read_local_size::module_test(),
    ]
}

/// Registers the host implementation of every kernel.
pub fn host_kernels(builder: HostDeviceBuilder) -> HostDeviceBuilder {
    builder
        .kernel(copy_buffer_to_image::ENTRY, copy_buffer_to_image::host_kernel)
        .kernel(read_local_size::ENTRY, read_local_size::host_kernel)
}
