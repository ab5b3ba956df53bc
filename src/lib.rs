#![forbid(unsafe_op_in_unsafe_fn)]
/*!
Conformance tests for compute kernels compiled to SPIR-V.

A [`ModuleTest`](harness::ModuleTest) names a compiled module (a `.spvmap`
descriptor map plus a `.spv` blob) and the [`KernelTest`](harness::KernelTest)s
for its entry points. [`test_module`](harness::test_module) loads the module on
a [`Device`](device::Device), compiles each tested entry point, runs every
registered invocation test, and returns a result tree. Failures at any level
are recorded in the tree, they never escape as errors.

```no_run
# use spvcheck::{assets::AssetDir, device::Device, harness::test_module, kernels};
let device = Device::host();
let assets = AssetDir::new("assets");
let module_test = kernels::copy_buffer_to_image::module_test();
let result = test_module(&device, &assets, &module_test);
println!("{}", result.summary());
```
*/

pub extern crate anyhow;
pub extern crate spvcheck_core;

#[doc(inline)]
pub use spvcheck_core::{fp, pixel, scalar};

pub mod result {
    pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
}

pub mod assets;
pub mod buffer;
pub mod device;
pub mod harness;
pub mod kernel;
pub mod kernels;
pub mod module;
pub mod pixels;
