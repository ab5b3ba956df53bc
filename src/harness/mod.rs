/*!
Test drivers.

[`test_module`] loads a module and runs the [`KernelTest`]s registered for its
entry points. [`test_kernel`] compiles one entry point and runs its
[`InvocationTest`]s, each of which drives a [`Test`] fixture through
[`run_test`] or [`time_test`]. Fixtures compare outputs with the functions in
[`compare`], producing an [`Evaluation`].
*/

pub mod compare;
mod evaluation;
mod invocation;
mod kernel_test;
mod module_test;
mod options;
mod summary;

pub use compare::{
    check_mapped_results, check_result, check_results, check_results_uniform, compare_mapped_region,
    compare_region, compare_region_uniform, Region,
};
pub use evaluation::Evaluation;
pub use invocation::{
    make_invocation_test, null_invocation_test, run_test, time_test, InvocationResult,
    InvocationTest, StopWatch, Test, TestFixture,
};
pub use kernel_test::{test_kernel, InvocationTestResult, KernelTest, KernelTestResult};
pub use module_test::{test_module, ModuleTest, ModuleTestResult};
pub use options::{HarnessConfig, Options};
pub use summary::Summary;
