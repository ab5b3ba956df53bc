//! `readLocalSize`: writes `get_local_size(0..3)` to a buffer.

use crate::{
    buffer::Buffer,
    device::HostInvocation,
    harness::{make_invocation_test, Evaluation, InvocationTest, KernelTest, ModuleTest, Options, Test, TestFixture},
    kernel::{ExecutionTime, Kernel, KernelArg, WorkgroupDimensions},
    result::Result,
};
use anyhow::bail;

/// The module name.
pub const MODULE: &str = "readLocalSize";
/// The entry point.
pub const ENTRY: &str = "readLocalSize";

/// The descriptor map of the module.
pub const SPVMAP: &str =
    "kernel,readLocalSize,arg,dst,argOrdinal,0,descriptorSet,0,binding,0,offset,0,argKind,buffer\n";

/// Host implementation of the kernel.
pub fn host_kernel(invocation: &HostInvocation) -> Result<()> {
    let mut dst = invocation.buffer::<u32>(0)?;
    if dst.len() < 3 {
        bail!("expected 3 elements, found {}", dst.len());
    }
    dst[..3].copy_from_slice(&invocation.workgroup_size().to_array());
    Ok(())
}

/// Checks that the kernel sees the workgroup size it was created with.
pub struct ReadLocalSizeTest {
    dst: Buffer,
    expected: WorkgroupDimensions,
}

impl Test for ReadLocalSizeTest {
    fn parameters(&self) -> String {
        self.expected.to_string()
    }
    fn prepare(&mut self) -> Result<()> {
        self.dst.map::<u32>()?.fill(0);
        Ok(())
    }
    fn run(&mut self, kernel: &Kernel) -> Result<ExecutionTime> {
        kernel.dispatch([1, 1, 1], &[KernelArg::Buffer(&self.dst)])
    }
    fn evaluate(&mut self, options: &Options) -> Result<Evaluation> {
        let observed = self.dst.map::<u32>()?;
        let mut evaluation = Evaluation::default();
        for ((dim, expected), observed) in ["x", "y", "z"]
            .into_iter()
            .zip(self.expected.to_array())
            .zip(observed.iter().copied())
        {
            let correct = expected == observed;
            if options.should_log(correct) {
                tracing::info!(dim, expected, observed, correct, "local size");
            }
            if correct {
                evaluation.num_correct += 1;
            } else {
                evaluation.num_errors += 1;
                evaluation
                    .messages
                    .push(format!("local size {dim}: expected {expected}, observed {observed}"));
            }
        }
        Ok(evaluation)
    }
}

impl TestFixture for ReadLocalSizeTest {
    fn new(kernel: &Kernel, _args: &[String]) -> Result<Self> {
        Ok(Self {
            dst: Buffer::storage(kernel.device(), 3 * std::mem::size_of::<u32>())?,
            expected: kernel.workgroup_size(),
        })
    }
}

/// The invocation test.
pub fn variant() -> InvocationTest {
    make_invocation_test::<ReadLocalSizeTest>("local size")
}

/// Tests [`ENTRY`] over a range of workgroup sizes.
pub fn module_test() -> ModuleTest {
    let sizes = [
        WorkgroupDimensions::new(1, 1),
        WorkgroupDimensions::new(8, 8),
        WorkgroupDimensions::new(32, 1),
        WorkgroupDimensions::new(1, 32),
        WorkgroupDimensions::new_3d(4, 4, 4),
    ];
    ModuleTest::new(MODULE).kernel_tests(
        sizes
            .into_iter()
            .map(|size| KernelTest::new(ENTRY, size).invocation_test(variant())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assets::MemoryAssets, device::Device, harness::test_module, module::spirv::stub_module};

    fn assets() -> MemoryAssets {
        MemoryAssets::new()
            .with(format!("{MODULE}.spvmap"), SPVMAP)
            .with(format!("{MODULE}.spv"), stub_module(&[ENTRY]))
    }

    #[test]
    fn local_sizes() {
        let device = Device::host_builder().kernel(ENTRY, host_kernel).build();
        let test = module_test();
        let result = test_module(&device, &assets(), &test);
        assert_eq!(result.kernel_results.len(), 5);
        for kernel in result.kernel_results.iter() {
            assert_eq!(kernel.invocation_results.len(), 1);
            let invocation = &kernel.invocation_results[0];
            assert_eq!(invocation.result.parameters, kernel.test.workgroup_size.to_string());
            assert_eq!(invocation.result.evaluation.num_correct, 3);
        }
        assert!(result.passed(), "{}", result.report());
    }

    #[test]
    fn wrong_local_size() {
        let device = Device::host_builder()
            .kernel(ENTRY, |invocation| {
                invocation.buffer::<u32>(0)?[..3].copy_from_slice(&[1, 1, 1]);
                Ok(())
            })
            .build();
        let test = module_test();
        let result = test_module(&device, &assets(), &test);
        let invocation = &result.kernel_results[1].invocation_results[0];
        assert_eq!(invocation.result.evaluation.num_errors, 2);
        assert_eq!(
            invocation.result.evaluation.messages,
            [
                "local size x: expected 8, observed 1",
                "local size y: expected 8, observed 1"
            ]
        );
        assert_eq!(result.summary().test_failure, 4);
    }
}
