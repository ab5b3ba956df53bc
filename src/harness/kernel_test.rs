use super::{invocation::InvocationResult, Evaluation, InvocationTest, Options};
use crate::{
    kernel::{Kernel, WorkgroupDimensions},
    module::Module,
    result::Result,
};
use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
};

/// The tests of one entry point at one workgroup size.
#[derive(Clone, Debug)]
pub struct KernelTest {
    pub entry: String,
    /// [`WorkgroupDimensions::SKIP`] skips the test.
    pub workgroup_size: WorkgroupDimensions,
    /// Passed to each fixture when it is created.
    pub args: Vec<String>,
    pub options: Options,
    /// Dispatches per invocation test when timing, 0 to check results.
    pub timing_iterations: u32,
    pub invocation_tests: Vec<InvocationTest>,
}

impl KernelTest {
    /// A compile only test of `entry`.
    pub fn new(entry: impl Into<String>, workgroup_size: WorkgroupDimensions) -> Self {
        Self {
            entry: entry.into(),
            workgroup_size,
            args: Vec::new(),
            options: Options::default(),
            timing_iterations: 0,
            invocation_tests: Vec::new(),
        }
    }
    /// Registers a test that is never compiled or run.
    pub fn skip(entry: impl Into<String>) -> Self {
        Self::new(entry, WorkgroupDimensions::SKIP)
    }
    /// Adds a fixture argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
    /// Sets [`Options::verbose`].
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.options = Options::verbose(verbose);
        self
    }
    /// Sets the logging options.
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }
    /// Times each invocation test `iterations` times instead of checking it.
    pub fn timing_iterations(mut self, iterations: u32) -> Self {
        self.timing_iterations = iterations;
        self
    }
    /// Adds an invocation test.
    pub fn invocation_test(mut self, test: InvocationTest) -> Self {
        self.invocation_tests.push(test);
        self
    }
    /// Adds invocation tests.
    pub fn invocation_tests(mut self, tests: impl IntoIterator<Item = InvocationTest>) -> Self {
        self.invocation_tests.extend(tests);
        self
    }
    /// Whether the test is skipped.
    pub fn is_skip(&self) -> bool {
        self.workgroup_size.is_skip()
    }
}

/// The result of one [`InvocationTest`].
#[derive(Clone, Debug)]
pub struct InvocationTestResult<'a> {
    pub test: &'a InvocationTest,
    pub result: InvocationResult,
}

impl InvocationTestResult<'_> {
    /// Whether the evaluation passed.
    pub fn passed(&self) -> bool {
        self.result.passed()
    }
}

/// The result of a [`KernelTest`].
#[derive(Clone, Debug)]
pub struct KernelTestResult<'a> {
    pub test: &'a KernelTest,
    pub skipped: bool,
    pub compiled_correctly: bool,
    /// Set if compiling or an invocation failed.
    pub exception: Option<String>,
    pub invocation_results: Vec<InvocationTestResult<'a>>,
}

impl<'a> KernelTestResult<'a> {
    fn new(test: &'a KernelTest) -> Self {
        Self {
            test,
            skipped: false,
            compiled_correctly: false,
            exception: None,
            invocation_results: Vec::new(),
        }
    }
    /// Compiled, finished, and every invocation passed.
    pub fn passed(&self) -> bool {
        !self.skipped
            && self.compiled_correctly
            && self.exception.is_none()
            && self.invocation_results.iter().all(|x| x.passed())
    }
    /// The merged evaluations of the invocation results.
    pub fn evaluation(&self) -> Evaluation {
        self.invocation_results
            .iter()
            .map(|x| x.result.evaluation.clone())
            .sum()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let msg = if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown payload".to_string()
    };
    format!("panic: {msg}")
}

/// Runs `f`, rendering an error or panic into a string.
pub(super) fn contain<T>(f: impl FnOnce() -> Result<T>) -> Result<T, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(x)) => Ok(x),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(payload) => Err(panic_message(payload)),
    }
}

fn compile_failure() -> InvocationResult {
    InvocationResult {
        evaluation: Evaluation::message("kernel failed to compile"),
        ..InvocationResult::default()
    }
}

fn run_invocation_tests<'a>(
    kernel: Option<&Kernel>,
    test: &'a KernelTest,
    results: &mut Vec<InvocationTestResult<'a>>,
) -> Result<()> {
    for invocation_test in test.invocation_tests.iter() {
        let Some(kernel) = kernel else {
            results.push(InvocationTestResult {
                test: invocation_test,
                result: compile_failure(),
            });
            continue;
        };
        if test.timing_iterations == 0 {
            let result = invocation_test.test(kernel, &test.args, &test.options)?;
            results.push(InvocationTestResult {
                test: invocation_test,
                result,
            });
        } else {
            let timings = invocation_test.time(kernel, &test.args, test.timing_iterations)?;
            results.extend(timings.into_iter().map(|result| InvocationTestResult {
                test: invocation_test,
                result,
            }));
        }
    }
    Ok(())
}

/** Compiles `test.entry` from `module` and runs its invocation tests.

Never fails: a compile failure clears `compiled_correctly` and each
invocation test gets a failing result without running. An error or panic in
an invocation test is recorded in `exception` and stops the remaining
invocation tests. */
pub fn test_kernel<'a>(module: &Module, test: &'a KernelTest) -> KernelTestResult<'a> {
    let mut result = KernelTestResult::new(test);
    if test.is_skip() {
        tracing::info!(entry = %test.entry, "skipped kernel test");
        result.skipped = true;
        return result;
    }
    let span = tracing::info_span!(
        "test_kernel",
        entry = %test.entry,
        workgroup_size = %test.workgroup_size
    );
    let _guard = span.enter();
    let kernel = match contain(|| module.create_kernel(&test.entry, test.workgroup_size)) {
        Ok(kernel) => {
            result.compiled_correctly = true;
            Some(kernel)
        }
        Err(e) => {
            tracing::error!("{e}");
            result.exception = Some(e);
            None
        }
    };
    if test.invocation_tests.is_empty() {
        return result;
    }
    let outcome = contain(|| {
        run_invocation_tests(kernel.as_ref(), test, &mut result.invocation_results)
    });
    if let Err(e) = outcome {
        tracing::error!("{e}");
        result.exception = Some(e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assets::MemoryAssets,
        buffer::Buffer,
        device::Device,
        harness::{make_invocation_test, null_invocation_test, Test, TestFixture},
        kernel::{ExecutionTime, KernelArg},
        module::spirv::stub_module,
    };
    use anyhow::bail;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SPVMAP: &str =
        "kernel,count,arg,dst,argOrdinal,0,descriptorSet,0,binding,0,offset,0,argKind,buffer\n\
         kernel,broken,arg,dst,argOrdinal,0,descriptorSet,0,binding,0,offset,0,argKind,buffer\n";

    // "broken" has no host implementation, so it fails to compile
    fn module() -> Module {
        let device = Device::host_builder()
            .kernel("count", |invocation| {
                invocation.buffer::<u32>(0)?.fill(1);
                Ok(())
            })
            .build();
        let assets = MemoryAssets::new()
            .with("counting.spvmap", SPVMAP)
            .with("counting.spv", stub_module(&["count", "broken"]));
        Module::from_assets(&device, &assets, "counting").unwrap()
    }

    struct Count {
        dst: Buffer,
    }

    impl Test for Count {
        fn run(&mut self, kernel: &Kernel) -> Result<ExecutionTime> {
            kernel.dispatch([1, 1, 1], &[KernelArg::Buffer(&self.dst)])
        }
        fn evaluate(&mut self, _options: &Options) -> Result<Evaluation> {
            Ok(Evaluation {
                num_correct: self.dst.map::<u32>()?.iter().filter(|x| **x == 1).count() as u64,
                ..Evaluation::default()
            })
        }
    }

    impl TestFixture for Count {
        fn new(kernel: &Kernel, _args: &[String]) -> Result<Self> {
            Ok(Self {
                dst: Buffer::storage(kernel.device(), 16)?,
            })
        }
    }

    static UNCOMPILED_CREATED: AtomicUsize = AtomicUsize::new(0);

    struct Uncompiled;

    impl Test for Uncompiled {
        fn run(&mut self, _kernel: &Kernel) -> Result<ExecutionTime> {
            Ok(ExecutionTime::default())
        }
    }

    impl TestFixture for Uncompiled {
        fn new(_kernel: &Kernel, _args: &[String]) -> Result<Self> {
            UNCOMPILED_CREATED.fetch_add(1, Ordering::SeqCst);
            Ok(Self)
        }
    }

    struct Fails;

    impl Test for Fails {
        fn run(&mut self, _kernel: &Kernel) -> Result<ExecutionTime> {
            bail!("run failed")
        }
    }

    impl TestFixture for Fails {
        fn new(_kernel: &Kernel, _args: &[String]) -> Result<Self> {
            Ok(Self)
        }
    }

    struct Panics;

    impl Test for Panics {
        fn run(&mut self, _kernel: &Kernel) -> Result<ExecutionTime> {
            panic!("kernel exploded")
        }
    }

    impl TestFixture for Panics {
        fn new(_kernel: &Kernel, _args: &[String]) -> Result<Self> {
            Ok(Self)
        }
    }

    #[test]
    fn compile_only() {
        let module = module();
        let test = KernelTest::new("count", WorkgroupDimensions::new(4, 1));
        let result = test_kernel(&module, &test);
        assert!(result.compiled_correctly);
        assert!(result.exception.is_none());
        assert!(result.invocation_results.is_empty());
        assert!(result.passed());
    }

    #[test]
    fn null_invocation() {
        let module = module();
        let test = KernelTest::new("count", WorkgroupDimensions::new(4, 1))
            .invocation_test(null_invocation_test());
        let result = test_kernel(&module, &test);
        assert_eq!(result.invocation_results.len(), 1);
        assert_eq!(result.invocation_results[0].test.variation(), "compile-only");
        assert!(result.passed());
    }

    #[test]
    fn compile_failure_synthesizes_failures() {
        let module = module();
        let test = KernelTest::new("broken", WorkgroupDimensions::new(4, 1))
            .invocation_test(make_invocation_test::<Uncompiled>("a"))
            .invocation_test(make_invocation_test::<Uncompiled>("b"));
        let result = test_kernel(&module, &test);
        assert!(!result.compiled_correctly);
        assert!(result
            .exception
            .as_deref()
            .unwrap()
            .contains("no host implementation"));
        assert_eq!(result.invocation_results.len(), 2);
        for x in result.invocation_results.iter() {
            assert!(!x.passed());
            assert_eq!(x.result.evaluation.messages, ["kernel failed to compile"]);
        }
        assert_eq!(
            result
                .invocation_results
                .iter()
                .map(|x| x.test.variation())
                .collect::<Vec<_>>(),
            ["a", "b"]
        );
        assert_eq!(UNCOMPILED_CREATED.load(Ordering::SeqCst), 0);
        assert!(!result.passed());
    }

    #[test]
    fn invalid_workgroup_size_is_a_compile_failure() {
        let module = module();
        let test = KernelTest::new("count", WorkgroupDimensions::new(4096, 4096))
            .invocation_test(null_invocation_test());
        let result = test_kernel(&module, &test);
        assert!(!result.compiled_correctly);
        assert!(!result.invocation_results[0].passed());
    }

    #[test]
    fn skip() {
        let module = module();
        let test = KernelTest::skip("broken").invocation_test(null_invocation_test());
        let result = test_kernel(&module, &test);
        assert!(result.skipped);
        assert!(!result.compiled_correctly);
        assert!(result.exception.is_none());
        assert!(result.invocation_results.is_empty());
        assert!(!result.passed());
    }

    #[test]
    fn error_aborts_remaining_variants() {
        let module = module();
        let test = KernelTest::new("count", WorkgroupDimensions::new(4, 1))
            .invocation_test(make_invocation_test::<Count>("first"))
            .invocation_test(make_invocation_test::<Fails>("fails"))
            .invocation_test(make_invocation_test::<Count>("never"));
        let result = test_kernel(&module, &test);
        assert!(result.compiled_correctly);
        assert_eq!(result.exception.as_deref(), Some("run failed"));
        assert_eq!(result.invocation_results.len(), 1);
        assert_eq!(result.invocation_results[0].test.variation(), "first");
        assert_eq!(result.evaluation().num_correct, 4);
        assert!(!result.passed());
    }

    #[test]
    fn panic_is_contained() {
        let module = module();
        let test = KernelTest::new("count", WorkgroupDimensions::new(4, 1))
            .invocation_test(make_invocation_test::<Panics>("panics"));
        let result = test_kernel(&module, &test);
        assert_eq!(result.exception.as_deref(), Some("panic: kernel exploded"));
        assert!(result.invocation_results.is_empty());
    }

    #[test]
    fn timing() {
        let module = module();
        let test = KernelTest::new("count", WorkgroupDimensions::new(4, 1))
            .timing_iterations(3)
            .invocation_tests([
                make_invocation_test::<Count>("a"),
                make_invocation_test::<Count>("b"),
            ]);
        let result = test_kernel(&module, &test);
        assert_eq!(result.invocation_results.len(), 6);
        assert!(result.passed());
    }
}
