use super::{
    kernel_test::contain, test_kernel, HarnessConfig, KernelTest, KernelTestResult, Options,
    Summary,
};
use crate::{assets::AssetSource, device::Device, module::Module, result::Result};
use std::fmt::Write;

/// The kernel tests of a module.
#[derive(Clone, Debug)]
pub struct ModuleTest {
    /// Loads `<name>.spvmap` and `<name>.spv`.
    pub name: String,
    pub kernel_tests: Vec<KernelTest>,
}

impl ModuleTest {
    /// No kernel tests.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kernel_tests: Vec::new(),
        }
    }
    /// Adds a kernel test.
    pub fn kernel_test(mut self, test: KernelTest) -> Self {
        self.kernel_tests.push(test);
        self
    }
    /// Adds kernel tests.
    pub fn kernel_tests(mut self, tests: impl IntoIterator<Item = KernelTest>) -> Self {
        self.kernel_tests.extend(tests);
        self
    }
    /// Applies the logging options and timing iterations of `config` to kernel
    /// tests that left them at their defaults.
    pub fn configure(mut self, config: &HarnessConfig) -> Self {
        for test in self.kernel_tests.iter_mut() {
            if test.options == Options::default() {
                test.options = config.options;
            }
            if test.timing_iterations == 0 {
                test.timing_iterations = config.timing_iterations;
            }
        }
        self
    }
}

/// The result of a [`ModuleTest`].
#[derive(Clone, Debug)]
pub struct ModuleTestResult<'a> {
    pub test: &'a ModuleTest,
    pub loaded_correctly: bool,
    /// Set if the module failed to load, or testing it was aborted.
    pub exception: Option<String>,
    pub kernel_results: Vec<KernelTestResult<'a>>,
    /// Entry points without a kernel test, in module order.
    pub untested_entry_points: Vec<String>,
}

impl ModuleTestResult<'_> {
    /// Counts the outcomes.
    pub fn summary(&self) -> Summary {
        Summary::from(self)
    }
    /// See [`Summary::passed`].
    pub fn passed(&self) -> bool {
        self.summary().passed()
    }
    /// Renders the result tree, one line per node.
    pub fn report(&self) -> String {
        let mut report = String::new();
        let status = if let Some(exception) = self.exception.as_ref() {
            format!("FAILED: {exception}")
        } else {
            "loaded".to_string()
        };
        let _ = writeln!(report, "module {}: {status}", self.test.name);
        for kernel in self.kernel_results.iter() {
            let test = kernel.test;
            let status = if kernel.skipped {
                "skipped"
            } else if kernel.compiled_correctly {
                "compiled"
            } else {
                "failed to compile"
            };
            let _ = writeln!(
                report,
                "  kernel {} {}: {status}",
                test.entry, test.workgroup_size
            );
            if let Some(exception) = kernel.exception.as_ref() {
                let _ = writeln!(report, "    exception: {exception}");
            }
            for invocation in kernel.invocation_results.iter() {
                let result = &invocation.result;
                let evaluation = &result.evaluation;
                let _ = write!(
                    report,
                    "    {} {}",
                    invocation.test.variation(),
                    if result.passed() { "PASS" } else { "FAIL" }
                );
                if !result.parameters.is_empty() {
                    let _ = write!(report, " [{}]", result.parameters);
                }
                let _ = write!(
                    report,
                    " correct={} errors={} time={:?} eval={:?}",
                    evaluation.num_correct,
                    evaluation.num_errors,
                    result.execution_time.cpu_duration,
                    result.eval_time,
                );
                for message in evaluation.messages.iter() {
                    let _ = write!(report, "; {message}");
                }
                report.push('\n');
            }
        }
        for entry in self.untested_entry_points.iter() {
            let _ = writeln!(report, "  untested entry point {entry}");
        }
        let _ = writeln!(report, "{}", self.summary());
        report
    }
}

fn run_kernel_tests<'a>(
    device: &Device,
    assets: &dyn AssetSource,
    test: &'a ModuleTest,
    result: &mut ModuleTestResult<'a>,
) -> Result<()> {
    let module = Module::from_assets(device, assets, &test.name)?;
    result.loaded_correctly = true;
    for entry in module.entry_points() {
        let mut kernel_tests = test
            .kernel_tests
            .iter()
            .filter(|kernel_test| kernel_test.entry == entry)
            .peekable();
        if kernel_tests.peek().is_none() {
            tracing::info!(entry, "untested entry point");
            result.untested_entry_points.push(entry.to_string());
            continue;
        }
        for kernel_test in kernel_tests {
            result.kernel_results.push(test_kernel(&module, kernel_test));
        }
    }
    Ok(())
}

/** Loads the module `test.name` from `assets` and runs its kernel tests.

Never fails: a missing or invalid module clears `loaded_correctly` and records
the error in `exception`. Entry points without a kernel test are listed in
`untested_entry_points`. */
pub fn test_module<'a>(
    device: &Device,
    assets: &dyn AssetSource,
    test: &'a ModuleTest,
) -> ModuleTestResult<'a> {
    let span = tracing::info_span!("test_module", module = %test.name);
    let _guard = span.enter();
    let mut result = ModuleTestResult {
        test,
        loaded_correctly: false,
        exception: None,
        kernel_results: Vec::new(),
        untested_entry_points: Vec::new(),
    };
    if let Err(e) = contain(|| run_kernel_tests(device, assets, test, &mut result)) {
        tracing::error!("{e}");
        result.exception = Some(e);
    }
    tracing::info!("{}", result.summary());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assets::MemoryAssets, harness::null_invocation_test, kernel::WorkgroupDimensions,
        module::spirv::stub_module,
    };

    const SPVMAP: &str = "kernel,a\nkernel,b\nkernel,c\n";

    fn device() -> Device {
        Device::host_builder()
            .kernel("a", |_| Ok(()))
            .kernel("b", |_| Ok(()))
            .build()
    }

    fn assets() -> MemoryAssets {
        MemoryAssets::new()
            .with("abc.spvmap", SPVMAP)
            .with("abc.spv", stub_module(&["a", "b", "c"]))
    }

    #[test]
    fn matches_entry_points() {
        let test = ModuleTest::new("abc").kernel_tests([
            KernelTest::new("a", WorkgroupDimensions::new(1, 1))
                .invocation_test(null_invocation_test()),
            KernelTest::new("a", WorkgroupDimensions::new(2, 2))
                .invocation_test(null_invocation_test()),
            KernelTest::skip("c"),
            // not in the module
            KernelTest::new("d", WorkgroupDimensions::new(1, 1)),
        ]);
        let result = test_module(&device(), &assets(), &test);
        assert!(result.loaded_correctly);
        assert!(result.exception.is_none(), "{:?}", result.exception);
        assert_eq!(result.untested_entry_points, ["b"]);
        let entries: Vec<_> = result
            .kernel_results
            .iter()
            .map(|x| (x.test.entry.as_str(), x.skipped))
            .collect();
        assert_eq!(entries, [("a", false), ("a", false), ("c", true)]);
        let summary = result.summary();
        assert_eq!(
            summary,
            Summary {
                test_success: 2,
                kernel_load_success: 2,
                kernel_load_skip: 1,
                untested_entry_points: 1,
                ..Summary::default()
            }
        );
        assert!(result.passed());
        let report = result.report();
        assert!(report.starts_with("module abc: loaded\n"), "{report}");
        assert!(report.contains("  kernel a 2x2x1: compiled\n"), "{report}");
        assert!(report.contains("  kernel c 0x0x0: skipped\n"), "{report}");
        assert!(report.contains("  untested entry point b\n"), "{report}");
        assert!(report.contains("compile-only PASS correct=1 errors=0"), "{report}");
    }

    #[test]
    fn compile_failure_is_counted() {
        let test = ModuleTest::new("abc").kernel_test(
            KernelTest::new("c", WorkgroupDimensions::new(1, 1))
                .invocation_test(null_invocation_test()),
        );
        let result = test_module(&device(), &assets(), &test);
        assert!(result.loaded_correctly);
        assert_eq!(result.untested_entry_points, ["a", "b"]);
        let summary = result.summary();
        assert_eq!(summary.kernel_load_fail, 1);
        assert_eq!(summary.test_failure, 1);
        assert!(!result.passed());
        assert!(result.report().contains("kernel failed to compile"));
    }

    #[test]
    fn missing_spv() {
        let assets = MemoryAssets::new().with("abc.spvmap", SPVMAP);
        let test = ModuleTest::new("abc").kernel_test(KernelTest::new("a", WorkgroupDimensions::default()));
        let result = test_module(&device(), &assets, &test);
        assert!(!result.loaded_correctly);
        let exception = result.exception.as_deref().unwrap();
        assert!(exception.starts_with("cannot open spv for abc"), "{exception}");
        assert!(result.kernel_results.is_empty());
        assert!(result.untested_entry_points.is_empty());
        assert_eq!(result.summary().module_load_fail, 1);
    }

    #[test]
    fn bad_spvmap() {
        let assets = assets().with("abc.spvmap", "kernel,a\nbogus,record\n");
        let test = ModuleTest::new("abc");
        let result = test_module(&device(), &assets, &test);
        assert!(!result.loaded_correctly);
        let exception = result.exception.as_deref().unwrap();
        assert!(exception.contains("spvmap line 2"), "{exception}");
    }

    #[test]
    fn configure_keeps_explicit_settings() {
        let config = HarnessConfig {
            options: Options::verbose(true),
            timing_iterations: 4,
            ..HarnessConfig::default()
        };
        let test = ModuleTest::new("abc")
            .kernel_test(KernelTest::new("a", WorkgroupDimensions::new(1, 1)))
            .kernel_test(
                KernelTest::new("b", WorkgroupDimensions::new(1, 1))
                    .options(Options {
                        log_verbose: true,
                        log_incorrect: false,
                        log_correct: true,
                    })
                    .timing_iterations(2),
            )
            .configure(&config);
        assert_eq!(test.kernel_tests[0].options, Options::verbose(true));
        assert_eq!(test.kernel_tests[0].timing_iterations, 4);
        assert!(test.kernel_tests[1].options.log_correct);
        assert_eq!(test.kernel_tests[1].timing_iterations, 2);
    }
}
