/*!
Running and timing one invocation of a kernel.

A fixture implements [`Test`]: it allocates its inputs when created, then
[`run_test`] drives it through prepare, run and evaluate. [`time_test`] repeats
prepare and run without evaluating.

```
# use spvcheck::{anyhow::Result, harness::*, kernel::{ExecutionTime, Kernel}};
struct Nothing;

impl Test for Nothing {
    fn run(&mut self, _kernel: &Kernel) -> Result<ExecutionTime> {
        Ok(ExecutionTime::default())
    }
}

impl TestFixture for Nothing {
    fn new(_kernel: &Kernel, _args: &[String]) -> Result<Self> {
        Ok(Self)
    }
}

let test = make_invocation_test::<Nothing>("nothing");
assert_eq!(test.variation(), "nothing");
```
*/

use super::{Evaluation, Options};
use crate::{
    kernel::{ExecutionTime, Kernel},
    result::Result,
};
use serde::Serialize;
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

/// Measures wall time.
#[derive(Clone, Copy, Debug)]
pub struct StopWatch {
    start: Instant,
}

impl StopWatch {
    /// Starts timing.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
    /// Starts again from now.
    pub fn restart(&mut self) {
        self.start = Instant::now();
    }
    /// The time since the last (re)start.
    pub fn split_time(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for StopWatch {
    fn default() -> Self {
        Self::new()
    }
}

/// The outcome of one invocation.
#[derive(Clone, Default, Debug, PartialEq, Serialize)]
pub struct InvocationResult {
    /// Human readable description of the fixture's parameters.
    pub parameters: String,
    pub execution_time: ExecutionTime,
    pub evaluation: Evaluation,
    /// Time spent in [`Test::evaluate`].
    pub eval_time: Duration,
}

impl InvocationResult {
    /// Whether the evaluation passed.
    pub fn passed(&self) -> bool {
        self.evaluation.passed()
    }
}

/// A test fixture.
pub trait Test {
    /// Describes the fixture's parameters, empty by default.
    fn parameters(&self) -> String {
        String::new()
    }
    /// Resets inputs before a run.
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }
    /// Dispatches `kernel`.
    fn run(&mut self, kernel: &Kernel) -> Result<ExecutionTime>;
    /// Checks the outputs of the last run, an empty evaluation by default.
    fn evaluate(&mut self, options: &Options) -> Result<Evaluation> {
        let _ = options;
        Ok(Evaluation::default())
    }
}

/// A [`Test`] that can be created for a kernel.
pub trait TestFixture: Test + Sized {
    /// Allocates the fixture's resources on the kernel's device.
    fn new(kernel: &Kernel, args: &[String]) -> Result<Self>;
}

/** Prepares, runs and evaluates `test` once.

**errors**
Any step failed. */
pub fn run_test(kernel: &Kernel, options: &Options, test: &mut dyn Test) -> Result<InvocationResult> {
    let parameters = test.parameters();
    test.prepare()?;
    let execution_time = test.run(kernel)?;
    let stop_watch = StopWatch::new();
    let evaluation = test.evaluate(options)?;
    let eval_time = stop_watch.split_time();
    tracing::debug!(
        entry = kernel.entry_point(),
        %parameters,
        passed = evaluation.passed(),
        "ran invocation"
    );
    Ok(InvocationResult {
        parameters,
        execution_time,
        evaluation,
        eval_time,
    })
}

/** Prepares and runs `test` `iterations` times without evaluating.

Each result is marked correct so that timing runs count as passes.

**errors**
Any step failed. */
pub fn time_test(kernel: &Kernel, iterations: u32, test: &mut dyn Test) -> Result<Vec<InvocationResult>> {
    let template = InvocationResult {
        parameters: test.parameters(),
        evaluation: Evaluation {
            num_correct: 1,
            ..Evaluation::default()
        },
        ..InvocationResult::default()
    };
    let mut results = Vec::with_capacity(iterations as usize);
    for _ in 0..iterations {
        test.prepare()?;
        let execution_time = test.run(kernel)?;
        results.push(InvocationResult {
            execution_time,
            ..template.clone()
        });
    }
    tracing::debug!(
        entry = kernel.entry_point(),
        iterations,
        "timed invocation"
    );
    Ok(results)
}

type TestFn = dyn Fn(&Kernel, &[String], &Options) -> Result<InvocationResult> + Send + Sync;
type TimeFn = dyn Fn(&Kernel, &[String], u32) -> Result<Vec<InvocationResult>> + Send + Sync;

/// A named way of invoking a kernel.
#[derive(Clone)]
pub struct InvocationTest {
    variation: String,
    test_fn: Arc<TestFn>,
    time_fn: Arc<TimeFn>,
}

impl InvocationTest {
    /// Creates an invocation test from a function that checks results and
    /// one that times `iterations` runs.
    pub fn new(
        variation: impl Into<String>,
        test_fn: impl Fn(&Kernel, &[String], &Options) -> Result<InvocationResult> + Send + Sync + 'static,
        time_fn: impl Fn(&Kernel, &[String], u32) -> Result<Vec<InvocationResult>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            variation: variation.into(),
            test_fn: Arc::new(test_fn),
            time_fn: Arc::new(time_fn),
        }
    }
    /// The variation label.
    pub fn variation(&self) -> &str {
        &self.variation
    }
    /// Runs once and evaluates.
    pub fn test(&self, kernel: &Kernel, args: &[String], options: &Options) -> Result<InvocationResult> {
        (self.test_fn)(kernel, args, options)
    }
    /// Runs `iterations` times.
    pub fn time(&self, kernel: &Kernel, args: &[String], iterations: u32) -> Result<Vec<InvocationResult>> {
        (self.time_fn)(kernel, args, iterations)
    }
}

impl fmt::Debug for InvocationTest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("InvocationTest")
            .field("variation", &self.variation)
            .finish_non_exhaustive()
    }
}

/// An invocation test that creates a fresh `F` per call.
pub fn make_invocation_test<F: TestFixture + 'static>(variation: impl Into<String>) -> InvocationTest {
    InvocationTest::new(
        variation,
        |kernel, args, options| {
            let mut fixture = F::new(kernel, args)?;
            run_test(kernel, options, &mut fixture)
        },
        |kernel, args, iterations| {
            let mut fixture = F::new(kernel, args)?;
            time_test(kernel, iterations, &mut fixture)
        },
    )
}

fn null_result() -> InvocationResult {
    InvocationResult {
        evaluation: Evaluation {
            num_correct: 1,
            ..Evaluation::message("kernel compiled but intentionally not invoked")
        },
        ..InvocationResult::default()
    }
}

/// The "compile-only" invocation test, which passes without running the
/// kernel.
///
/// Timing it yields a single result.
pub fn null_invocation_test() -> InvocationTest {
    InvocationTest::new(
        "compile-only",
        |_, _, _| Ok(null_result()),
        |_, _, _| Ok(vec![null_result()]),
    )
}
