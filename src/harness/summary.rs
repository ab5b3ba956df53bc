use super::{KernelTestResult, ModuleTestResult};
use serde::Serialize;
use std::{
    fmt::{self, Display},
    ops::AddAssign,
};

/// Counts of outcomes over one or more module tests.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub test_success: u64,
    pub test_failure: u64,
    pub kernel_load_success: u64,
    pub kernel_load_skip: u64,
    pub kernel_load_fail: u64,
    pub untested_entry_points: u64,
    pub module_load_fail: u64,
}

impl Summary {
    /// Nothing failed.
    pub fn passed(&self) -> bool {
        self.test_failure == 0 && self.kernel_load_fail == 0 && self.module_load_fail == 0
    }
    fn add_kernel(&mut self, result: &KernelTestResult) {
        if result.skipped {
            self.kernel_load_skip += 1;
            return;
        }
        if result.compiled_correctly {
            self.kernel_load_success += 1;
        } else {
            self.kernel_load_fail += 1;
        }
        for invocation in result.invocation_results.iter() {
            if invocation.passed() {
                self.test_success += 1;
            } else {
                self.test_failure += 1;
            }
        }
        // an invocation test that raised has no result of its own
        if result.compiled_correctly && result.exception.is_some() {
            self.test_failure += 1;
        }
    }
}

impl From<&ModuleTestResult<'_>> for Summary {
    fn from(result: &ModuleTestResult) -> Self {
        let mut summary = Self::default();
        if result.exception.is_some() {
            summary.module_load_fail += 1;
        }
        for kernel in result.kernel_results.iter() {
            summary.add_kernel(kernel);
        }
        summary.untested_entry_points += result.untested_entry_points.len() as u64;
        summary
    }
}

impl AddAssign for Summary {
    fn add_assign(&mut self, rhs: Self) {
        self.test_success += rhs.test_success;
        self.test_failure += rhs.test_failure;
        self.kernel_load_success += rhs.kernel_load_success;
        self.kernel_load_skip += rhs.kernel_load_skip;
        self.kernel_load_fail += rhs.kernel_load_fail;
        self.untested_entry_points += rhs.untested_entry_points;
        self.module_load_fail += rhs.module_load_fail;
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "tests: {} passed, {} failed; kernels: {} loaded, {} skipped, {} failed; {} untested entry points; {} module failures",
            self.test_success,
            self.test_failure,
            self.kernel_load_success,
            self.kernel_load_skip,
            self.kernel_load_fail,
            self.untested_entry_points,
            self.module_load_fail,
        )
    }
}
