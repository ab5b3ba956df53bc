use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Controls per pixel diagnostics.
///
/// Nothing is logged unless `log_verbose` is set. Then each compared pixel is
/// logged if it was correct and `log_correct` is set, or incorrect and
/// `log_incorrect` is set.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub log_verbose: bool,
    pub log_incorrect: bool,
    pub log_correct: bool,
}

impl Options {
    /// Logs incorrect pixels if `verbose`.
    pub fn verbose(verbose: bool) -> Self {
        Self {
            log_verbose: verbose,
            log_incorrect: verbose,
            log_correct: false,
        }
    }
    /// Whether a pixel with this outcome is logged.
    pub fn should_log(&self, correct: bool) -> bool {
        self.log_verbose && if correct { self.log_correct } else { self.log_incorrect }
    }
}

/// Settings for a test run, usually read from the environment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory of `.spvmap` / `.spv` assets.
    pub assets: PathBuf,
    /// The Vulkan device to test, if any.
    pub device_index: Option<usize>,
    pub options: Options,
    /// Dispatches per invocation test when timing, 0 to check results.
    pub timing_iterations: u32,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            assets: PathBuf::from("assets"),
            device_index: None,
            options: Options::default(),
            timing_iterations: 0,
        }
    }
}

impl HarnessConfig {
    /** Reads the config from the environment.

    - `SPVCHECK_ASSETS`: the asset directory.
    - `SPVCHECK_DEVICE`: the device index.
    - `SPVCHECK_LOG`: comma separated `verbose`, `incorrect`, `correct`.
    - `SPVCHECK_TIMING`: timing iterations.

    **errors**
    A variable is set but does not parse. */
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }
    /// See [`.from_env()`](HarnessConfig::from_env).
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(assets) = var("SPVCHECK_ASSETS") {
            config.assets = assets.into();
        }
        if let Some(device) = var("SPVCHECK_DEVICE") {
            let index = device
                .trim()
                .parse()
                .with_context(|| format!("SPVCHECK_DEVICE={device:?}"))?;
            config.device_index = Some(index);
        }
        if let Some(log) = var("SPVCHECK_LOG") {
            for flag in log.split(',').map(str::trim).filter(|x| !x.is_empty()) {
                match flag {
                    "verbose" => config.options.log_verbose = true,
                    "incorrect" => config.options.log_incorrect = true,
                    "correct" => config.options.log_correct = true,
                    _ => bail!("SPVCHECK_LOG: unknown flag {flag:?}"),
                }
            }
        }
        if let Some(timing) = var("SPVCHECK_TIMING") {
            config.timing_iterations = timing
                .trim()
                .parse()
                .with_context(|| format!("SPVCHECK_TIMING={timing:?}"))?;
        }
        Ok(config)
    }
}
