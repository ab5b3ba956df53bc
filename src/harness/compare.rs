/*!
Pixel region comparison.

A region is `height` rows of `width` pixels, with rows starting every `pitch`
pixels. Each expected / observed pair is compared in the promoted type of the
two pixel formats (see [`Comparison`]). A region passes if every pixel is
correct and at least one pixel was compared.
*/

use super::{Evaluation, Options};
use crate::{
    buffer::Buffer,
    pixel::{Comparison, Pixel, PixelFormat},
    result::Result,
};
use anyhow::{bail, Context};

/// A rectangle of pixels in a pitched buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Region {
    pub width: usize,
    pub height: usize,
    /// Pixels from the start of one row to the next.
    pub pitch: usize,
}

impl Region {
    /// A pitched region.
    pub fn new(width: usize, height: usize, pitch: usize) -> Self {
        Self {
            width,
            height,
            pitch,
        }
    }
    /// A region with rows packed end to end.
    pub fn packed(width: usize, height: usize) -> Self {
        Self::new(width, height, width)
    }
    /// The number of pixels compared.
    pub fn len(&self) -> usize {
        self.width * self.height
    }
    /// No pixels are compared.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn check(&self, name: &str, len: usize) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        if self.pitch < self.width {
            bail!("pitch {} is less than width {}", self.pitch, self.width);
        }
        let required = (self.height - 1) * self.pitch + self.width;
        if len < required {
            bail!("{name} has {len} pixels, region {self:?} needs {required}");
        }
        Ok(())
    }
    fn indices(self) -> impl Iterator<Item = (usize, usize, usize)> {
        (0..self.height).flat_map(move |row| {
            (0..self.width).map(move |col| (row, col, row * self.pitch + col))
        })
    }
}

/// Compares one pixel, logging it per `options`.
pub fn check_result(
    comparison: &Comparison,
    expected: &Pixel,
    observed: &Pixel,
    label: &str,
    (row, col): (usize, usize),
    options: &Options,
) -> bool {
    let correct = comparison.is_equal(expected, observed);
    if options.should_log(correct) {
        let [ex, ey, ez, ew] = expected.to_float4();
        let [ox, oy, oz, ow] = observed.to_float4();
        let status = if correct { "CORRECT" } else { "INCORRECT" };
        let line = format!(
            "{status}: {label} pixel{{{row}, {col}}} expected{{{ex}, {ey}, {ez}, {ew}}} observed{{{ox}, {oy}, {oz}, {ow}}}"
        );
        if correct {
            tracing::info!("{line}");
        } else {
            tracing::warn!("{line}");
        }
    }
    correct
}

fn compare_with<O: PixelFormat>(
    expected_type: crate::pixel::PixelType,
    expected: impl Fn(usize) -> Pixel,
    observed: &[O],
    region: Region,
    label: &str,
    options: &Options,
) -> Result<Evaluation> {
    region
        .check("observed", observed.len())
        .with_context(|| format!("cannot compare {label}"))?;
    let comparison = Comparison::new(expected_type, O::PIXEL_TYPE);
    let mut evaluation = Evaluation::default();
    for (row, col, index) in region.indices() {
        let observed = observed[index].to_pixel();
        if check_result(
            &comparison,
            &expected(index),
            &observed,
            label,
            (row, col),
            options,
        ) {
            evaluation.num_correct += 1;
        } else {
            evaluation.num_errors += 1;
        }
    }
    if options.log_verbose {
        tracing::info!(
            "{label}: Correct pixels={}; Incorrect pixels={}",
            evaluation.num_correct,
            evaluation.num_errors
        );
    }
    if evaluation.num_errors > 0 {
        evaluation
            .messages
            .push(format!("{label}: {} incorrect pixels", evaluation.num_errors));
    } else if evaluation.num_correct == 0 {
        evaluation
            .messages
            .push(format!("{label}: no pixels compared"));
    }
    Ok(evaluation)
}

/** Compares `observed` against `expected` over `region`.

**errors**
Either slice is too short for `region`, or `pitch < width`. */
pub fn compare_region<E: PixelFormat, O: PixelFormat>(
    expected: &[E],
    observed: &[O],
    region: Region,
    label: &str,
    options: &Options,
) -> Result<Evaluation> {
    region
        .check("expected", expected.len())
        .with_context(|| format!("cannot compare {label}"))?;
    compare_with(
        E::PIXEL_TYPE,
        |index| expected[index].to_pixel(),
        observed,
        region,
        label,
        options,
    )
}

/// Compares every pixel of `observed` in `region` against one `expected`
/// pixel.
pub fn compare_region_uniform<O: PixelFormat>(
    expected: Pixel,
    observed: &[O],
    region: Region,
    label: &str,
    options: &Options,
) -> Result<Evaluation> {
    compare_with(
        expected.pixel_type(),
        |_| expected,
        observed,
        region,
        label,
        options,
    )
}

/// Maps both buffers and compares them.
///
/// **errors**
/// Either buffer cannot be mapped as `E` / `O`, see [`compare_region`].
pub fn compare_mapped_region<E: PixelFormat, O: PixelFormat>(
    expected: &Buffer,
    observed: &Buffer,
    region: Region,
    label: &str,
    options: &Options,
) -> Result<Evaluation> {
    let expected = expected.map::<E>()?;
    let observed = observed.map::<O>()?;
    compare_region(&expected, &observed, region, label, options)
}

/// Whether every pixel in `region` is correct, see [`compare_region`].
pub fn check_results<E: PixelFormat, O: PixelFormat>(
    expected: &[E],
    observed: &[O],
    region: Region,
    label: &str,
    options: &Options,
) -> Result<bool> {
    Ok(compare_region(expected, observed, region, label, options)?.passed())
}

/// See [`compare_region_uniform`].
pub fn check_results_uniform<O: PixelFormat>(
    expected: Pixel,
    observed: &[O],
    region: Region,
    label: &str,
    options: &Options,
) -> Result<bool> {
    Ok(compare_region_uniform(expected, observed, region, label, options)?.passed())
}

/// See [`compare_mapped_region`].
pub fn check_mapped_results<E: PixelFormat, O: PixelFormat>(
    expected: &Buffer,
    observed: &Buffer,
    region: Region,
    label: &str,
    options: &Options,
) -> Result<bool> {
    Ok(compare_mapped_region::<E, O>(expected, observed, region, label, options)?.passed())
}
