//! Line ending normalization for descriptor maps written on other platforms.

use std::io::{self, Read};

/// Reads from `R`, converting `\r\n` and lone `\r` to `\n`.
///
/// A `\r` is emitted as `\n` immediately, and a `\n` directly following it is
/// dropped, even if it arrives in a later read.
#[derive(Debug)]
pub struct CrlfFilter<R> {
    inner: R,
    skip_lf: bool,
}

impl<R: Read> CrlfFilter<R> {
    /// Wraps `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            skip_lf: false,
        }
    }
    /// Returns the inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CrlfFilter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let n = self.inner.read(buf)?;
            if n == 0 {
                return Ok(0);
            }
            let mut out = 0;
            for i in 0..n {
                let byte = buf[i];
                let skip_lf = std::mem::replace(&mut self.skip_lf, false);
                match byte {
                    b'\r' => {
                        buf[out] = b'\n';
                        out += 1;
                        self.skip_lf = true;
                    }
                    b'\n' if skip_lf => (),
                    _ => {
                        buf[out] = byte;
                        out += 1;
                    }
                }
            }
            // only a dropped '\n' was read
            if out > 0 {
                return Ok(out);
            }
        }
    }
}
