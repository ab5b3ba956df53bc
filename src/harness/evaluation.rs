use serde::Serialize;
use std::ops::{Add, AddAssign};

/** A tally of compared pixels and diagnostics.

Evaluations are combined with `+=` or [`Evaluation::merge`]: counts are
summed, messages are concatenated, and the result is skipped if either side
was. Combining is associative and commutative up to message order. */
#[derive(Clone, Default, Debug, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub num_correct: u64,
    pub num_errors: u64,
    pub skipped: bool,
    pub messages: Vec<String>,
}

impl Evaluation {
    /// An evaluation that was skipped.
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
    /// No counts and one message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
            ..Self::default()
        }
    }
    /// Adds a message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }
    /// Combines `a` and `b`.
    pub fn merge(a: Self, b: Self) -> Self {
        let mut output = a;
        output += b;
        output
    }
    /// Not skipped, at least one correct and no errors.
    ///
    /// Comparing nothing is a failure.
    pub fn passed(&self) -> bool {
        !self.skipped && self.num_errors == 0 && self.num_correct > 0
    }
}

impl AddAssign for Evaluation {
    fn add_assign(&mut self, rhs: Self) {
        self.skipped |= rhs.skipped;
        self.num_correct += rhs.num_correct;
        self.num_errors += rhs.num_errors;
        self.messages.extend(rhs.messages);
    }
}

impl AddAssign<&Evaluation> for Evaluation {
    fn add_assign(&mut self, rhs: &Self) {
        *self += rhs.clone();
    }
}

impl Add for Evaluation {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::merge(self, rhs)
    }
}

impl std::iter::Sum for Evaluation {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Self::merge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(num_correct: u64, num_errors: u64) -> Evaluation {
        Evaluation {
            num_correct,
            num_errors,
            ..Evaluation::default()
        }
    }

    #[test]
    fn merge_sums_and_keeps_messages() {
        let a = counts(3, 1).with_message("a");
        let b = counts(2, 0).with_message("b");
        let c = Evaluation::merge(a, b);
        assert_eq!(c.num_correct, 5);
        assert_eq!(c.num_errors, 1);
        assert_eq!(c.messages, ["a", "b"]);
        assert!(!c.passed());
    }

    #[test]
    fn skipped_is_sticky() {
        let mut e = counts(1, 0);
        assert!(e.passed());
        e += Evaluation::skipped();
        assert!(e.skipped);
        assert!(!e.passed());
    }

    #[test]
    fn nothing_compared_fails() {
        assert!(!Evaluation::default().passed());
        assert!(!Evaluation::message("kernel failed to compile").passed());
    }

    #[test]
    fn sum() {
        let total: Evaluation = (0..4).map(|_| counts(1, 0)).sum();
        assert_eq!(total, counts(4, 0));
    }

    #[test]
    fn serialize() {
        let json = serde_json::to_value(counts(2, 1).with_message("m")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "num_correct": 2,
                "num_errors": 1,
                "skipped": false,
                "messages": ["m"],
            })
        );
    }
}
