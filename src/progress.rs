//! Progress stream emitted while a graph is compiled.

use serde::Serialize;

/// Named pipeline steps and their completion percentage
pub const EXTRACT: (&str, u8) = ("extract", 10);
pub const GENERATE: (&str, u8) = ("generate", 40);
pub const VERIFY: (&str, u8) = ("verify", 70);
pub const COMPANION_FILES: (&str, u8) = ("companion_files", 90);
pub const COMPLETE: (&str, u8) = ("complete", 100);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressStep {
    pub step: String,
    pub percent: u8,
    pub message: String,
}

impl ProgressStep {
    pub fn new(step: (&str, u8), message: impl Into<String>) -> Self {
        Self {
            step: step.0.to_string(),
            percent: step.1,
            message: message.into(),
        }
    }
}

/// Receives progress steps as they happen
pub trait ProgressReporter: Send {
    fn report(&mut self, step: ProgressStep);
}

/// Collects every step
impl ProgressReporter for Vec<ProgressStep> {
    fn report(&mut self, step: ProgressStep) {
        self.push(step);
    }
}

/// Writes each step to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&mut self, step: ProgressStep) {
        tracing::info!("[AGC] {:>3}% {}: {}", step.percent, step.step, step.message);
    }
}

/// Forwards to two reporters
pub struct Tee<'a, A: ?Sized, B: ?Sized> {
    pub first: &'a mut A,
    pub second: &'a mut B,
}

impl<A: ProgressReporter + ?Sized, B: ProgressReporter + ?Sized> ProgressReporter for Tee<'_, A, B> {
    fn report(&mut self, step: ProgressStep) {
        self.first.report(step.clone());
        self.second.report(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tee_forwards_to_both() {
        let mut first: Vec<ProgressStep> = Vec::new();
        let mut second: Vec<ProgressStep> = Vec::new();
        Tee {
            first: &mut first,
            second: &mut second,
        }
        .report(ProgressStep::new(EXTRACT, "Extracting"));
        assert_eq!(first, second);
        assert_eq!(first[0].percent, 10);
        assert_eq!(first[0].step, "extract");
    }
}
