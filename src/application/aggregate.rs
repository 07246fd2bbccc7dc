//! Per-preset failure aggregation for fan-out operations.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetFailure {
    pub preset: String,
    pub message: String,
}

/// Which fan-out produced an [`AggregateError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    Materialize,
    Invalidate,
}

impl FanOut {
    pub fn as_str(self) -> &'static str {
        match self {
            FanOut::Materialize => "materialize",
            FanOut::Invalidate => "invalidate",
        }
    }
}

/// Union of every branch failure of one materialize or invalidate call.
///
/// Renders as one `Err: <preset>: <message>` line per failure, in preset
/// order, which is also the body of the HTTP 500 response.
#[derive(Debug, Clone)]
pub struct AggregateError {
    pub fan_out: FanOut,
    failures: Vec<PresetFailure>,
}

impl AggregateError {
    pub fn failures(&self) -> &[PresetFailure] {
        &self.failures
    }

    pub fn presets(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|failure| failure.preset.as_str())
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, failure) in self.failures.iter().enumerate() {
            if index > 0 {
                f.write_str("\n")?;
            }
            write!(f, "Err: {}: {}", failure.preset, failure.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// Collects branch failures while joining a fan-out.
#[derive(Debug)]
pub(crate) struct FailureCollector {
    fan_out: FanOut,
    failures: Vec<PresetFailure>,
}

impl FailureCollector {
    pub(crate) fn new(fan_out: FanOut) -> Self {
        Self {
            fan_out,
            failures: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, preset: impl Into<String>, message: impl Into<String>) {
        self.failures.push(PresetFailure {
            preset: preset.into(),
            message: message.into(),
        });
    }

    pub(crate) fn finish(self) -> Result<(), AggregateError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(AggregateError {
                fan_out: self.fan_out,
                failures: self.failures,
            })
        }
    }
}
