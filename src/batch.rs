//! Multi-input export with failure accumulation.
//!
//! Inputs are exported one after another, each in its own session. A failing
//! input is recorded against its original token and never stops the rest.

use std::fmt;

use crate::channel::ChannelLauncher;
use crate::exporter::{ExportArtifact, FailurePolicy};
use crate::session::ExportSession;
use crate::types::{ExportOptions, OptionsError};

const CATEGORY: &str = "batch";

/// An input (or one of its entries) that produced no artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    /// The path or URL exactly as given.
    pub input: String,
    pub message: String,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to export \"{}\": {}", self.input, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Artifacts of every input, in input order.
    pub outputs: Vec<ExportArtifact>,
    pub failures: Vec<BatchFailure>,
    pub total: usize,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Inputs that produced no failure.
    pub fn succeeded(&self) -> usize {
        let mut failed: Vec<&str> = self.failures.iter().map(|f| f.input.as_str()).collect();
        failed.sort_unstable();
        failed.dedup();
        self.total.saturating_sub(failed.len())
    }

    pub fn summary(&self) -> String {
        format!(
            "{} of {} sketches exported successfully",
            self.succeeded(),
            self.total
        )
    }
}

/// Export every input with shared options.
///
/// Option combinations are checked once up front so an invalid call fails
/// before any session starts. With more than one input, an explicit name
/// becomes `{name}-{index}` (0-based) so outputs do not overwrite each other.
pub async fn export_batch<L: ChannelLauncher>(
    session: &ExportSession<L>,
    inputs: &[String],
    options: &ExportOptions,
) -> Result<BatchReport, OptionsError> {
    options.output_mode()?;
    let logger = session.logger();
    let mut report = BatchReport {
        total: inputs.len(),
        ..BatchReport::default()
    };

    for (index, input) in inputs.iter().enumerate() {
        let mut input_options = options.clone();
        if inputs.len() > 1 {
            if let Some(name) = &options.name {
                input_options.name = Some(format!("{name}-{index}"));
            }
        }

        logger.info(format!("Exporting {input}"), Some(CATEGORY));
        match session
            .export_with_policy(input, &input_options, FailurePolicy::Collect)
            .await
        {
            Ok(export) => {
                report.outputs.extend(export.artifacts);
                for failure in export.failures {
                    report.failures.push(BatchFailure {
                        input: input.clone(),
                        message: failure.error.to_string(),
                    });
                }
            }
            Err(err) => report.failures.push(BatchFailure {
                input: input.clone(),
                message: err.to_string(),
            }),
        }
    }

    for failure in &report.failures {
        logger.error(failure.to_string(), Some(CATEGORY));
    }
    if inputs.len() > 1 {
        let summary = report.summary();
        if report.is_success() {
            logger.info(summary, Some(CATEGORY));
        } else {
            logger.warn(summary, Some(CATEGORY));
        }
    }

    Ok(report)
}
