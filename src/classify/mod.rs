//! External bird-sound classifier integration.
//!
//! The classifier is a black-box command-line tool: a wave file goes in,
//! a results CSV comes out. Everything here is per-invocation; worker
//! orchestration lives in the pipeline module.

mod command;
mod parser;
mod runner;

pub use command::{OutputPlan, TemplateParams, build_classifier_command, resolve_output_paths};
pub use parser::{Prediction, extract_predictions};
pub use runner::{RunOutcome, run_command};

use std::path::Path;

use crate::constants::CLASSIFIER_TIMEOUT;
use crate::error::{Error, Result};

/// One classifier invocation, start to finish.
#[derive(Debug)]
pub struct ClassifierRequest<'a> {
    /// Command template with `{input}`/`{output}` placeholders.
    pub template: &'a str,
    /// Working directory for the child, empty for inherited.
    pub workdir: &'a str,
    /// Segment to analyze.
    pub input: &'a Path,
    /// Output file or directory target.
    pub output_target: &'a Path,
    /// Confidence floor passed to the classifier.
    pub min_confidence: f64,
    /// Segment length in seconds.
    pub segment_seconds: f64,
    /// Latitude (-1 = unset).
    pub latitude: f64,
    /// Longitude (-1 = unset).
    pub longitude: f64,
    /// Effective detection-calendar week.
    pub week: i64,
}

/// Run the classifier on one segment and parse its output.
///
/// The per-invocation output file (and subdirectory, when one was created)
/// is removed before returning, regardless of outcome. A missing output
/// CSV with a clean exit means "no detections".
pub fn run_classifier(request: &ClassifierRequest<'_>) -> Result<Vec<Prediction>> {
    let plan = resolve_output_paths(request.output_target, request.input)?;
    let argv = build_classifier_command(
        request.template,
        &TemplateParams {
            input: request.input,
            output: &plan.output_arg,
            min_confidence: request.min_confidence,
            segment_seconds: request.segment_seconds,
            latitude: request.latitude,
            longitude: request.longitude,
            week: request.week,
        },
    )?;

    let workdir = if request.workdir.is_empty() {
        None
    } else {
        Some(Path::new(request.workdir))
    };
    let outcome = run_command(&argv, workdir, CLASSIFIER_TIMEOUT);

    let result = match outcome {
        RunOutcome::NotFound => Err(Error::Classifier {
            message: "BirdNET command not found. Set BIRDNET_TEMPLATE.".to_string(),
        }),
        RunOutcome::TimedOut => Err(Error::Classifier {
            message: "BirdNET timed out.".to_string(),
        }),
        RunOutcome::Completed { success: false, stderr } => {
            let trimmed = stderr.trim();
            Err(Error::Classifier {
                message: if trimmed.is_empty() {
                    "BirdNET failed.".to_string()
                } else {
                    trimmed.to_string()
                },
            })
        }
        RunOutcome::Completed { success: true, .. } => {
            if plan.expected_csv.exists() {
                extract_predictions(&plan.expected_csv)
            } else {
                Ok(Vec::new())
            }
        }
    };

    let _ = std::fs::remove_file(&plan.expected_csv);
    if let Some(run_dir) = &plan.run_dir {
        let _ = std::fs::remove_dir_all(run_dir);
    }
    result
}
