//! Classifier command construction from the configured template.

use std::path::{Path, PathBuf};

use crate::constants::CLASSIFIER_RESULT_SUFFIX;
use crate::error::{Error, Result};

/// Values substituted into the classifier template.
#[derive(Debug, Clone, Copy)]
pub struct TemplateParams<'a> {
    /// Segment file handed to the classifier.
    pub input: &'a Path,
    /// Output file or directory handed to the classifier.
    pub output: &'a Path,
    /// Confidence floor for the invocation.
    pub min_confidence: f64,
    /// Segment length in seconds.
    pub segment_seconds: f64,
    /// Latitude (-1 = unset).
    pub latitude: f64,
    /// Longitude (-1 = unset).
    pub longitude: f64,
    /// Detection-calendar week (-1 = unset).
    pub week: i64,
}

fn quote_path(path: &Path) -> String {
    let text = path.to_string_lossy();
    shlex::try_quote(&text)
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_else(|_| text.into_owned())
}

/// Expand the template and tokenize it into an argv.
///
/// The template must contain `{input}` and `{output}`; path substitutions
/// are shell-quoted before the final string is split with shell rules.
pub fn build_classifier_command(template: &str, params: &TemplateParams<'_>) -> Result<Vec<String>> {
    if !template.contains("{input}") || !template.contains("{output}") {
        return Err(Error::Template {
            message: "BIRDNET_TEMPLATE must include {input} and {output}.".to_string(),
        });
    }
    let expanded = template
        .replace("{input}", &quote_path(params.input))
        .replace("{output}", &quote_path(params.output))
        .replace("{min_conf}", &params.min_confidence.to_string())
        .replace("{segment_seconds}", &params.segment_seconds.to_string())
        .replace("{segment}", &params.segment_seconds.to_string())
        .replace("{latitude}", &params.latitude.to_string())
        .replace("{lat}", &params.latitude.to_string())
        .replace("{longitude}", &params.longitude.to_string())
        .replace("{lon}", &params.longitude.to_string())
        .replace("{week}", &params.week.to_string());

    let argv = shlex::split(&expanded).ok_or_else(|| Error::Template {
        message: "BIRDNET_TEMPLATE could not be tokenized.".to_string(),
    })?;
    if argv.is_empty() {
        return Err(Error::Template {
            message: "BIRDNET_TEMPLATE is empty.".to_string(),
        });
    }
    Ok(argv)
}

/// Where a classifier invocation writes, and where to find the result.
#[derive(Debug)]
pub struct OutputPlan {
    /// Path substituted for `{output}`.
    pub output_arg: PathBuf,
    /// CSV file expected after the run.
    pub expected_csv: PathBuf,
    /// Per-invocation subdirectory to remove afterwards, when one was made.
    pub run_dir: Option<PathBuf>,
}

/// Resolve the output location for one invocation.
///
/// A `.csv` target is used directly. Anything else is treated as a
/// directory and gets a fresh uniquely-named subdirectory so concurrent
/// invocations cannot collide.
pub fn resolve_output_paths(output_target: &Path, input: &Path) -> Result<OutputPlan> {
    let is_csv = output_target
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        return Ok(OutputPlan {
            output_arg: output_target.to_path_buf(),
            expected_csv: output_target.to_path_buf(),
            run_dir: None,
        });
    }
    std::fs::create_dir_all(output_target)?;
    let run_dir = output_target.join(format!("birdnet_{}", uuid::Uuid::new_v4().simple()));
    std::fs::create_dir_all(&run_dir)?;
    let stem = input
        .file_stem()
        .map_or_else(|| "segment".to_string(), |s| s.to_string_lossy().into_owned());
    let expected_csv = run_dir.join(format!("{stem}{CLASSIFIER_RESULT_SUFFIX}"));
    Ok(OutputPlan {
        output_arg: run_dir.clone(),
        expected_csv,
        run_dir: Some(run_dir),
    })
}
