//! Reconstruction parameter bundle submitted alongside an upload.
//!
//! Values arrive as loosely-typed form fields; [`JobParams::from_raw`]
//! applies defaults and clamps every value into its accepted range so the
//! backends only ever see sane numbers.

use serde::Serialize;

use crate::error::CoreError;

/// Default number of training iterations.
pub const DEFAULT_ITERATIONS: u32 = 10_000;

/// Default (and maximum) keep percentage for the frame filters.
pub const DEFAULT_KEEP_PERCENT: u8 = 100;

/// Lower bound for every keep percentage.
pub const MIN_KEEP_PERCENT: u8 = 1;

/// Upper bound for every keep percentage.
pub const MAX_KEEP_PERCENT: u8 = 100;

/// Form field values as received, before defaults and clamping.
///
/// `None` and blank strings both mean "use the default".
#[derive(Debug, Clone, Default)]
pub struct RawJobParams {
    pub iterations: Option<String>,
    pub keep_pre: Option<String>,
    pub keep_post: Option<String>,
    pub keep_train_images: Option<String>,
}

/// Validated, clamped parameters for one reconstruction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobParams {
    /// Training iterations, at least 1.
    pub iterations: u32,
    /// Percentage of frames kept by the pre-reconstruction filter.
    pub keep_pre: u8,
    /// Percentage of frames kept by the post-reconstruction filter.
    pub keep_post: u8,
    /// Percentage of registered images kept for training.
    pub keep_train_images: u8,
}

impl Default for JobParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            keep_pre: DEFAULT_KEEP_PERCENT,
            keep_post: DEFAULT_KEEP_PERCENT,
            keep_train_images: DEFAULT_KEEP_PERCENT,
        }
    }
}

impl JobParams {
    /// Apply defaults and clamp raw form values.
    ///
    /// Out-of-range numbers are clamped rather than rejected. Only values
    /// that are not integers at all produce a validation error.
    pub fn from_raw(raw: &RawJobParams) -> Result<Self, CoreError> {
        let iterations = parse_field("iterations", raw.iterations.as_deref())?
            .map_or(DEFAULT_ITERATIONS, clamp_iterations);

        Ok(Self {
            iterations,
            keep_pre: keep_percent("keep_pre", raw.keep_pre.as_deref())?,
            keep_post: keep_percent("keep_post", raw.keep_post.as_deref())?,
            keep_train_images: keep_percent(
                "keep_train_images",
                raw.keep_train_images.as_deref(),
            )?,
        })
    }

    /// Positional arguments handed to the job scripts, in contract order:
    /// `keep_pre keep_post keep_train_images iterations`.
    pub fn positional_args(&self) -> [String; 4] {
        [
            self.keep_pre.to_string(),
            self.keep_post.to_string(),
            self.keep_train_images.to_string(),
            self.iterations.to_string(),
        ]
    }
}

fn parse_field(name: &str, value: Option<&str>) -> Result<Option<i64>, CoreError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => text.parse::<i64>().map(Some).map_err(|_| {
            CoreError::Validation(format!("'{name}' must be an integer, got '{text}'"))
        }),
    }
}

fn keep_percent(name: &str, value: Option<&str>) -> Result<u8, CoreError> {
    Ok(parse_field(name, value)?.map_or(DEFAULT_KEEP_PERCENT, clamp_keep))
}

fn clamp_keep(value: i64) -> u8 {
    // Clamped into 1..=100, so the narrowing cast cannot truncate.
    value.clamp(i64::from(MIN_KEEP_PERCENT), i64::from(MAX_KEEP_PERCENT)) as u8
}

fn clamp_iterations(value: i64) -> u32 {
    value.clamp(1, i64::from(u32::MAX)) as u32
}
