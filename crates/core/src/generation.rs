//! Generation request parameters, admission validation, and provider
//! bound clamping.
//!
//! Admission validation rejects requests that cannot be meaningful
//! (empty prompt, bad batch size). Dimension and sampler values that are
//! merely out of a provider's range are clamped later with
//! [`clamp_params`] instead.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Maximum prompt length in characters (after trimming).
pub const MAX_PROMPT_CHARS: usize = 2000;
/// Maximum negative prompt length in characters.
pub const MAX_NEGATIVE_PROMPT_CHARS: usize = 1000;
/// Smallest image edge any provider accepts.
pub const MIN_DIMENSION: i32 = 256;
/// Largest image edge any provider accepts.
pub const MAX_DIMENSION: i32 = 2048;
pub const MIN_STEPS: i32 = 1;
pub const MAX_STEPS: i32 = 100;
pub const MIN_GUIDANCE: f64 = 1.0;
pub const MAX_GUIDANCE: f64 = 20.0;
pub const MIN_BATCH_SIZE: i32 = 1;
pub const MAX_BATCH_SIZE: i32 = 4;
/// Seeds must fit a signed 32-bit integer.
pub const MAX_SEED: i64 = 2_147_483_647;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_DIMENSION: i32 = 1024;
pub const DEFAULT_STEPS: i32 = 20;
pub const DEFAULT_GUIDANCE: f64 = 7.5;
pub const DEFAULT_BATCH_SIZE: i32 = 1;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Sampler and output parameters shared by every provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub width: i32,
    pub height: i32,
    pub steps: i32,
    pub guidance_scale: f64,
    pub seed: Option<i64>,
    pub batch_size: i32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            width: DEFAULT_DIMENSION,
            height: DEFAULT_DIMENSION,
            steps: DEFAULT_STEPS,
            guidance_scale: DEFAULT_GUIDANCE,
            seed: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Per-model upper bounds used when clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamBounds {
    pub max_width: i32,
    pub max_height: i32,
    pub max_steps: i32,
}

impl Default for ParamBounds {
    fn default() -> Self {
        Self {
            max_width: MAX_DIMENSION,
            max_height: MAX_DIMENSION,
            max_steps: MAX_STEPS,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a prompt and return it trimmed.
pub fn validate_prompt(prompt: &str) -> Result<String, CoreError> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("Prompt must not be empty".into()));
    }
    if trimmed.chars().count() > MAX_PROMPT_CHARS {
        return Err(CoreError::Validation(format!(
            "Prompt must be at most {MAX_PROMPT_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Validate an optional negative prompt. Blank values collapse to `None`.
pub fn validate_negative_prompt(negative: Option<&str>) -> Result<Option<String>, CoreError> {
    let Some(trimmed) = negative.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if trimmed.chars().count() > MAX_NEGATIVE_PROMPT_CHARS {
        return Err(CoreError::Validation(format!(
            "Negative prompt must be at most {MAX_NEGATIVE_PROMPT_CHARS} characters"
        )));
    }
    Ok(Some(trimmed.to_string()))
}

/// Reject parameters no provider could honour even after clamping.
pub fn validate_params(params: &GenerationParams) -> Result<(), CoreError> {
    if params.width <= 0 || params.height <= 0 {
        return Err(CoreError::Validation(
            "Width and height must be positive".into(),
        ));
    }
    if params.steps <= 0 {
        return Err(CoreError::Validation("Steps must be positive".into()));
    }
    if !params.guidance_scale.is_finite() {
        return Err(CoreError::Validation(
            "Guidance scale must be a finite number".into(),
        ));
    }
    if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&params.batch_size) {
        return Err(CoreError::Validation(format!(
            "Batch size must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}"
        )));
    }
    if let Some(seed) = params.seed {
        if !(0..=MAX_SEED).contains(&seed) {
            return Err(CoreError::Validation(format!(
                "Seed must be between 0 and {MAX_SEED}"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Clamping
// ---------------------------------------------------------------------------

/// Clamp parameters into a model's accepted range.
pub fn clamp_params(params: &GenerationParams, bounds: &ParamBounds) -> GenerationParams {
    let max_w = bounds.max_width.clamp(MIN_DIMENSION, MAX_DIMENSION);
    let max_h = bounds.max_height.clamp(MIN_DIMENSION, MAX_DIMENSION);
    let max_steps = bounds.max_steps.clamp(MIN_STEPS, MAX_STEPS);

    GenerationParams {
        width: params.width.clamp(MIN_DIMENSION, max_w),
        height: params.height.clamp(MIN_DIMENSION, max_h),
        steps: params.steps.clamp(MIN_STEPS, max_steps),
        guidance_scale: params.guidance_scale.clamp(MIN_GUIDANCE, MAX_GUIDANCE),
        seed: params.seed,
        batch_size: params.batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
