//! Built-in model catalogs for each provider.
//!
//! Model ids are unique across providers so the registry can map a model
//! straight to its owner.

use std::time::Duration;

use imagegen_core::generation::ParamBounds;
use serde::Serialize;

/// Default maximum wait for an asynchronous prediction.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);

/// A model offered by a provider, with its accepted ranges.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelSpec {
    /// Public model id used in requests.
    pub id: String,
    pub name: String,
    pub description: String,
    /// Identifier the provider's API expects (model path or version hash).
    pub handle: String,
    pub max_width: i32,
    pub max_height: i32,
    pub max_steps: i32,
    pub supports_negative_prompt: bool,
    /// Rough seconds for one 1024x1024 image at default steps.
    pub estimated_time_secs: f64,
    /// USD per image, when the provider publishes one.
    pub cost_per_image: Option<f64>,
    /// Upper bound on polling an asynchronous job.
    #[serde(skip)]
    pub max_wait: Duration,
}

impl ModelSpec {
    pub fn bounds(&self) -> ParamBounds {
        ParamBounds {
            max_width: self.max_width,
            max_height: self.max_height,
            max_steps: self.max_steps,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn spec(
    id: &str,
    name: &str,
    description: &str,
    handle: &str,
    max_dim: i32,
    max_steps: i32,
    supports_negative_prompt: bool,
    estimated_time_secs: f64,
    cost_per_image: Option<f64>,
    max_wait: Duration,
) -> ModelSpec {
    ModelSpec {
        id: id.into(),
        name: name.into(),
        description: description.into(),
        handle: handle.into(),
        max_width: max_dim,
        max_height: max_dim,
        max_steps,
        supports_negative_prompt,
        estimated_time_secs,
        cost_per_image,
        max_wait,
    }
}

/// SiliconFlow models. The first entry is the provider default.
pub fn siliconflow_models() -> Vec<ModelSpec> {
    vec![
        spec(
            "stabilityai/stable-diffusion-xl-base-1.0",
            "Stable Diffusion XL",
            "High quality general-purpose image model",
            "stabilityai/stable-diffusion-xl-base-1.0",
            2048,
            100,
            true,
            15.0,
            None,
            DEFAULT_MAX_WAIT,
        ),
        spec(
            "black-forest-labs/FLUX.1-schnell",
            "FLUX.1 schnell",
            "Fast FLUX model",
            "black-forest-labs/FLUX.1-schnell",
            2048,
            50,
            false,
            20.0,
            None,
            DEFAULT_MAX_WAIT,
        ),
        spec(
            "stabilityai/stable-diffusion-2-1",
            "Stable Diffusion 2.1",
            "Classic Stable Diffusion model",
            "stabilityai/stable-diffusion-2-1",
            1024,
            100,
            true,
            12.0,
            None,
            DEFAULT_MAX_WAIT,
        ),
    ]
}

/// Replicate models. The first entry is the provider default.
pub fn replicate_models() -> Vec<ModelSpec> {
    vec![
        spec(
            "replicate-flux-schnell",
            "FLUX schnell (Replicate)",
            "Fastest FLUX model, four steps",
            "black-forest-labs/flux-schnell",
            2048,
            4,
            false,
            15.0,
            Some(0.003),
            Duration::from_secs(120),
        ),
        spec(
            "replicate-flux",
            "FLUX dev (Replicate)",
            "Higher quality FLUX model",
            "8beff3369e81422112d93b89ca01426147de542cd4684c244b673b105188fe5f",
            2048,
            50,
            false,
            30.0,
            Some(0.055),
            DEFAULT_MAX_WAIT,
        ),
        spec(
            "replicate-sdxl",
            "SDXL (Replicate)",
            "Stable Diffusion XL with negative prompt support",
            "39ed52f2a78e934b3ba6e2a89f5b1c712de7dfea535525255b1aa35c5565e08b",
            2048,
            100,
            true,
            25.0,
            Some(0.0025),
            DEFAULT_MAX_WAIT,
        ),
        spec(
            "replicate-playground",
            "Playground v2.5 (Replicate)",
            "Aesthetic-tuned SDXL derivative",
            "playgroundai/playground-v2.5-1024px-aesthetic",
            1024,
            50,
            true,
            20.0,
            Some(0.004),
            DEFAULT_MAX_WAIT,
        ),
    ]
}
