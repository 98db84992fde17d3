pub mod backend;
pub mod codec;
pub mod device_map;
pub mod dispatch;
pub mod error;
pub mod hosted;
pub mod loader;
mod loader_factory;
pub mod local;
pub mod styles;
mod util;

mod flux;
mod stable_diffusion;

pub use backend::{Backend, BackendStatus, EditJob};
pub use device_map::*;
pub use dispatch::{Dispatcher, GenerationRequest, GenerationResult};
pub use error::GenerateError;
pub use flux::{FluxInpaintModel, FluxLoader};
pub use loader::*;
pub use loader_factory::*;
pub use stable_diffusion::{StableDiffusionInpaintModel, StableDiffusionLoader};
pub use util::*;

use candle_core::Device;
use image::DynamicImage;

/// One inpainting run, already decoded and sized for the pipeline.
#[derive(Debug, Clone)]
pub struct InpaintRequest {
    pub image: DynamicImage,
    /// White where the image should be repainted.
    pub mask: DynamicImage,
    pub prompt: String,
    pub negative_prompt: String,
    pub width: usize,
    pub height: usize,
    pub steps: usize,
    pub guidance: f64,
    pub seed: u64,
}

/// An in-process pipeline with its weights already loaded.
pub trait ModelLike: Send + Sync {
    fn run(&self, request: &InpaintRequest) -> anyhow::Result<DynamicImage>;

    fn device(&self) -> &Device;

    /// Hub repository the weights came from.
    fn repo(&self) -> &str;
}
