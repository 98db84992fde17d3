//! Adapter running an in-process pipeline behind the [`Backend`] interface.

use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage};
use std::sync::Arc;

use crate::{
    backend::{Backend, BackendStatus, EditJob},
    codec,
    device_label,
    error::{GenerateError, Result},
    styles::StyleDefinition,
    InpaintRequest, ModelLike,
};

/// Fixed inference settings for one pipeline. Nothing here is taken from the request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceSettings {
    pub width: u32,
    pub height: u32,
    pub steps: usize,
    pub guidance: f64,
    pub seed: u64,
}

impl InferenceSettings {
    pub const TRANSFORMER: Self = Self {
        width: 1280,
        height: 768,
        steps: 28,
        guidance: 3.5,
        seed: 24,
    };

    pub const LEGACY: Self = Self {
        width: 1280,
        height: 768,
        steps: 30,
        guidance: 7.5,
        seed: 24,
    };
}

pub struct LocalBackend<M> {
    name: &'static str,
    model: Arc<M>,
    settings: InferenceSettings,
}

impl<M: ModelLike + 'static> LocalBackend<M> {
    pub fn new(name: &'static str, model: M, settings: InferenceSettings) -> Self {
        Self {
            name,
            model: Arc::new(model),
            settings,
        }
    }

    /// Decodes image and mask and stretches both to the pipeline's working size.
    fn prepare(&self, job: EditJob) -> Result<InpaintRequest> {
        let resize = |img: DynamicImage| {
            img.resize_exact(self.settings.width, self.settings.height, FilterType::Lanczos3)
        };
        let decode = |value: &str| {
            codec::decode_image(value)
                .map_err(|e| GenerateError::decode(format!("Error processing images: {e}")))
        };

        let mask = job
            .mask
            .as_deref()
            .ok_or_else(|| GenerateError::validation("Missing mask data"))?;
        let image = resize(decode(&job.image)?);
        let mask = resize(decode(mask)?);

        Ok(InpaintRequest {
            image,
            mask,
            prompt: job.prompt,
            negative_prompt: String::new(),
            width: self.settings.width as usize,
            height: self.settings.height as usize,
            steps: self.settings.steps,
            guidance: self.settings.guidance,
            seed: self.settings.seed,
        })
    }
}

#[async_trait]
impl<M: ModelLike + 'static> Backend for LocalBackend<M> {
    fn name(&self) -> &str {
        self.name
    }

    fn requires_mask(&self, _style: Option<&StyleDefinition>) -> bool {
        true
    }

    async fn generate(&self, job: EditJob) -> Result<String> {
        let request = self.prepare(job)?;
        tracing::info!(backend = self.name, prompt = %request.prompt, "generating image");

        let model = self.model.clone();
        let image = tokio::task::spawn_blocking(move || model.run(&request))
            .await
            .map_err(|e| GenerateError::backend(format!("Error generating image: {e}")))?
            .map_err(|e| {
                tracing::error!(backend = self.name, "generation failed: {e:?}");
                GenerateError::backend(format!("Error generating image: {e}"))
            })?;

        let uri = codec::encode_png_data_uri(&image)
            .map_err(|e| GenerateError::backend(format!("Error encoding image: {e}")))?;
        tracing::info!(backend = self.name, "successfully generated image");
        Ok(uri)
    }

    async fn status(&self) -> Result<BackendStatus> {
        Ok(BackendStatus::ok()
            .with_device(device_label(self.model.device()))
            .with_model(self.model.repo()))
    }
}
