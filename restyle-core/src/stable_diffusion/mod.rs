//! Stable Diffusion 1.5 inpainting, the older of the two local pipelines.

use anyhow::{Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, schedulers::Scheduler, unet_2d::UNet2DConditionModel,
    vae::AutoEncoderKL, StableDiffusionConfig,
};
use hf_hub::api::tokio::Api;
use image::DynamicImage;
use tokenizers::Tokenizer;

use crate::{
    image_to_tensor, mask_to_tensor, seed_device, select_best_device, tensor_to_image, DeviceMap,
    InpaintRequest, Loader, ModelLike,
};

pub const INPAINT_REPO: &str = "stable-diffusion-v1-5/stable-diffusion-inpainting";
const TOKENIZER_REPO: &str = "openai/clip-vit-base-patch32";
const VAE_SCALE: f64 = 0.18215;
// latents + mask + masked-image latents
const UNET_IN_CHANNELS: usize = 9;

pub struct StableDiffusionInpaintModel {
    device: Device,
    dtype: DType,
    text_model: ClipTextTransformer,
    tokenizer: Tokenizer,
    pad_id: u32,
    max_tokens: usize,
    vae: AutoEncoderKL,
    unet: UNet2DConditionModel,
}

impl StableDiffusionInpaintModel {
    fn embed(&self, prompt: &str) -> Result<Tensor> {
        let mut tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        tokens.truncate(self.max_tokens);
        tokens.resize(self.max_tokens, self.pad_id);
        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(self.text_model.forward(&tokens)?)
    }
}

impl ModelLike for StableDiffusionInpaintModel {
    fn run(&self, request: &InpaintRequest) -> Result<DynamicImage> {
        let (width, height) = (request.width, request.height);
        seed_device(&self.device, request.seed)?;

        let config = StableDiffusionConfig::v1_5(None, Some(height), Some(width));
        let mut scheduler = config.build_scheduler(request.steps)?;

        let cond = self.embed(&request.prompt)?;
        let uncond = self.embed(&request.negative_prompt)?;
        let text_embeddings = Tensor::cat(&[uncond, cond], 0)?.to_dtype(self.dtype)?;

        // --- Conditioning: downsampled mask and latents of the image with the mask cut out ---
        let (latent_h, latent_w) = (height / 8, width / 8);
        let source = image_to_tensor(&request.image, &self.device, self.dtype)?;
        let pixel_mask = mask_to_tensor(&request.mask, height, width, &self.device, self.dtype)?;
        let masked_source = source.broadcast_mul(&pixel_mask.affine(-1., 1.)?)?;
        let masked_latents = (self.vae.encode(&masked_source)?.sample()? * VAE_SCALE)?;
        let mask = mask_to_tensor(&request.mask, latent_h, latent_w, &self.device, self.dtype)?;
        let mask = Tensor::cat(&[&mask, &mask], 0)?;
        let masked_latents = Tensor::cat(&[&masked_latents, &masked_latents], 0)?;

        let mut latents = (Tensor::randn(0f32, 1f32, (1, 4, latent_h, latent_w), &self.device)?
            * scheduler.init_noise_sigma())?
        .to_dtype(self.dtype)?;

        let timesteps = scheduler.timesteps().to_vec();
        for (index, &timestep) in timesteps.iter().enumerate() {
            let latent_input = Tensor::cat(&[&latents, &latents], 0)?;
            let latent_input = scheduler.scale_model_input(latent_input, timestep)?;
            let latent_input = Tensor::cat(&[&latent_input, &mask, &masked_latents], 1)?;

            let noise_pred = self
                .unet
                .forward(&latent_input, timestep as f64, &text_embeddings)?;
            let chunks = noise_pred.chunk(2, 0)?;
            let (pred_uncond, pred_text) = (&chunks[0], &chunks[1]);
            let noise_pred = (pred_uncond + ((pred_text - pred_uncond)? * request.guidance)?)?;

            latents = scheduler.step(&noise_pred, timestep, &latents)?;
            tracing::trace!(step = index + 1, of = timesteps.len(), "denoising");
        }
        tracing::debug!(steps = request.steps, "denoised latent image");

        let decoded = self.vae.decode(&(&latents / VAE_SCALE)?)?;
        let img = ((decoded / 2.)? + 0.5)?
            .clamp(0f32, 1f32)?
            .to_dtype(DType::F32)?;
        let img = (img * 255.)?.to_dtype(DType::U8)?;
        tensor_to_image(&img.i(0)?)
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn repo(&self) -> &str {
        INPAINT_REPO
    }
}

pub struct StableDiffusionLoader;

impl Loader for StableDiffusionLoader {
    type Model = StableDiffusionInpaintModel;

    async fn load(api: Api, device_map: DeviceMap) -> Result<Self::Model> {
        let device = select_best_device(device_map).context("failed to set up device")?;
        let dtype = if device.is_cpu() { DType::F32 } else { DType::F16 };
        // Only the architecture matters here, image size is chosen per run.
        let config = StableDiffusionConfig::v1_5(None, None, None);

        let repo = api.repo(hf_hub::Repo::model(INPAINT_REPO.to_string()));

        tracing::info!("loading CLIP text encoder");
        let clip_file = repo
            .get("text_encoder/model.safetensors")
            .await
            .context("failed to get text encoder weights")?;
        let text_model =
            stable_diffusion::build_clip_transformer(&config.clip, clip_file, &device, DType::F32)
                .context("failed to load text encoder")?;
        let tokenizer_file = api
            .model(TOKENIZER_REPO.to_string())
            .get("tokenizer.json")
            .await
            .context("failed to get CLIP tokenizer")?;
        let tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(Error::msg)
            .context("failed to load CLIP tokenizer")?;
        let pad_token = config.clip.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = tokenizer
            .token_to_id(pad_token)
            .with_context(|| format!("tokenizer has no `{pad_token}` token"))?;

        tracing::info!(repo = INPAINT_REPO, "loading vae and unet");
        let vae_file = repo
            .get("vae/diffusion_pytorch_model.safetensors")
            .await
            .context("failed to get vae weights")?;
        let vae = config
            .build_vae(vae_file, &device, dtype)
            .context("failed to load vae")?;
        let unet_file = repo
            .get("unet/diffusion_pytorch_model.safetensors")
            .await
            .context("failed to get unet weights")?;
        let unet = config
            .build_unet(unet_file, &device, UNET_IN_CHANNELS, false, dtype)
            .context("failed to load unet")?;

        Ok(StableDiffusionInpaintModel {
            device,
            dtype,
            text_model,
            tokenizer,
            pad_id,
            max_tokens: config.clip.max_position_embeddings,
            vae,
            unet,
        })
    }
}
