//! FLUX.1-dev inpainting.
//!
//! The masked region is denoised from scratch while everything outside the mask is pulled back
//! onto the noised original latent after every step, so only the painted area changes.

use anyhow::{anyhow, Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::Module;
use candle_transformers::models::{
    clip::text_model::{Activation, ClipTextConfig, ClipTextTransformer},
    flux::{
        autoencoder::{self, AutoEncoder},
        model::{self, Flux},
        sampling, WithForward,
    },
    t5::{self, T5EncoderModel},
};
use hf_hub::api::tokio::Api;
use image::DynamicImage;
use std::{path::PathBuf, sync::Mutex};
use tokenizers::Tokenizer;

use crate::{
    image_to_tensor, mask_to_tensor, seed_device, select_best_device, tensor_to_image, DeviceMap,
    InpaintRequest, Loader, ModelLike,
};

pub const FLUX_REPO: &str = "black-forest-labs/FLUX.1-dev";
const T5_TOKENS: usize = 256;

pub struct FluxInpaintModel {
    device: Device,
    dtype: DType,
    t5_model: Mutex<T5EncoderModel>,
    t5_tokenizer: Tokenizer,
    clip_model: ClipTextTransformer,
    clip_tokenizer: Tokenizer,
    autoencoder: AutoEncoder,
    flux_model: Flux,
}

/// (b, c, h, w) latents to the (b, h/2 * w/2, c * 4) token layout the transformer works on.
fn pack(xs: &Tensor) -> candle_core::Result<Tensor> {
    let (b, c, h, w) = xs.dims4()?;
    xs.reshape((b, c, h / 2, 2, w / 2, 2))?
        .permute((0, 2, 4, 1, 3, 5))?
        .reshape((b, h / 2 * w / 2, c * 4))
}

impl FluxInpaintModel {
    fn encode_prompt(&self, prompt: &str) -> Result<(Tensor, Tensor)> {
        let mut t5_tokens = self
            .t5_tokenizer
            .encode(prompt, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        t5_tokens.resize(T5_TOKENS, 0);
        let t5_ids = Tensor::new(&*t5_tokens, &self.device)?.unsqueeze(0)?;
        let t5_emb = self
            .t5_model
            .lock()
            .map_err(|_| anyhow!("T5 encoder lock poisoned"))?
            .forward(&t5_ids)?;

        let clip_tokens = self
            .clip_tokenizer
            .encode(prompt, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        let clip_ids = Tensor::new(&*clip_tokens, &self.device)?.unsqueeze(0)?;
        let clip_emb = self.clip_model.forward(&clip_ids)?;

        Ok((t5_emb, clip_emb))
    }
}

impl ModelLike for FluxInpaintModel {
    fn run(&self, request: &InpaintRequest) -> Result<DynamicImage> {
        let (width, height) = (request.width, request.height);
        seed_device(&self.device, request.seed)?;

        let noise_img =
            sampling::get_noise(1, height, width, &self.device)?.to_dtype(self.dtype)?;
        let (_, _, latent_h, latent_w) = noise_img.dims4()?;

        let (t5_emb, clip_emb) = self.encode_prompt(&request.prompt)?;
        let state = sampling::State::new(&t5_emb, &clip_emb, &noise_img)?;
        let image_seq_len = state.img.dim(1)?;
        let timesteps = sampling::get_schedule(request.steps, Some((image_seq_len, 0.5, 1.15)));

        // --- Encode the source image and mask into the packed latent layout ---
        let source = image_to_tensor(&request.image, &self.device, self.dtype)?;
        let original = pack(&self.autoencoder.encode(&source)?)?;
        let (_, latent_c, _, _) = noise_img.dims4()?;
        let mask = mask_to_tensor(&request.mask, latent_h, latent_w, &self.device, self.dtype)?
            .repeat((1, latent_c, 1, 1))?;
        let mask = pack(&mask)?;
        let keep = mask.affine(-1., 1.)?;

        let noise = state.img.clone();
        let guidance = Tensor::full(request.guidance as f32, 1, &self.device)?;
        let mut img = noise.clone();
        for window in timesteps.windows(2) {
            let (t_curr, t_prev) = match window {
                [a, b] => (*a, *b),
                _ => continue,
            };
            let t_vec = Tensor::full(t_curr as f32, 1, &self.device)?;
            let pred = self.flux_model.forward(
                &img,
                &state.img_ids,
                &state.txt,
                &state.txt_ids,
                &t_vec,
                &state.vec,
                Some(&guidance),
            )?;
            img = (&img + (pred * (t_prev - t_curr))?)?;

            let known = ((&original * (1. - t_prev))? + (&noise * t_prev)?)?;
            img = ((&img * &mask)? + (&known * &keep)?)?;
        }
        tracing::debug!(steps = request.steps, "denoised latent image");

        let unpacked = sampling::unpack(&img, height, width)?;
        let decoded = self.autoencoder.decode(&unpacked)?;

        let img = ((decoded.clamp(-1f32, 1f32)? + 1.0)? * 127.5)?.to_dtype(DType::U8)?;
        tensor_to_image(&img.i(0)?)
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn repo(&self) -> &str {
        FLUX_REPO
    }
}

fn mmap_var_builder(
    file: PathBuf,
    dtype: DType,
    device: &Device,
) -> Result<candle_nn::VarBuilder<'static>> {
    let vb = unsafe { candle_nn::VarBuilder::from_mmaped_safetensors(&[file], dtype, device)? };
    Ok(vb)
}

pub struct FluxLoader;

impl Loader for FluxLoader {
    type Model = FluxInpaintModel;

    async fn load(api: Api, device_map: DeviceMap) -> Result<Self::Model> {
        let device = select_best_device(device_map).context("failed to set up device")?;
        let dtype = device.bf16_default_to_f32();

        // --- T5 ---
        tracing::info!("loading T5 text encoder");
        let t5_repo = api.repo(hf_hub::Repo::with_revision(
            "google/t5-v1_1-xxl".to_string(),
            hf_hub::RepoType::Model,
            "refs/pr/2".to_string(),
        ));
        let t5_model_file = t5_repo
            .get("model.safetensors")
            .await
            .context("failed to get T5 model file")?;
        let t5_vb = mmap_var_builder(t5_model_file, dtype, &device)
            .context("failed to build T5 var builder")?;
        let t5_config_file = t5_repo
            .get("config.json")
            .await
            .context("failed to get T5 config")?;
        let t5_config: t5::Config = serde_json::from_str(
            &std::fs::read_to_string(&t5_config_file).context("failed to read T5 config")?,
        )
        .context("failed to parse T5 config")?;
        let t5_model =
            T5EncoderModel::load(t5_vb, &t5_config).context("failed to load T5 model")?;
        let t5_tokenizer_file = api
            .model("lmz/mt5-tokenizers".to_string())
            .get("t5-v1_1-xxl.tokenizer.json")
            .await
            .context("failed to get T5 tokenizer")?;
        let t5_tokenizer = Tokenizer::from_file(t5_tokenizer_file)
            .map_err(Error::msg)
            .context("failed to load T5 tokenizer")?;

        // --- CLIP ---
        tracing::info!("loading CLIP text encoder");
        let clip_repo = api.repo(hf_hub::Repo::model(
            "openai/clip-vit-large-patch14".to_string(),
        ));
        let clip_model_file = clip_repo
            .get("model.safetensors")
            .await
            .context("failed to get CLIP model file")?;
        let clip_vb = mmap_var_builder(clip_model_file, dtype, &device)
            .context("failed to build CLIP var builder")?;
        let clip_config = ClipTextConfig {
            vocab_size: 49408,
            projection_dim: 768,
            activation: Activation::QuickGelu,
            intermediate_size: 3072,
            embed_dim: 768,
            max_position_embeddings: 77,
            pad_with: None,
            num_hidden_layers: 12,
            num_attention_heads: 12,
        };
        let clip_model = ClipTextTransformer::new(clip_vb.pp("text_model"), &clip_config)
            .context("failed to load CLIP model")?;
        let clip_tokenizer_file = clip_repo
            .get("tokenizer.json")
            .await
            .context("failed to get CLIP tokenizer")?;
        let clip_tokenizer = Tokenizer::from_file(clip_tokenizer_file)
            .map_err(Error::msg)
            .context("failed to load CLIP tokenizer")?;

        // --- Autoencoder + transformer ---
        tracing::info!(repo = FLUX_REPO, "loading flux autoencoder and transformer");
        let bf_repo = api.repo(hf_hub::Repo::model(FLUX_REPO.to_string()));
        let autoencoder_file = bf_repo
            .get("ae.safetensors")
            .await
            .context("failed to get autoencoder model file")?;
        let autoencoder = AutoEncoder::new(
            &autoencoder::Config::dev(),
            mmap_var_builder(autoencoder_file, dtype, &device)
                .context("failed to build autoencoder var builder")?,
        )
        .context("failed to load autoencoder")?;

        let flux_file = bf_repo
            .get("flux1-dev.safetensors")
            .await
            .context("failed to get flux model file")?;
        let flux_model = Flux::new(
            &model::Config::dev(),
            mmap_var_builder(flux_file, dtype, &device)
                .context("failed to build flux var builder")?,
        )
        .context("failed to load flux model")?;

        Ok(FluxInpaintModel {
            device,
            dtype,
            t5_model: Mutex::new(t5_model),
            t5_tokenizer,
            clip_model,
            clip_tokenizer,
            autoencoder,
            flux_model,
        })
    }
}
