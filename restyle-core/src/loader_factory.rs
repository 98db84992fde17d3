use anyhow::{Context, Result};
use hf_hub::api::tokio::Api;
use std::{fmt, str::FromStr, sync::Arc};

use crate::{
    hosted::{self, FalBackend},
    local::{InferenceSettings, LocalBackend},
    Backend, DeviceMap, FluxLoader, Loader, StableDiffusionLoader,
};

/// The generation backends a process can be started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// fal.ai, model chosen per style.
    Hosted,
    /// FLUX.1-dev inpainting, in process.
    Flux,
    /// Stable Diffusion 1.5 inpainting, in process.
    Legacy,
}

impl BackendKind {
    /// Detect the backend from a user-supplied name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "hosted" | "fal" | "api" => Some(BackendKind::Hosted),
            "flux" | "transformer" => Some(BackendKind::Flux),
            "legacy" | "sd" | "stable-diffusion" => Some(BackendKind::Legacy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Hosted => "hosted",
            BackendKind::Flux => "flux",
            BackendKind::Legacy => "legacy",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| {
            format!("unsupported backend `{s}`, expected one of: hosted, flux, legacy")
        })
    }
}

/// Startup settings shared by all backend kinds.
#[derive(Debug, Clone, Default)]
pub struct BackendOptions {
    pub device_map: DeviceMap,
    pub fal_key: Option<String>,
    pub fal_base_url: Option<String>,
}

/// Build the selected backend, loading pipeline weights for local kinds.
pub async fn load_backend(kind: BackendKind, options: &BackendOptions) -> Result<Arc<dyn Backend>> {
    tracing::info!(backend = %kind, device_map = ?options.device_map, "loading backend");

    match kind {
        BackendKind::Hosted => {
            let key = options.fal_key.clone().unwrap_or_else(|| {
                tracing::warn!("FAL_KEY is not set, hosted requests will be rejected");
                String::new()
            });
            let base_url = options
                .fal_base_url
                .as_deref()
                .unwrap_or(hosted::DEFAULT_BASE_URL);
            let backend =
                FalBackend::new(base_url, key).context("failed to build fal http client")?;
            Ok(Arc::new(backend))
        }
        BackendKind::Flux => {
            let model = FluxLoader::load(Api::new()?, options.device_map).await?;
            tracing::info!("flux pipeline loaded");
            Ok(Arc::new(LocalBackend::new(
                kind.as_str(),
                model,
                InferenceSettings::TRANSFORMER,
            )))
        }
        BackendKind::Legacy => {
            let model = StableDiffusionLoader::load(Api::new()?, options.device_map).await?;
            tracing::info!("stable diffusion pipeline loaded");
            Ok(Arc::new(LocalBackend::new(
                kind.as_str(),
                model,
                InferenceSettings::LEGACY,
            )))
        }
    }
}
