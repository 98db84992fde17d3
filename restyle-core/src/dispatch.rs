//! Request validation, style resolution and hand-off to the configured backend.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    backend::{Backend, BackendStatus, EditJob},
    error::{GenerateError, Result},
    styles,
};

/// Body of `POST /generate`.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct GenerationRequest {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub mask: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub result_url: String,
}

fn present(field: Option<String>) -> Option<String> {
    field.filter(|value| !value.is_empty())
}

#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn Backend>,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Validates `request` and resolves its effective prompt without touching the backend.
    pub fn resolve(&self, request: GenerationRequest) -> Result<EditJob> {
        let image = present(request.image)
            .ok_or_else(|| GenerateError::validation("Missing image data"))?;
        let mask = present(request.mask);

        let style = match present(request.style) {
            Some(id) => {
                let found = styles::lookup(&id);
                if found.is_none() {
                    tracing::warn!(style = %id, "unknown style, falling back to free-text prompt");
                }
                found
            }
            None => None,
        };

        if mask.is_none() && self.backend.requires_mask(style) {
            return Err(GenerateError::validation("Missing mask data"));
        }

        let prompt = match style {
            Some(style) => {
                tracing::info!(style = style.name, "using predefined style");
                style.prompt.to_string()
            }
            None => request.prompt.unwrap_or_default(),
        };

        Ok(EditJob {
            image,
            mask,
            prompt,
            style,
        })
    }

    pub async fn handle(&self, request: GenerationRequest) -> Result<GenerationResult> {
        let job = self.resolve(request)?;
        tracing::debug!(
            backend = self.backend.name(),
            prompt = %job.prompt,
            image_len = job.image.len(),
            mask_len = job.mask.as_ref().map(String::len),
            "dispatching generation request"
        );
        let result_url = self.backend.generate(job).await?;
        Ok(GenerationResult { result_url })
    }

    pub async fn status(&self) -> Result<BackendStatus> {
        self.backend.status().await
    }
}
