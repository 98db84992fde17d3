use async_trait::async_trait;
use serde::Serialize;

use crate::{error::Result, styles::StyleDefinition};

/// A validated request with its prompt already resolved against the style catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct EditJob {
    /// Base64 / data-URI image, or a remote URL.
    pub image: String,
    pub mask: Option<String>,
    pub prompt: String,
    pub style: Option<&'static StyleDefinition>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BackendStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl BackendStatus {
    pub fn ok() -> Self {
        Self {
            status: "ok",
            device: None,
            model: None,
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// One image-generation backend. Chosen once at startup and shared by all requests.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a request rendered with `style` (or the default route when `None`) needs a mask.
    fn requires_mask(&self, style: Option<&StyleDefinition>) -> bool;

    /// Produces a single image, returned as a data URI or an external URL.
    async fn generate(&self, job: EditJob) -> Result<String>;

    async fn status(&self) -> Result<BackendStatus>;
}
