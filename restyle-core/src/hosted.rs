//! fal.ai adapter.
//!
//! Remote URLs and data URIs are forwarded as-is, bare base64 is wrapped in a data URI. The
//! target model is picked per style from the catalog, and the output URL is read from whichever
//! response shape the model uses.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::{borrow::Cow, time::Duration};

use crate::{
    backend::{Backend, BackendStatus, EditJob},
    codec,
    error::{GenerateError, Result},
    styles::{HostedModel, StyleDefinition},
};

pub const DEFAULT_BASE_URL: &str = "https://fal.run";
const ECHO_MODEL: &str = "fal-ai/test/echo";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const RETRY_HINT: &str = "Please try a different style or check your internet connection";

#[derive(Debug, thiserror::Error)]
enum FalError {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("{status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

#[derive(Debug, Serialize, PartialEq)]
struct EditArguments<'a> {
    image_url: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mask_url: Option<&'a str>,
}

/// Client for the fal.ai synchronous run endpoint.
#[derive(Clone)]
pub struct FalBackend {
    client: Client,
    base_url: String,
    api_key: String,
}

impl FalBackend {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn route(style: Option<&StyleDefinition>) -> HostedModel {
        style.map(|s| s.model).unwrap_or_default()
    }

    async fn call<T: Serialize + ?Sized>(
        &self,
        model: &str,
        arguments: &T,
    ) -> std::result::Result<Value, FalError> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, model))
            .header("Authorization", format!("Key {}", self.api_key))
            .json(arguments)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(FalError::Status { status, body });
        }

        Ok(response.json().await?)
    }
}

/// What fal accepts as an image reference: an http(s) URL or a data URI.
fn image_reference(value: &str) -> Cow<'_, str> {
    if codec::is_remote_url(value) || value.starts_with("data:") {
        return Cow::Borrowed(value);
    }
    let mime = codec::decode_base64(value)
        .ok()
        .and_then(|bytes| image::guess_format(&bytes).ok())
        .map_or("image/png", |format| format.to_mime_type());
    Cow::Owned(format!("data:{mime};base64,{value}"))
}

/// Pulls the output image URL out of a fal response.
///
/// Handles `{"images": [{"url": ..}]}` and the older `{"image": ..}` shape, where the image is
/// either a bare URL or an object carrying one.
pub fn extract_image_url(result: &Value) -> Option<String> {
    if let Some(url) = result
        .get("images")
        .and_then(Value::as_array)
        .and_then(|images| images.first())
        .and_then(|first| first.get("url"))
        .and_then(Value::as_str)
    {
        return Some(url.to_string());
    }

    match result.get("image")? {
        Value::String(url) => Some(url.clone()),
        Value::Object(image) => image.get("url").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

#[async_trait]
impl Backend for FalBackend {
    fn name(&self) -> &str {
        "hosted"
    }

    // Every hosted model runs without a mask, ideogram edits the whole image.
    fn requires_mask(&self, _style: Option<&StyleDefinition>) -> bool {
        false
    }

    async fn generate(&self, job: EditJob) -> Result<String> {
        let model = Self::route(job.style);
        let image_url = image_reference(&job.image);
        let mask_url = job
            .mask
            .as_deref()
            .filter(|_| model.accepts_mask())
            .map(image_reference);
        let arguments = EditArguments {
            image_url: &image_url,
            prompt: &job.prompt,
            mask_url: mask_url.as_deref(),
        };

        tracing::info!(model = model.id(), with_mask = arguments.mask_url.is_some(), "calling fal");
        let result = self.call(model.id(), &arguments).await.map_err(|e| {
            tracing::error!(model = model.id(), "fal call failed: {e}");
            GenerateError::backend(format!("Error generating design with {}: {e}", model.id()))
                .with_details(RETRY_HINT)
        })?;
        tracing::debug!(%result, "fal result");

        match extract_image_url(&result) {
            Some(url) => {
                tracing::info!(%url, "successfully received image result");
                Ok(url)
            }
            None => {
                tracing::error!(%result, "no image in fal result");
                Err(GenerateError::backend("Failed to generate image"))
            }
        }
    }

    async fn status(&self) -> Result<BackendStatus> {
        let result = self
            .call(ECHO_MODEL, &serde_json::json!({ "message": "ping" }))
            .await
            .map_err(|e| GenerateError::backend(e.to_string()))?;

        let empty = match &result {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::String(s) => s.is_empty(),
            _ => false,
        };
        if empty {
            return Err(GenerateError::backend("API returned empty response"));
        }
        Ok(BackendStatus::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::styles;
    use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    type Seen = Arc<Mutex<Vec<(String, Option<String>, Value)>>>;

    /// Serves canned JSON on every path and records what was posted where.
    async fn fake_fal(reply: Value, status: u16) -> (String, Seen) {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route(
                "/{*model}",
                post(
                    move |State((seen, reply)): State<(Seen, Value)>,
                     axum::extract::Path(model): axum::extract::Path<String>,
                     headers: HeaderMap,
                     Json(body): Json<Value>| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        seen.lock().unwrap().push((model, auth, body));
                        (
                            axum::http::StatusCode::from_u16(status).unwrap(),
                            Json(reply),
                        )
                    },
                ),
            )
            .with_state((seen.clone(), reply));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}"), seen)
    }

    fn job(style: &str, mask: Option<&str>) -> EditJob {
        let style = styles::lookup(style);
        EditJob {
            image: "data:image/png;base64,AAAA".to_string(),
            mask: mask.map(str::to_string),
            prompt: style.map(|s| s.prompt).unwrap_or("free text").to_string(),
            style,
        }
    }

    #[test]
    fn extracts_url_from_known_shapes() {
        let current = json!({ "images": [{ "url": "https://fal.media/a.png" }, { "url": "b" }] });
        assert_eq!(extract_image_url(&current).as_deref(), Some("https://fal.media/a.png"));

        let legacy = json!({ "image": "https://fal.media/b.png" });
        assert_eq!(extract_image_url(&legacy).as_deref(), Some("https://fal.media/b.png"));

        let legacy_object = json!({ "image": { "url": "https://fal.media/c.png", "width": 10 } });
        assert_eq!(extract_image_url(&legacy_object).as_deref(), Some("https://fal.media/c.png"));
    }

    #[test]
    fn rejects_unknown_shapes() {
        assert_eq!(extract_image_url(&json!({ "images": [] })), None);
        assert_eq!(extract_image_url(&json!({ "images": [{ "path": "x" }] })), None);
        assert_eq!(extract_image_url(&json!({ "status": "done" })), None);
    }

    #[test]
    fn no_route_requires_a_mask() {
        let backend = FalBackend::new(DEFAULT_BASE_URL, "key").unwrap();
        assert!(!backend.requires_mask(None));
        for style in styles::STYLES {
            assert!(!backend.requires_mask(Some(style)), "{} demands a mask", style.id);
        }
    }

    #[test]
    fn image_references_pass_through_or_get_wrapped() {
        let remote = "https://cdn.example.com/room.jpg";
        assert!(matches!(image_reference(remote), Cow::Borrowed(r) if r == remote));
        let inline = "data:image/jpeg;base64,AAAA";
        assert!(matches!(image_reference(inline), Cow::Borrowed(r) if r == inline));

        let img = image::DynamicImage::new_rgb8(2, 2);
        let bare = codec::encode_png(&img).unwrap();
        assert_eq!(image_reference(&bare), format!("data:image/png;base64,{bare}"));
    }

    #[tokio::test]
    async fn styled_request_without_mask_reaches_ideogram() {
        use crate::dispatch::{Dispatcher, GenerationRequest};

        let (base, seen) =
            fake_fal(json!({ "images": [{ "url": "https://fal.media/restyled.png" }] }), 200).await;
        let dispatcher = Dispatcher::new(Arc::new(FalBackend::new(&base, "secret").unwrap()));

        let result = dispatcher
            .handle(GenerationRequest {
                image: Some("data:image/png;base64,AAAA".to_string()),
                style: Some("modern".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(result.result_url, "https://fal.media/restyled.png");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (model, _, body) = &seen[0];
        assert_eq!(model, "fal-ai/ideogram/v3/edit");
        assert!(body.get("mask_url").is_none());
        assert_eq!(body["prompt"], styles::lookup("modern").unwrap().prompt);
    }

    #[tokio::test]
    async fn edit_styles_send_mask_to_ideogram() {
        let (base, seen) = fake_fal(json!({ "images": [{ "url": "https://fal.media/out.png" }] }), 200).await;
        let backend = FalBackend::new(&base, "secret").unwrap();

        let url = backend.generate(job("modern", Some("data:image/png;base64,MASK"))).await.unwrap();
        assert_eq!(url, "https://fal.media/out.png");

        let seen = seen.lock().unwrap();
        let (model, auth, body) = &seen[0];
        assert_eq!(model, "fal-ai/ideogram/v3/edit");
        assert_eq!(auth.as_deref(), Some("Key secret"));
        assert_eq!(body["mask_url"], "data:image/png;base64,MASK");
        assert_eq!(body["image_url"], "data:image/png;base64,AAAA");
        assert_eq!(body["prompt"], styles::lookup("modern").unwrap().prompt);
    }

    #[tokio::test]
    async fn image_to_image_styles_drop_the_mask() {
        let (base, seen) = fake_fal(json!({ "image": "https://fal.media/legacy.png" }), 200).await;
        let backend = FalBackend::new(&base, "secret").unwrap();

        let url = backend.generate(job("bohemian", Some("data:image/png;base64,MASK"))).await.unwrap();
        assert_eq!(url, "https://fal.media/legacy.png");

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, "fal-ai/flux/dev/image-to-image");
        assert!(seen[0].2.get("mask_url").is_none());
    }

    #[tokio::test]
    async fn api_errors_become_server_errors_with_hint() {
        let (base, _) = fake_fal(json!({ "detail": "quota exceeded" }), 429).await;
        let backend = FalBackend::new(&base, "secret").unwrap();

        let err = backend.generate(job("luxury", None)).await.unwrap_err();
        assert_eq!(err.http_status(), 500);
        assert!(err
            .to_string()
            .starts_with("Error generating design with fal-ai/flux/dev/image-to-image"));
        assert_eq!(err.details(), Some(RETRY_HINT));
    }

    #[tokio::test]
    async fn missing_image_in_result_is_reported() {
        let (base, _) = fake_fal(json!({ "seed": 42 }), 200).await;
        let err = FalBackend::new(&base, "k")
            .unwrap()
            .generate(job("luxury", None))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to generate image");
    }

    #[tokio::test]
    async fn status_probes_echo_model() {
        let (base, seen) = fake_fal(json!({ "message": "ping" }), 200).await;
        let status = FalBackend::new(&base, "k").unwrap().status().await.unwrap();
        assert_eq!(status, BackendStatus::ok());
        assert_eq!(seen.lock().unwrap()[0].0, ECHO_MODEL);

        let (base, _) = fake_fal(json!({}), 200).await;
        let err = FalBackend::new(&base, "k").unwrap().status().await.unwrap_err();
        assert_eq!(err.to_string(), "API returned empty response");
    }
}
