//! Image generation capability
//!
//! Reduces the provider to `generate(prompt, reference) -> image`. The HTTP
//! client targets a fal.ai-style endpoint; the trait exists so the
//! orchestrator (and tests) can swap in a different backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, ServiceError};

// Remote generation is slow; cap it rather than letting a run hang forever.
const GENERATION_TIMEOUT: Duration = Duration::from_secs(120);

const DEFAULT_MODEL: &str = "fal-ai/nano-banana";

#[derive(Debug, Clone, Serialize)]
pub struct GenerateImageRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub num_images: u32,
    pub aspect_ratio: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f32>,
    pub guidance_scale: f32,
    pub num_inference_steps: u32,
}

impl Default for GenerateImageRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            image_url: None,
            num_images: 1,
            // Square by default for social media
            aspect_ratio: "1:1".to_string(),
            strength: None,
            guidance_scale: 7.5,
            num_inference_steps: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
    pub width: i32,
    pub height: i32,
    pub seed: Option<i64>,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: GenerateImageRequest) -> Result<GeneratedImage>;
}

#[derive(Clone)]
pub struct FalImageClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct FalImage {
    url: String,
    width: i32,
    height: i32,
}

#[derive(Debug, Deserialize)]
struct FalGenerateResponse {
    #[serde(default)]
    images: Vec<FalImage>,
    seed: Option<i64>,
}

impl FalImageClient {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl ImageGenerator for FalImageClient {
    async fn generate(&self, request: GenerateImageRequest) -> Result<GeneratedImage> {
        let url = format!("{}/{}", self.base_url, self.model);

        tracing::debug!(model = %self.model, "Requesting image generation");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Key {}", self.api_key))
            .timeout(GENERATION_TIMEOUT)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::GenerationFailed(format!(
                "provider returned {}: {}",
                status, body
            )));
        }

        let payload: FalGenerateResponse = response.json().await?;

        let image = payload
            .images
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::GenerationFailed("no images generated".to_string()))?;

        Ok(GeneratedImage {
            url: image.url,
            width: image.width,
            height: image.height,
            seed: payload.seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_without_empty_optionals() {
        let request = GenerateImageRequest {
            prompt: "a red door".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["prompt"], "a red door");
        assert_eq!(json["num_images"], 1);
        assert!(json.get("image_url").is_none());
        assert!(json.get("strength").is_none());
    }

    #[test]
    fn response_parses_with_missing_seed() {
        let payload: FalGenerateResponse = serde_json::from_str(
            r#"{"images":[{"url":"https://img.example/a.png","width":1024,"height":1024}]}"#,
        )
        .unwrap();
        assert_eq!(payload.images.len(), 1);
        assert!(payload.seed.is_none());
    }
}
