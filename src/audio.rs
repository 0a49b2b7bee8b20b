use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AudioConfig;
use crate::error::{AppError, Result};

const MAX_LOADING_WAIT_SECS: f64 = 60.0;

/// Text-to-music through a hosted MusicGen endpoint.
pub struct AudioGenerator {
    config: AudioConfig,
    output_dir: PathBuf,
    client: OnceCell<Client>,
}

impl AudioGenerator {
    pub fn new(config: AudioConfig, output_dir: PathBuf) -> Self {
        AudioGenerator {
            config,
            output_dir,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&Client> {
        self.client
            .get_or_try_init(|| async {
                info!(endpoint = %self.config.endpoint, "initialising music client");
                Client::builder()
                    .timeout(Duration::from_secs(self.config.timeout_secs))
                    .build()
                    .map_err(AppError::from)
            })
            .await
    }

    /// Generates a clip and returns its filename inside the output directory.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(AppError::InvalidInput("Prompt is required".to_string()));
        }

        info!(prompt, "generating music");
        let bytes = match self.request(prompt).await? {
            Ok(bytes) => bytes,
            Err(wait) => {
                // Model is cold on the inference side; wait once for it to load.
                warn!(wait_secs = wait, "music model loading, retrying once");
                tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                self.request(prompt)
                    .await?
                    .map_err(|_| AppError::Backend("Music model is still loading".to_string()))?
            }
        };

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let filename = format!("audio_{}.wav", Uuid::new_v4().simple());
        tokio::fs::write(self.output_dir.join(&filename), &bytes).await?;

        info!(filename = %filename, size = bytes.len(), "music saved");
        Ok(filename)
    }

    /// `Ok(Err(secs))` means the backend asked us to come back later.
    async fn request(&self, prompt: &str) -> Result<std::result::Result<Vec<u8>, f64>> {
        let client = self.client().await?;
        let body = json!({
            "inputs": prompt,
            "parameters": {
                "do_sample": true,
                "max_new_tokens": self.config.max_new_tokens,
            }
        });

        let mut request = client.post(&self.config.endpoint).header(ACCEPT, "audio/wav").json(&body);
        if let Some(token) = self.config.api_token.as_deref().filter(|t| !t.is_empty()) {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::SERVICE_UNAVAILABLE {
            let wait = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v.get("estimated_time").and_then(Value::as_f64));
            if let Some(wait) = wait {
                return Ok(Err(wait.clamp(0.0, MAX_LOADING_WAIT_SECS)));
            }
            return Err(AppError::Backend("Music backend unavailable".to_string()));
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Backend(format!("Music backend returned {}: {}", status, text)));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(AppError::Backend("Music backend returned no audio".to_string()));
        }
        Ok(Ok(bytes.to_vec()))
    }
}
