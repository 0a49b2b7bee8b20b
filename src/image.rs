use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Local;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ImageConfig;
use crate::error::{AppError, Result};

const MAX_STEPS: u32 = 150;
const SAFE_PROMPT_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageBackend {
    Local,
    Premium,
}

impl std::fmt::Display for ImageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageBackend::Local => write!(f, "LOCAL"),
            ImageBackend::Premium => write!(f, "PREMIUM"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedImage {
    /// Base64-encoded PNG.
    pub image: String,
    pub duration: f64,
    pub device: String,
    pub steps: u32,
    #[serde(skip)]
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    Completed(GeneratedImage),
    Cancelled,
}

#[derive(Debug, Deserialize)]
struct Txt2ImgResponse {
    images: Vec<String>,
}

pub struct ImageGenerator {
    config: ImageConfig,
    output_dir: PathBuf,
    http_client: Client,
    progress: AtomicU8,
    cancel_requested: AtomicBool,
}

impl ImageGenerator {
    pub fn new(config: ImageConfig, output_dir: PathBuf) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(ImageGenerator {
            config,
            output_dir,
            http_client,
            progress: AtomicU8::new(0),
            cancel_requested: AtomicBool::new(false),
        })
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        info!("image generation cancel requested");
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn backend_for(&self, premium: Option<bool>) -> ImageBackend {
        if premium.unwrap_or(self.config.premium) {
            ImageBackend::Premium
        } else {
            ImageBackend::Local
        }
    }

    pub async fn generate(&self, prompt: &str, steps: Option<u32>, premium: Option<bool>) -> Result<GenerationOutcome> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(AppError::InvalidInput("Prompt is required".to_string()));
        }

        let steps = steps.unwrap_or(self.config.steps).clamp(1, MAX_STEPS);
        let backend = self.backend_for(premium);

        self.progress.store(0, Ordering::SeqCst);
        self.cancel_requested.store(false, Ordering::SeqCst);

        info!(%backend, steps, prompt, "generating image");
        let started = Instant::now();

        let budget = Duration::from_secs(self.config.timeout_secs);
        let result = match timeout(budget, self.run_backend(backend, prompt, steps)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Backend(format!(
                "{} image backend timed out after {}s",
                backend, self.config.timeout_secs
            ))),
        };
        let bytes = result.inspect_err(|_| self.progress.store(0, Ordering::SeqCst))?;

        let Some(bytes) = bytes else {
            info!("image generation cancelled");
            self.progress.store(0, Ordering::SeqCst);
            return Ok(GenerationOutcome::Cancelled);
        };

        let path = self
            .save_to_disk(&bytes, prompt)
            .await
            .inspect_err(|_| self.progress.store(0, Ordering::SeqCst))?;
        let duration = (started.elapsed().as_secs_f64() * 100.0).round() / 100.0;
        self.progress.store(100, Ordering::SeqCst);

        info!(path = %path.display(), duration, "image saved");
        Ok(GenerationOutcome::Completed(GeneratedImage {
            image: STANDARD.encode(&bytes),
            duration,
            device: backend.to_string(),
            steps,
            path,
        }))
    }

    /// Drives the backend request while watching the cancel flag; `None`
    /// means the user cancelled.
    async fn run_backend(&self, backend: ImageBackend, prompt: &str, steps: u32) -> Result<Option<Vec<u8>>> {
        let request = async {
            match backend {
                ImageBackend::Local => self.local_txt2img(prompt, steps).await,
                ImageBackend::Premium => self.premium_image(prompt).await,
            }
        };
        tokio::pin!(request);

        let mut ticker = interval(Duration::from_millis(self.config.poll_interval_ms.max(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = &mut request => return result.map(Some),
                _ = ticker.tick() => {
                    if self.cancel_requested.load(Ordering::SeqCst) {
                        if backend == ImageBackend::Local {
                            self.interrupt_local().await;
                        }
                        return Ok(None);
                    }
                    if backend == ImageBackend::Local {
                        self.poll_local_progress().await;
                    }
                }
            }
        }
    }

    async fn local_txt2img(&self, prompt: &str, steps: u32) -> Result<Vec<u8>> {
        let url = format!("{}/sdapi/v1/txt2img", self.config.local_url.trim_end_matches('/'));
        let body = json!({
            "prompt": prompt,
            "steps": steps,
            "width": self.config.width,
            "height": self.config.height,
        });

        let response = self.http_client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Backend(format!("txt2img returned {}: {}", status, text)));
        }

        let parsed: Txt2ImgResponse = response.json().await?;
        let encoded = parsed
            .images
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Backend("txt2img returned no images".to_string()))?;

        // Some builds prefix the payload with a data URI header.
        let encoded = encoded.rsplit(',').next().unwrap_or_default();
        STANDARD
            .decode(encoded)
            .map_err(|e| AppError::Backend(format!("Invalid image payload: {}", e)))
    }

    async fn premium_image(&self, prompt: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/{}",
            self.config.premium_url.trim_end_matches('/'),
            urlencoding::encode(prompt)
        );
        let width = self.config.width.to_string();
        let height = self.config.height.to_string();

        let response = self
            .http_client
            .get(&url)
            .query(&[("width", width.as_str()), ("height", height.as_str()), ("nologo", "true")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Backend(format!("Premium image API returned {}", response.status())));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(AppError::Backend("Premium image API returned an empty body".to_string()));
        }
        Ok(bytes.to_vec())
    }

    async fn poll_local_progress(&self) {
        let url = format!("{}/sdapi/v1/progress", self.config.local_url.trim_end_matches('/'));
        let fraction = match self.http_client.get(&url).send().await {
            Ok(response) => response
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v.get("progress").and_then(Value::as_f64)),
            Err(e) => {
                debug!(error = %e, "progress poll failed");
                None
            }
        };

        if let Some(fraction) = fraction {
            let percent = (fraction * 100.0).clamp(0.0, 99.0) as u8;
            self.progress.store(percent, Ordering::SeqCst);
        }
    }

    async fn interrupt_local(&self) {
        let url = format!("{}/sdapi/v1/interrupt", self.config.local_url.trim_end_matches('/'));
        if let Err(e) = self.http_client.post(&url).send().await {
            warn!(error = %e, "failed to interrupt local backend");
        }
    }

    async fn save_to_disk(&self, bytes: &[u8], prompt: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let stem = format!("{}_{}", timestamp, safe_prompt(prompt));
        let image_path = self.output_dir.join(format!("{}.png", stem));

        tokio::fs::write(&image_path, bytes).await?;
        tokio::fs::write(sidecar_path(&image_path), prompt).await?;
        Ok(image_path)
    }
}

/// Filesystem-safe prompt fragment used in image filenames.
pub fn safe_prompt(prompt: &str) -> String {
    prompt
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .take(SAFE_PROMPT_CHARS)
        .map(|c| if c == ' ' { '_' } else { c })
        .collect()
}

fn sidecar_path(image_path: &Path) -> PathBuf {
    image_path.with_extension("txt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::sync::Arc;

    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn test_config(url: &str) -> ImageConfig {
        ImageConfig {
            local_url: url.to_string(),
            premium_url: format!("{}/prompt", url),
            timeout_secs: 10,
            poll_interval_ms: 20,
            ..ImageConfig::default()
        }
    }

    #[test]
    fn test_safe_prompt() {
        assert_eq!(safe_prompt("a cat: on a <mat>?"), "a_cat_on_a_mat");
        let long = "x".repeat(50);
        assert_eq!(safe_prompt(&long).len(), 30);
        assert_eq!(safe_prompt("ação é ótima"), "ação_é_ótima");
    }

    #[tokio::test]
    async fn test_local_generation_saves_png_and_sidecar() {
        let payload = STANDARD.encode(b"fake png bytes");
        let router = Router::new()
            .route(
                "/sdapi/v1/txt2img",
                post(move |Json(body): Json<Value>| {
                    let payload = payload.clone();
                    async move {
                        assert_eq!(body["steps"], 7);
                        Json(json!({ "images": [payload] }))
                    }
                }),
            )
            .route("/sdapi/v1/progress", get(|| async { Json(json!({ "progress": 0.5 })) }));
        let url = spawn_server(router).await;

        let dir = tempfile::tempdir().unwrap();
        let generator = ImageGenerator::new(test_config(&url), dir.path().to_path_buf()).unwrap();

        let outcome = generator.generate("um gato astronauta", Some(7), Some(false)).await.unwrap();
        let GenerationOutcome::Completed(image) = outcome else {
            panic!("expected a completed generation");
        };

        assert_eq!(image.device, "LOCAL");
        assert_eq!(image.steps, 7);
        assert_eq!(STANDARD.decode(&image.image).unwrap(), b"fake png bytes");
        assert_eq!(generator.progress(), 100);

        let name = image.path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_um_gato_astronauta.png"));
        let sidecar = std::fs::read_to_string(image.path.with_extension("txt")).unwrap();
        assert_eq!(sidecar, "um gato astronauta");
    }

    #[tokio::test]
    async fn test_premium_generation_returns_raw_bytes() {
        let router = Router::new().route("/prompt/{prompt}", get(|| async { "premium bytes" }));
        let url = spawn_server(router).await;

        let dir = tempfile::tempdir().unwrap();
        let generator = ImageGenerator::new(test_config(&url), dir.path().to_path_buf()).unwrap();

        let outcome = generator.generate("sunset", None, Some(true)).await.unwrap();
        let GenerationOutcome::Completed(image) = outcome else {
            panic!("expected a completed generation");
        };
        assert_eq!(image.device, "PREMIUM");
        assert_eq!(STANDARD.decode(&image.image).unwrap(), b"premium bytes");
    }

    #[tokio::test]
    async fn test_cancel_interrupts_local_backend() {
        let interrupted = Arc::new(AtomicBool::new(false));
        let router = Router::new()
            .route(
                "/sdapi/v1/txt2img",
                post(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Json(json!({ "images": [] }))
                }),
            )
            .route("/sdapi/v1/progress", get(|| async { Json(json!({ "progress": 0.2 })) }))
            .route(
                "/sdapi/v1/interrupt",
                post(|State(flag): State<Arc<AtomicBool>>| async move {
                    flag.store(true, Ordering::SeqCst);
                }),
            )
            .with_state(interrupted.clone());
        let url = spawn_server(router).await;

        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(ImageGenerator::new(test_config(&url), dir.path().to_path_buf()).unwrap());

        let task = {
            let generator = generator.clone();
            tokio::spawn(async move { generator.generate("slow", Some(5), Some(false)).await })
        };

        tokio::time::sleep(Duration::from_millis(150)).await;
        generator.cancel();

        let outcome = task.await.unwrap().unwrap();
        assert!(matches!(outcome, GenerationOutcome::Cancelled));
        assert!(interrupted.load(Ordering::SeqCst));
        assert_eq!(std::fs::read_dir(dir.path()).map(|d| d.count()).unwrap_or(0), 0);
    }

    #[tokio::test]
    async fn test_failed_generation_resets_progress() {
        let router = Router::new()
            .route(
                "/sdapi/v1/txt2img",
                post(|| async {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR
                }),
            )
            .route("/sdapi/v1/progress", get(|| async { Json(json!({ "progress": 0.2 })) }));
        let url = spawn_server(router).await;

        let dir = tempfile::tempdir().unwrap();
        let generator = Arc::new(ImageGenerator::new(test_config(&url), dir.path().to_path_buf()).unwrap());

        let task = {
            let generator = generator.clone();
            tokio::spawn(async move { generator.generate("quebrado", Some(5), Some(false)).await })
        };

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(generator.progress(), 20);

        assert!(matches!(task.await.unwrap(), Err(AppError::Backend(_))));
        assert_eq!(generator.progress(), 0);
    }

    #[tokio::test]
    async fn test_empty_prompt_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ImageGenerator::new(ImageConfig::default(), dir.path().to_path_buf()).unwrap();
        assert!(matches!(
            generator.generate("   ", None, None).await,
            Err(AppError::InvalidInput(_))
        ));
    }
}
