use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub data_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_dir: Option<PathBuf>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub personality: PersonalityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// Text backends and the retry policy used when talking to them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub default_provider: String,
    pub ollama_url: String,
    pub ollama_model: String,
    pub pollinations_url: String,
    pub temperature: f32,
    pub retry_count: u32,
    pub retry_backoff_secs: Vec<f64>,
    pub rate_limit_pause_secs: f64,
    pub timeout_secs: u64,
    pub ollama_timeout_secs: u64,
    pub global_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_provider: "pollinations".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3.1:latest".to_string(),
            pollinations_url: "https://text.pollinations.ai/".to_string(),
            temperature: 0.8,
            retry_count: 1,
            retry_backoff_secs: vec![1.5, 3.0],
            rate_limit_pause_secs: 4.0,
            timeout_secs: 60,
            ollama_timeout_secs: 15,
            global_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Send prompts to the premium remote API instead of the local server.
    pub premium: bool,
    pub local_url: String,
    pub premium_url: String,
    pub steps: u32,
    pub width: u32,
    pub height: u32,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            premium: false,
            local_url: "http://127.0.0.1:7860".to_string(),
            premium_url: "https://image.pollinations.ai/prompt".to_string(),
            steps: 20,
            width: 512,
            height: 512,
            timeout_secs: 600,
            poll_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    pub max_new_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api-inference.huggingface.co/models/facebook/musicgen-small".to_string(),
            api_token: None,
            max_new_tokens: 1500,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Base URL of an OpenAI compatible `/v1/audio/speech` server.
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    pub default_voice: String,
    pub speaker_rate: String,
    pub voices: BTreeMap<String, String>,
    pub timeout_secs: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        let mut voices = BTreeMap::new();
        voices.insert("karen_pt".to_string(), "pt-BR-FranciscaNeural".to_string());
        voices.insert("male_pt".to_string(), "pt-BR-AntonioNeural".to_string());
        voices.insert("default".to_string(), "pt-BR-FranciscaNeural".to_string());

        Self {
            endpoint: "http://127.0.0.1:5050".to_string(),
            api_key: None,
            model: "tts-1".to_string(),
            default_voice: "pt-BR-FranciscaNeural".to_string(),
            speaker_rate: "-10%".to_string(),
            voices,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonalityConfig {
    pub name: String,
    pub personality_type: String,
    pub preferred_voice: String,
    pub chat_temperature: f32,
    pub idle_speak_tendency: f64,
    pub min_idle_time: u32,
}

impl Default for PersonalityConfig {
    fn default() -> Self {
        Self {
            name: "Karen".to_string(),
            personality_type: "sarcastic".to_string(),
            preferred_voice: "karen_pt".to_string(),
            chat_temperature: 0.85,
            idle_speak_tendency: 0.6,
            min_idle_time: 5,
        }
    }
}

impl Config {
    pub fn new(data_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("aistudio")
        });

        std::fs::create_dir_all(&data_dir)?;

        let config_path = data_dir.join("config.json");

        let mut config = if config_path.exists() {
            let config_str = std::fs::read_to_string(&config_path)?;
            if config_str.trim().is_empty() {
                tracing::warn!(path = %config_path.display(), "config file is empty, recreating defaults");
                Self::write_default(data_dir.clone())?
            } else {
                let mut config: Config = serde_json::from_str(&config_str)
                    .map_err(|e| AppError::Config(format!("Failed to parse {}: {}", config_path.display(), e)))?;
                config.data_dir = data_dir;
                config
            }
        } else {
            Self::write_default(data_dir)?
        };

        config.apply_env();
        Ok(config)
    }

    fn write_default(data_dir: PathBuf) -> Result<Self> {
        let config = Self::default_config(data_dir);
        config.save()?;
        tracing::info!(path = %config.data_dir.join("config.json").display(), "wrote default config");
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = self.data_dir.join("config.json");
        let json_str = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, json_str)?;
        Ok(())
    }

    pub fn default_config(data_dir: PathBuf) -> Self {
        Config {
            data_dir,
            media_dir: None,
            server: ServerConfig::default(),
            chat: ChatConfig::default(),
            image: ImageConfig::default(),
            audio: AudioConfig::default(),
            speech: SpeechConfig::default(),
            personality: PersonalityConfig::default(),
        }
    }

    /// Environment variables win over the file; empty values are ignored.
    fn apply_env(&mut self) {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }

        if let Some(url) = var("OLLAMA_URL") {
            self.chat.ollama_url = url;
        }
        if let Some(provider) = var("AISTUDIO_CHAT_PROVIDER") {
            self.chat.default_provider = provider;
        }
        if let Some(flag) = var("AISTUDIO_PREMIUM_IMAGES") {
            self.image.premium = matches!(flag.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if self.audio.api_token.is_none() {
            self.audio.api_token = var("HF_API_TOKEN");
        }
        if self.speech.api_key.is_none() {
            self.speech.api_key = var("TTS_API_KEY");
        }
    }

    pub fn media_dir(&self) -> PathBuf {
        self.media_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("media"))
    }

    pub fn images_dir(&self) -> PathBuf {
        self.media_dir().join("images")
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.media_dir().join("audio_generated")
    }

    pub fn speech_dir(&self) -> PathBuf {
        self.media_dir().join("ai_speeches")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_written_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(Some(dir.path().to_path_buf())).unwrap();
        assert!(dir.path().join("config.json").exists());
        assert_eq!(config.personality.name, "Karen");
        assert_eq!(config.chat.retry_backoff_secs, vec![1.5, 3.0]);

        let mut edited = config.clone();
        edited.server.port = 8080;
        edited.save().unwrap();

        let reloaded = Config::new(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(reloaded.server.port, 8080);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{ "image": { "steps": 30 } }"#,
        )
        .unwrap();

        let config = Config::new(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(config.image.steps, 30);
        assert_eq!(config.image.width, 512);
        assert_eq!(config.speech.voices.get("male_pt").unwrap(), "pt-BR-AntonioNeural");
    }

    #[test]
    fn test_media_layout() {
        let config = Config::default_config(PathBuf::from("/tmp/aistudio"));
        assert_eq!(config.images_dir(), PathBuf::from("/tmp/aistudio/media/images"));
        assert_eq!(config.speech_dir(), PathBuf::from("/tmp/aistudio/media/ai_speeches"));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{ not json").unwrap();
        assert!(matches!(
            Config::new(Some(dir.path().to_path_buf())),
            Err(AppError::Config(_))
        ));
    }
}
