use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use regex::Regex;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SpeechConfig;
use crate::error::{AppError, Result};

pub const METADATA_FILE: &str = "speeches_metadata.json";
pub const SPEECH_URL_PREFIX: &str = "/static/ai_speeches";

const TITLE_CHARS: usize = 60;
const SAFE_TEXT_CHARS: usize = 30;
const FILENAME_TAG_CHARS: usize = 8;
const WORDS_PER_MINUTE: f64 = 150.0;

static UNSPEAKABLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[^\w\s\.\,\!\?\-\(\)'"]"#).expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static ABBREVIATIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"\bIA\b").expect("valid regex"), "Inteligência Artificial"),
        (Regex::new(r"\bTTS\b").expect("valid regex"), "Síntese de fala"),
        (Regex::new(r"\bAPI\b").expect("valid regex"), "Interface de Programação"),
    ]
});

/// Strips emoji and symbols so the synthesizer reads the text naturally.
pub fn clean_text(text: &str) -> String {
    let stripped = UNSPEAKABLE.replace_all(text, "");
    let mut cleaned = WHITESPACE.replace_all(&stripped, " ").trim().to_string();
    for (pattern, expansion) in ABBREVIATIONS.iter() {
        cleaned = pattern.replace_all(&cleaned, *expansion).into_owned();
    }
    cleaned
}

/// Estimated speaking time in minutes, never below one.
pub fn estimate_duration(text: &str) -> f64 {
    let words = text.split_whitespace().count() as f64;
    let minutes = (words / WORDS_PER_MINUTE).max(1.0);
    (minutes * 100.0).round() / 100.0
}

fn safe_text(text: &str) -> String {
    text.chars()
        .take(SAFE_TEXT_CHARS)
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .trim()
        .replace(' ', "_")
}

fn title_for(text: &str) -> String {
    if text.chars().count() > TITLE_CHARS {
        format!("{}...", text.chars().take(TITLE_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

/// Maps an edge-tts style rate ("-10%") to an OpenAI style speed multiplier.
pub fn rate_to_speed(rate: &str) -> f32 {
    rate.trim()
        .trim_end_matches('%')
        .parse::<f32>()
        .map(|percent| (1.0 + percent / 100.0).clamp(0.25, 4.0))
        .unwrap_or(1.0)
}

/// Rate or pitch as sent by clients: either a bare number or a string such
/// as `"10%"`, `"-5Hz"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Adjustment {
    Int(i64),
    Text(String),
}

impl Adjustment {
    pub fn format(&self, unit: &str) -> String {
        match self {
            Adjustment::Int(value) => format!("{:+}{}", value, unit),
            Adjustment::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return format!("+0{}", unit);
                }
                let mut formatted = if text.starts_with(['+', '-']) {
                    text.to_string()
                } else {
                    format!("+{}", text)
                };
                if formatted[1..].chars().all(|c| c.is_ascii_digit()) {
                    formatted.push_str(unit);
                }
                formatted
            }
        }
    }
}

/// Thin client for an OpenAI compatible speech endpoint.
pub struct TtsClient {
    config: SpeechConfig,
    http_client: Client,
}

impl TtsClient {
    pub fn new(config: SpeechConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(TtsClient { config, http_client })
    }

    pub fn config(&self) -> &SpeechConfig {
        &self.config
    }

    /// Resolves a speaker id (`karen_pt`) to a voice name.
    pub fn voice_for(&self, speaker: &str) -> String {
        self.config
            .voices
            .get(speaker)
            .or_else(|| self.config.voices.get("default"))
            .cloned()
            .unwrap_or_else(|| self.config.default_voice.clone())
    }

    pub async fn synthesize(&self, text: &str, voice: &str, rate: &str, pitch: &str) -> Result<Vec<u8>> {
        let url = format!("{}/v1/audio/speech", self.config.endpoint.trim_end_matches('/'));
        let body = json!({
            "model": self.config.model,
            "input": text,
            "voice": voice,
            "speed": rate_to_speed(rate),
            "rate": rate,
            "pitch": pitch,
            "response_format": "mp3",
        });

        debug!(voice, rate, pitch, chars = text.len(), "requesting speech");
        let mut request = self.http_client.post(&url).json(&body);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.header(AUTHORIZATION, format!("Bearer {}", key));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Backend(format!("TTS backend returned {}: {}", status, text)));
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(AppError::Backend("TTS backend returned no audio".to_string()));
        }
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechEntry {
    /// Text as the AI wrote it, before cleaning.
    pub text: String,
    pub voice: String,
    pub date: NaiveDateTime,
    pub duration: f64,
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeechSummary {
    pub filename: String,
    pub title: String,
    pub date: NaiveDateTime,
    pub duration: f64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedSpeech {
    pub filename: String,
    pub path: PathBuf,
    pub url: String,
}

/// On-disk speech metadata, keyed by filename.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeechLog {
    entries: BTreeMap<String, SpeechEntry>,
}

impl SpeechLog {
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return SpeechLog::default(),
        };

        match serde_json::from_str(&content) {
            Ok(log) => log,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable speech metadata, starting empty");
                SpeechLog::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn insert(&mut self, filename: String, entry: SpeechEntry) {
        self.entries.insert(filename, entry);
    }

    pub fn remove(&mut self, filename: &str) -> Option<SpeechEntry> {
        self.entries.remove(filename)
    }

    pub fn get(&self, filename: &str) -> Option<&SpeechEntry> {
        self.entries.get(filename)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn summaries<'a>(&'a self, filter: impl Fn(&SpeechEntry) -> bool + 'a) -> Vec<SpeechSummary> {
        let mut summaries: Vec<SpeechSummary> = self
            .entries
            .iter()
            .filter(|(_, entry)| filter(*entry))
            .map(|(filename, entry)| SpeechSummary {
                filename: filename.clone(),
                title: title_for(&entry.text),
                date: entry.date,
                duration: entry.duration,
                url: format!("{}/{}", SPEECH_URL_PREFIX, filename),
            })
            .collect();

        summaries.sort_by(|a, b| b.date.cmp(&a.date));
        summaries
    }
}

/// Generates the AI's spoken replies and keeps the gallery of saved speeches.
pub struct SpeechManager {
    tts: Arc<TtsClient>,
    speech_dir: PathBuf,
    metadata_path: PathBuf,
    log: Mutex<SpeechLog>,
}

impl SpeechManager {
    pub fn new(tts: Arc<TtsClient>, speech_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&speech_dir)?;
        let metadata_path = speech_dir.join(METADATA_FILE);
        let log = SpeechLog::load(&metadata_path);
        debug!(entries = log.len(), "loaded speech metadata");

        Ok(SpeechManager {
            tts,
            speech_dir,
            metadata_path,
            log: Mutex::new(log),
        })
    }

    pub async fn text_to_speech(&self, text: &str, speaker: &str) -> Result<SavedSpeech> {
        let cleaned = clean_text(text);
        if cleaned.is_empty() {
            return Err(AppError::InvalidInput("Nothing to speak".to_string()));
        }

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let tag = Uuid::new_v4().simple().to_string();
        let filename = format!(
            "ai_speech_{}_{}_{}.mp3",
            timestamp,
            &tag[..FILENAME_TAG_CHARS],
            safe_text(&cleaned)
        );
        let path = self.speech_dir.join(&filename);

        let voice = self.tts.voice_for(speaker);
        let audio = self
            .tts
            .synthesize(&cleaned, &voice, &self.tts.config().speaker_rate, "+0Hz")
            .await
            .inspect_err(|e| error!(error = %e, speaker, "speech generation failed"))?;
        tokio::fs::write(&path, &audio).await?;

        let entry = SpeechEntry {
            text: text.to_string(),
            voice: speaker.to_string(),
            date: Local::now().naive_local(),
            duration: estimate_duration(&cleaned),
            file_path: path.display().to_string(),
        };

        // Only a persisted entry becomes visible.
        let mut log = self.log.lock().await;
        let mut updated = log.clone();
        updated.insert(filename.clone(), entry);
        if let Err(e) = updated.save(&self.metadata_path) {
            error!(error = %e, filename = %filename, "failed to persist speech metadata");
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(error = %e, "failed to remove orphaned speech audio");
            }
            return Err(e);
        }
        *log = updated;

        info!(filename = %filename, voice = %voice, "speech saved");
        Ok(SavedSpeech {
            url: format!("{}/{}", SPEECH_URL_PREFIX, filename),
            filename,
            path,
        })
    }

    pub async fn speech_list(&self) -> Vec<SpeechSummary> {
        self.log.lock().await.summaries(|_| true)
    }

    pub async fn search_speeches(&self, query: &str) -> Vec<SpeechSummary> {
        let query = query.to_lowercase();
        self.log
            .lock()
            .await
            .summaries(move |entry| entry.text.to_lowercase().contains(&query))
    }

    pub async fn speech_text(&self, filename: &str) -> Option<String> {
        self.log.lock().await.get(filename).map(|entry| entry.text.clone())
    }

    /// Removes the audio file and its metadata; `Ok(false)` when no such file.
    pub async fn delete_speech(&self, filename: &str) -> Result<bool> {
        validate_filename(filename)?;

        let path = self.speech_dir.join(filename);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(false);
        }

        tokio::fs::remove_file(&path).await?;
        let mut log = self.log.lock().await;
        if log.remove(filename).is_some() {
            log.save(&self.metadata_path)?;
        }

        info!(filename, "speech deleted");
        Ok(true)
    }
}

fn validate_filename(filename: &str) -> Result<()> {
    let plain = Path::new(filename).file_name().and_then(|n| n.to_str()) == Some(filename);
    if !plain || filename == METADATA_FILE {
        return Err(AppError::InvalidInput(format!("Invalid speech filename: {}", filename)));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceInfo {
    #[serde(rename = "ShortName")]
    pub short_name: &'static str,
    #[serde(rename = "Gender")]
    pub gender: &'static str,
    #[serde(rename = "Locale")]
    pub locale: &'static str,
}

const PORTUGUESE_VOICES: &[VoiceInfo] = &[
    VoiceInfo { short_name: "pt-BR-FranciscaNeural", gender: "Female", locale: "pt-BR" },
    VoiceInfo { short_name: "pt-BR-AntonioNeural", gender: "Male", locale: "pt-BR" },
    VoiceInfo { short_name: "pt-BR-ThalitaNeural", gender: "Female", locale: "pt-BR" },
    VoiceInfo { short_name: "pt-PT-RaquelNeural", gender: "Female", locale: "pt-PT" },
    VoiceInfo { short_name: "pt-PT-DuarteNeural", gender: "Male", locale: "pt-PT" },
];

/// Free-form text to speech used by the `/speak` route.
pub struct VoiceEngine {
    tts: Arc<TtsClient>,
    output_dir: PathBuf,
}

impl VoiceEngine {
    pub fn new(tts: Arc<TtsClient>, output_dir: PathBuf) -> Self {
        VoiceEngine { tts, output_dir }
    }

    pub fn voices(&self) -> &'static [VoiceInfo] {
        PORTUGUESE_VOICES
    }

    pub async fn generate(
        &self,
        text: &str,
        voice: Option<&str>,
        rate: Option<&Adjustment>,
        pitch: Option<&Adjustment>,
    ) -> Result<String> {
        if text.trim().is_empty() {
            return Err(AppError::InvalidInput("Text is required".to_string()));
        }

        let voice = voice
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(&self.tts.config().default_voice);
        let rate = rate.map(|r| r.format("%")).unwrap_or_else(|| "+0%".to_string());
        let pitch = pitch.map(|p| p.format("Hz")).unwrap_or_else(|| "+0Hz".to_string());

        let audio = self.tts.synthesize(text, voice, &rate, &pitch).await?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let filename = format!("speech_{}.mp3", Uuid::new_v4().simple());
        tokio::fs::write(self.output_dir.join(&filename), &audio).await?;

        info!(filename = %filename, voice, rate = %rate, pitch = %pitch, "voice generated");
        Ok(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;

    async fn spawn_tts() -> String {
        let router = Router::new().route(
            "/v1/audio/speech",
            post(|Json(body): Json<Value>| async move {
                format!("mp3:{}:{}:{}", body["voice"].as_str().unwrap(), body["rate"].as_str().unwrap(), body["input"].as_str().unwrap())
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn tts(endpoint: String) -> Arc<TtsClient> {
        Arc::new(
            TtsClient::new(SpeechConfig {
                endpoint,
                timeout_secs: 5,
                ..SpeechConfig::default()
            })
            .unwrap(),
        )
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(
            clean_text("Olá!! 😀   a IA   usa a API #top"),
            "Olá!! a Inteligência Artificial usa a Interface de Programação top"
        );
        assert_eq!(clean_text("FIAT e TTS."), "FIAT e Síntese de fala.");
        assert_eq!(clean_text("(ok) 'sim' \"não\""), "(ok) 'sim' \"não\"");
    }

    #[test]
    fn test_estimate_duration() {
        assert_eq!(estimate_duration("poucas palavras"), 1.0);
        let long = vec!["palavra"; 200].join(" ");
        assert_eq!(estimate_duration(&long), 1.33);
    }

    #[test]
    fn test_safe_text_and_title() {
        assert_eq!(safe_text("Olá, tudo bem? Sim!"), "Olá_tudo_bem_Sim");
        let long = "a".repeat(61);
        assert_eq!(title_for(&long), format!("{}...", "a".repeat(60)));
        assert_eq!(title_for("curto"), "curto");
    }

    #[test]
    fn test_adjustment_format() {
        assert_eq!(Adjustment::Int(10).format("%"), "+10%");
        assert_eq!(Adjustment::Int(-5).format("Hz"), "-5Hz");
        assert_eq!(Adjustment::Int(0).format("%"), "+0%");
        assert_eq!(Adjustment::Text("10%".into()).format("%"), "+10%");
        assert_eq!(Adjustment::Text("-20%".into()).format("%"), "-20%");
        assert_eq!(Adjustment::Text("5".into()).format("Hz"), "+5Hz");
        assert_eq!(Adjustment::Text("".into()).format("Hz"), "+0Hz");
    }

    #[test]
    fn test_rate_to_speed() {
        assert!((rate_to_speed("-10%") - 0.9).abs() < 1e-6);
        assert!((rate_to_speed("+50%") - 1.5).abs() < 1e-6);
        assert_eq!(rate_to_speed("fast"), 1.0);
    }

    #[test]
    fn test_voice_mapping() {
        let client = tts("http://127.0.0.1:1".to_string());
        assert_eq!(client.voice_for("karen_pt"), "pt-BR-FranciscaNeural");
        assert_eq!(client.voice_for("male_pt"), "pt-BR-AntonioNeural");
        assert_eq!(client.voice_for("unknown"), "pt-BR-FranciscaNeural");
    }

    #[test]
    fn test_metadata_keeps_original_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(METADATA_FILE);

        let mut log = SpeechLog::default();
        log.insert(
            "ai_speech_1.mp3".to_string(),
            SpeechEntry {
                text: "Oi 😀 tudo bem?".to_string(),
                voice: "karen_pt".to_string(),
                date: Local::now().naive_local(),
                duration: 1.0,
                file_path: "x".to_string(),
            },
        );
        log.save(&path).unwrap();

        let loaded = SpeechLog::load(&path);
        assert_eq!(loaded.get("ai_speech_1.mp3"), log.get("ai_speech_1.mp3"));
        assert_eq!(loaded.get("ai_speech_1.mp3").unwrap().text, "Oi 😀 tudo bem?");
    }

    #[test]
    fn test_load_accepts_fractional_seconds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(METADATA_FILE);
        std::fs::write(
            &path,
            r#"{"a.mp3": {"text": "oi", "voice": "karen_pt", "date": "2024-05-01T10:20:30.123456", "duration": 1, "file_path": "a.mp3"}}"#,
        )
        .unwrap();

        let log = SpeechLog::load(&path);
        assert_eq!(log.len(), 1);
        assert_eq!(log.get("a.mp3").unwrap().duration, 1.0);
    }

    #[tokio::test]
    async fn test_speech_manager_lifecycle() {
        let url = spawn_tts().await;
        let dir = tempfile::tempdir().unwrap();
        let manager = SpeechManager::new(tts(url), dir.path().to_path_buf()).unwrap();

        let saved = manager.text_to_speech("Olá! A IA chegou 🚀", "male_pt").await.unwrap();
        assert!(saved.filename.starts_with("ai_speech_"));
        assert!(saved.filename.ends_with("_Olá_A_Inteligência_Artificial.mp3"));
        assert_eq!(saved.url, format!("/static/ai_speeches/{}", saved.filename));

        let audio = std::fs::read_to_string(&saved.path).unwrap();
        assert_eq!(audio, "mp3:pt-BR-AntonioNeural:-10%:Olá! A Inteligência Artificial chegou");

        assert_eq!(
            manager.speech_text(&saved.filename).await.as_deref(),
            Some("Olá! A IA chegou 🚀")
        );
        assert_eq!(manager.speech_list().await.len(), 1);
        assert_eq!(manager.search_speeches("CHEGOU").await.len(), 1);
        assert!(manager.search_speeches("ausente").await.is_empty());

        let reloaded = SpeechLog::load(&dir.path().join(METADATA_FILE));
        assert_eq!(reloaded.len(), 1);

        assert!(manager.delete_speech(&saved.filename).await.unwrap());
        assert!(!saved.path.exists());
        assert!(manager.speech_list().await.is_empty());
        assert!(!manager.delete_speech(&saved.filename).await.unwrap());
        assert!(manager.delete_speech("../config.json").await.is_err());
    }

    #[tokio::test]
    async fn test_same_second_speeches_do_not_collide() {
        let url = spawn_tts().await;
        let dir = tempfile::tempdir().unwrap();
        let manager = SpeechManager::new(tts(url), dir.path().to_path_buf()).unwrap();

        let first = manager.text_to_speech("mesma frase", "karen_pt").await.unwrap();
        let second = manager.text_to_speech("mesma frase", "karen_pt").await.unwrap();

        assert_ne!(first.filename, second.filename);
        assert!(first.path.exists() && second.path.exists());
        assert_eq!(manager.speech_list().await.len(), 2);
    }

    #[tokio::test]
    async fn test_unsaved_metadata_leaves_no_entry() {
        let url = spawn_tts().await;
        let dir = tempfile::tempdir().unwrap();
        // A directory in place of the metadata file makes every save fail.
        std::fs::create_dir(dir.path().join(METADATA_FILE)).unwrap();
        let manager = SpeechManager::new(tts(url), dir.path().to_path_buf()).unwrap();

        assert!(manager.text_to_speech("olá", "karen_pt").await.is_err());
        assert!(manager.speech_list().await.is_empty());

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".mp3"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_failed_speech_adds_no_entry() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SpeechManager::new(tts("http://127.0.0.1:1".to_string()), dir.path().to_path_buf()).unwrap();

        assert!(manager.text_to_speech("olá", "karen_pt").await.is_err());
        assert!(manager.speech_list().await.is_empty());
    }

    #[tokio::test]
    async fn test_voice_engine_formats_rate() {
        let url = spawn_tts().await;
        let dir = tempfile::tempdir().unwrap();
        let engine = VoiceEngine::new(tts(url), dir.path().to_path_buf());

        let filename = engine
            .generate("bom dia", None, Some(&Adjustment::Int(15)), Some(&Adjustment::Text("2".into())))
            .await
            .unwrap();
        assert!(filename.starts_with("speech_") && filename.ends_with(".mp3"));

        let audio = std::fs::read_to_string(dir.path().join(&filename)).unwrap();
        assert_eq!(audio, "mp3:pt-BR-FranciscaNeural:+15%:bom dia");
        assert!(!engine.voices().is_empty());
    }
}
