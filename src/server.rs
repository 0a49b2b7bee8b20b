use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::Method;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::audio::AudioGenerator;
use crate::chat::{contains_any, ChatEngine, ChatMessage, ChatOptions};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::image::{GenerationOutcome, ImageGenerator};
use crate::personality::{Personality, PersonalitySettings};
use crate::prompt::PromptEnhancer;
use crate::speech::{Adjustment, SpeechManager, TtsClient, VoiceEngine};

pub const AUDIO_URL_PREFIX: &str = "/static/audio_generated";

const STUDIO_INSTRUCTION: &str = "Você é o assistente criativo de um estúdio de IA. \
Ajude o usuário a ter ideias de imagens, músicas e vozes. Quando sugerir uma imagem, \
escreva o prompt em inglês numa única linha.";

const PROMPT_HINTS: &[&str] = &["prompt", "imagem", "image", "desenh", "foto", "ideia", "pintura"];

/// Long-lived engines shared by every request.
pub struct AppState {
    pub config: Config,
    pub personality: Mutex<Personality>,
    pub chat: Arc<ChatEngine>,
    pub prompts: PromptEnhancer,
    pub images: ImageGenerator,
    pub music: AudioGenerator,
    pub speech: SpeechManager,
    pub voice: VoiceEngine,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let chat = Arc::new(ChatEngine::new(config.chat.clone())?);
        let personality = Personality::new(&config.personality)?.with_chat_provider(chat.default_provider());
        let tts = Arc::new(TtsClient::new(config.speech.clone())?);

        Ok(AppState {
            personality: Mutex::new(personality),
            prompts: PromptEnhancer::new(chat.clone()),
            images: ImageGenerator::new(config.image.clone(), config.images_dir())?,
            music: AudioGenerator::new(config.audio.clone(), config.audio_dir()),
            speech: SpeechManager::new(tts.clone(), config.speech_dir())?,
            voice: VoiceEngine::new(tts, config.audio_dir()),
            chat,
            config,
        })
    }
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        // Image studio
        .route("/generate", post(generate_image_handler))
        .route("/progress", get(progress_handler))
        .route("/cancel", post(cancel_handler))
        .route("/magic-prompt", post(magic_prompt_handler))
        .route("/chat", post(studio_chat_handler))
        // Personality
        .route("/api/ai-chat", post(ai_chat_handler))
        .route("/api/ai-idle", get(ai_idle_handler))
        .route("/api/ai-state", get(ai_state_handler))
        .route("/api/ai-settings", post(ai_settings_handler))
        .route("/api/ai-recharge", post(ai_recharge_handler))
        .route("/api/ai-memory", get(ai_memory_handler))
        // Audio
        .route("/generate-audio", post(generate_audio_handler))
        .route("/speak", post(speak_handler))
        .route("/api/voices", get(voices_handler))
        .route("/api/audios", get(list_speeches_handler))
        .route("/api/audios/search", get(search_speeches_handler))
        .route(
            "/api/audios/{filename}",
            get(speech_text_handler).delete(delete_speech_handler),
        )
        .layer(
            ServiceBuilder::new().layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::GET, Method::POST, Method::DELETE])
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}

pub async fn run(state: SharedState) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local: SocketAddr = listener.local_addr()?;

    info!(%local, media = %state.config.media_dir().display(), "aistudio server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    prompt: String,
    steps: Option<u32>,
    premium: Option<bool>,
}

async fn generate_image_handler(
    State(state): State<SharedState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<Value>> {
    match state.images.generate(&request.prompt, request.steps, request.premium).await? {
        GenerationOutcome::Completed(image) => Ok(Json(serde_json::to_value(image)?)),
        GenerationOutcome::Cancelled => Ok(Json(json!({ "status": "cancelled" }))),
    }
}

async fn progress_handler(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({ "progress": state.images.progress() }))
}

async fn cancel_handler(State(state): State<SharedState>) -> Json<Value> {
    state.images.cancel();
    Json(json!({ "status": "cancelling" }))
}

#[derive(Debug, Deserialize)]
struct MagicPromptRequest {
    idea: String,
}

async fn magic_prompt_handler(
    State(state): State<SharedState>,
    Json(request): Json<MagicPromptRequest>,
) -> Result<Json<Value>> {
    let idea = request.idea.trim();
    if idea.is_empty() {
        return Err(AppError::InvalidInput("Idea is required".to_string()));
    }

    let prompt = state.prompts.enhance(idea).await;
    Ok(Json(json!({ "prompt": prompt })))
}

#[derive(Debug, Deserialize)]
struct StudioChatRequest {
    message: String,
    #[serde(default)]
    history: Vec<ChatMessage>,
}

async fn studio_chat_handler(
    State(state): State<SharedState>,
    Json(request): Json<StudioChatRequest>,
) -> Result<Json<Value>> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(AppError::InvalidInput("Message is required".to_string()));
    }

    let options = ChatOptions {
        system_instruction: Some(STUDIO_INSTRUCTION.to_string()),
        ..ChatOptions::default()
    };
    let response = state.chat.chat(message, &request.history, &options).await;

    // Lets the front-end offer the reply as a ready-made image prompt.
    let action = contains_any(&message.to_lowercase(), PROMPT_HINTS);
    Ok(Json(json!({ "response": response, "action": action })))
}

fn default_speak() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct AiChatRequest {
    message: String,
    user_name: Option<String>,
    #[serde(default = "default_speak")]
    speak: bool,
}

async fn ai_chat_handler(
    State(state): State<SharedState>,
    Json(request): Json<AiChatRequest>,
) -> Result<Json<Value>> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(AppError::InvalidInput("Message is required".to_string()));
    }

    let turn = {
        let mut ai = state.personality.lock().await;
        ai.begin_turn(message, request.user_name.as_deref())
    };

    let reply = state.chat.try_chat(&turn.message, &turn.history, &turn.options).await;

    let (response, ai_state, voice) = {
        let mut ai = state.personality.lock().await;
        let response = ai.finish_turn(reply);
        (response, ai.state(), ai.preferred_voice.clone())
    };

    let audio_url = if request.speak {
        speak_reply(&state, &response, &voice).await
    } else {
        None
    };

    Ok(Json(json!({
        "response": response,
        "ai_state": ai_state,
        "audio_saved": audio_url.is_some(),
        "audio_url": audio_url,
    })))
}

async fn speak_reply(state: &AppState, text: &str, voice: &str) -> Option<String> {
    match state.speech.text_to_speech(text, voice).await {
        Ok(saved) => Some(saved.url),
        Err(e) => {
            warn!(error = %e, "reply will be sent without audio");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdleQuery {
    #[serde(default = "default_speak")]
    speak: bool,
}

async fn ai_idle_handler(State(state): State<SharedState>, Query(query): Query<IdleQuery>) -> Json<Value> {
    let (message, ai_state, voice) = {
        let mut ai = state.personality.lock().await;
        let message = ai.idle_message();
        (message, ai.state(), ai.preferred_voice.clone())
    };

    let Some(message) = message else {
        return Json(json!({ "should_speak": false, "ai_state": ai_state }));
    };

    let audio_url = if query.speak {
        speak_reply(&state, &message, &voice).await
    } else {
        None
    };

    Json(json!({
        "should_speak": true,
        "message": message,
        "ai_state": ai_state,
        "audio_url": audio_url,
    }))
}

async fn ai_state_handler(State(state): State<SharedState>) -> Json<Value> {
    let ai = state.personality.lock().await;
    Json(json!(ai.state()))
}

async fn ai_settings_handler(
    State(state): State<SharedState>,
    Json(settings): Json<PersonalitySettings>,
) -> Result<Json<Value>> {
    let mut ai = state.personality.lock().await;
    ai.apply_settings(settings)?;
    info!(name = %ai.name, kind = %ai.personality_type, "personality settings updated");

    Ok(Json(json!({ "status": "success", "ai_state": ai.state() })))
}

async fn ai_recharge_handler(State(state): State<SharedState>) -> Json<Value> {
    let mut ai = state.personality.lock().await;
    ai.recharge_energy();
    Json(json!({ "status": "success", "ai_state": ai.state() }))
}

async fn ai_memory_handler(State(state): State<SharedState>) -> Json<Value> {
    let ai = state.personality.lock().await;
    Json(json!(ai.memory_summary()))
}

#[derive(Debug, Deserialize)]
struct GenerateAudioRequest {
    prompt: String,
}

async fn generate_audio_handler(
    State(state): State<SharedState>,
    Json(request): Json<GenerateAudioRequest>,
) -> Result<Json<Value>> {
    let filename = state.music.generate(&request.prompt).await?;
    Ok(Json(json!({ "audio_url": format!("{}/{}", AUDIO_URL_PREFIX, filename) })))
}

#[derive(Debug, Deserialize)]
struct SpeakRequest {
    text: String,
    voice: Option<String>,
    rate: Option<Adjustment>,
    pitch: Option<Adjustment>,
}

async fn speak_handler(
    State(state): State<SharedState>,
    Json(request): Json<SpeakRequest>,
) -> Result<Json<Value>> {
    let filename = state
        .voice
        .generate(
            &request.text,
            request.voice.as_deref(),
            request.rate.as_ref(),
            request.pitch.as_ref(),
        )
        .await?;
    Ok(Json(json!({ "audio_url": format!("{}/{}", AUDIO_URL_PREFIX, filename) })))
}

async fn voices_handler(State(state): State<SharedState>) -> Json<Value> {
    Json(json!(state.voice.voices()))
}

async fn list_speeches_handler(State(state): State<SharedState>) -> Json<Value> {
    Json(json!(state.speech.speech_list().await))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

async fn search_speeches_handler(
    State(state): State<SharedState>,
    Query(query): Query<SearchQuery>,
) -> Json<Value> {
    Json(json!(state.speech.search_speeches(&query.q).await))
}

async fn speech_text_handler(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
) -> Result<Json<Value>> {
    let text = state
        .speech
        .speech_text(&filename)
        .await
        .ok_or_else(|| AppError::NotFound(filename.clone()))?;
    Ok(Json(json!({ "filename": filename, "text": text })))
}

async fn delete_speech_handler(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
) -> Result<Json<Value>> {
    if !state.speech.delete_speech(&filename).await? {
        return Err(AppError::NotFound(filename));
    }
    Ok(Json(json!({ "status": "deleted", "filename": filename })))
}
