use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::audio::AudioGenerator;
use crate::chat::ChatEngine;
use crate::config::Config;
use crate::image::{GenerationOutcome, ImageGenerator};
use crate::personality::Personality;
use crate::prompt::PromptEnhancer;
use crate::server::{self, AppState};
use crate::speech::{Adjustment, SpeechManager, TtsClient, VoiceEngine};

pub async fn handle_server(data_dir: Option<PathBuf>, port: Option<u16>) -> Result<()> {
    let mut config = Config::new(data_dir).context("Failed to load configuration")?;
    if let Some(port) = port {
        config.server.port = port;
    }

    let state = AppState::new(config).context("Failed to initialise engines")?;
    println!("🚀 Starting aistudio on {}:{}", state.config.server.host, state.config.server.port);
    println!("📁 Media directory: {}", state.config.media_dir().display());

    server::run(Arc::new(state)).await.context("Server error")?;
    Ok(())
}

pub async fn handle_chat(data_dir: Option<PathBuf>, message: String, user_name: Option<String>) -> Result<()> {
    let config = Config::new(data_dir)?;
    let chat = ChatEngine::new(config.chat.clone())?;
    let mut personality = Personality::new(&config.personality)?.with_chat_provider(chat.default_provider());

    let response = personality
        .process_user_message(&chat, &message, user_name.as_deref())
        .await;
    let state = personality.state();

    println!("You: {}", message);
    println!("{}: {}", state.name, response);
    println!("\nMood: {} ({}/100) | Energy: {}/100", state.mood, state.mood_value, state.energy_level);
    if !state.topics_discussed.is_empty() {
        println!("Topics: {}", state.topics_discussed.join(", "));
    }
    Ok(())
}

pub async fn handle_idle(data_dir: Option<PathBuf>, polls: u32) -> Result<()> {
    let config = Config::new(data_dir)?;
    let mut personality = Personality::new(&config.personality)?;

    for poll in 1..=polls {
        if let Some(message) = personality.idle_message() {
            println!("💭 {} (poll {}): {}", personality.name, poll, message);
            return Ok(());
        }
    }

    println!("🤐 {} stayed quiet for {} polls", personality.name, polls);
    Ok(())
}

pub async fn handle_image(data_dir: Option<PathBuf>, prompt: String, steps: Option<u32>, premium: bool) -> Result<()> {
    let config = Config::new(data_dir)?;
    let generator = ImageGenerator::new(config.image.clone(), config.images_dir())?;

    let premium = premium.then_some(true);
    match generator.generate(&prompt, steps, premium).await? {
        GenerationOutcome::Completed(image) => {
            println!("✅ Saved {}", image.path.display());
            println!("Backend: {} | Steps: {} | Time: {}s", image.device, image.steps, image.duration);
        }
        GenerationOutcome::Cancelled => println!("⚠️  Generation cancelled"),
    }
    Ok(())
}

pub async fn handle_enhance(data_dir: Option<PathBuf>, idea: String) -> Result<()> {
    let config = Config::new(data_dir)?;
    let enhancer = PromptEnhancer::new(Arc::new(ChatEngine::new(config.chat.clone())?));

    println!("{}", enhancer.enhance(&idea).await);
    Ok(())
}

pub async fn handle_music(data_dir: Option<PathBuf>, prompt: String) -> Result<()> {
    let config = Config::new(data_dir)?;
    let output_dir = config.audio_dir();
    let generator = AudioGenerator::new(config.audio.clone(), output_dir.clone());

    let filename = generator.generate(&prompt).await?;
    println!("🎵 Saved {}", output_dir.join(filename).display());
    Ok(())
}

pub async fn handle_speak(
    data_dir: Option<PathBuf>,
    text: String,
    voice: Option<String>,
    rate: Option<String>,
    pitch: Option<String>,
) -> Result<()> {
    let config = Config::new(data_dir)?;
    let output_dir = config.audio_dir();
    let engine = VoiceEngine::new(Arc::new(TtsClient::new(config.speech.clone())?), output_dir.clone());

    let rate = rate.map(Adjustment::Text);
    let pitch = pitch.map(Adjustment::Text);
    let filename = engine
        .generate(&text, voice.as_deref(), rate.as_ref(), pitch.as_ref())
        .await?;
    println!("🔊 Saved {}", output_dir.join(filename).display());
    Ok(())
}

pub async fn handle_speeches(data_dir: Option<PathBuf>, search: Option<String>) -> Result<()> {
    let config = Config::new(data_dir)?;
    let manager = SpeechManager::new(Arc::new(TtsClient::new(config.speech.clone())?), config.speech_dir())?;

    let speeches = match search.as_deref() {
        Some(query) => manager.search_speeches(query).await,
        None => manager.speech_list().await,
    };

    if speeches.is_empty() {
        println!("No speeches recorded yet.");
        return Ok(());
    }

    for speech in speeches {
        println!("🎙️  {}  {}", speech.date.format("%Y-%m-%d %H:%M:%S"), speech.title);
        println!("    {} ({:.2} min)", speech.filename, speech.duration);
    }
    Ok(())
}
