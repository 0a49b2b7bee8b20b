use std::sync::Arc;

use tracing::{debug, warn};

use crate::chat::{ChatEngine, ChatOptions};

const QUALITY_BOOSTERS: &str = ", highly detailed, 8k, sharp focus, cinematic lighting";
const FALLBACK_BOOSTERS: &str = ", highly detailed, photorealistic, 8k";

const PROMPT_INSTRUCTION: &str = "You write prompts for an image generator. \
Continue the given text as a single comma-separated list of visual styles, artists, \
lighting and camera details. Reply with the continued prompt only, in English, on one line.";

/// Turns a short idea ("gato") into a full image prompt.
pub struct PromptEnhancer {
    chat: Arc<ChatEngine>,
}

impl PromptEnhancer {
    pub fn new(chat: Arc<ChatEngine>) -> Self {
        PromptEnhancer { chat }
    }

    pub async fn enhance(&self, idea: &str) -> String {
        let seed = seed_text(idea);
        let options = ChatOptions {
            temperature: Some(0.8),
            system_instruction: Some(PROMPT_INSTRUCTION.to_string()),
            ..ChatOptions::default()
        };

        match self.chat.try_chat(&seed, &[], &options).await {
            Some(generated) => {
                let prompt = finish_prompt(&seed, &generated);
                debug!(idea, prompt = %prompt, "enhanced prompt");
                prompt
            }
            None => {
                warn!(idea, "prompt enhancement failed, using boosters only");
                format!("{}{}", idea, FALLBACK_BOOSTERS)
            }
        }
    }
}

fn seed_text(idea: &str) -> String {
    let mut seed = idea.trim().to_string();
    if !seed.ends_with(',') {
        seed.push(',');
    }
    seed
}

/// Joins the seed and the model continuation, flattening newlines and
/// making sure the quality keywords are present.
fn finish_prompt(seed: &str, generated: &str) -> String {
    let generated = generated.trim();
    let combined = if generated.starts_with(seed.trim_end_matches(',')) {
        generated.to_string()
    } else {
        format!("{} {}", seed, generated)
    };

    let mut prompt = combined
        .split(['\n', '\r'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if !prompt.contains("detailed") {
        prompt.push_str(QUALITY_BOOSTERS);
    }
    prompt
}
