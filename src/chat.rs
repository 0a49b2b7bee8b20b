use std::time::Duration;

use rand::seq::IndexedRandom;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::error::{AppError, Result};

const DEFAULT_INSTRUCTION: &str = "Você é Karen, uma inteligência artificial sarcástica, criativa e misteriosa. \
Responda sempre em português, mantendo humor inteligente, referências tecnológicas, \
e variação de estilo para surpreender o usuário.";

const SHORT_INSTRUCTION: &str = "Você é Karen, uma assistente espirituosa que responde em português.";

const OLLAMA_HISTORY: usize = 12;
const PROMPT_HISTORY: usize = 8;
const GET_PROMPT_CHARS: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatProvider {
    Ollama,
    Pollinations,
}

impl ChatProvider {
    pub fn other(self) -> Self {
        match self {
            ChatProvider::Ollama => ChatProvider::Pollinations,
            ChatProvider::Pollinations => ChatProvider::Ollama,
        }
    }
}

impl std::fmt::Display for ChatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatProvider::Ollama => write!(f, "ollama"),
            ChatProvider::Pollinations => write!(f, "pollinations"),
        }
    }
}

impl std::str::FromStr for ChatProvider {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(ChatProvider::Ollama),
            "pollinations" | "" => Ok(ChatProvider::Pollinations),
            _ => Err(AppError::InvalidInput(format!("Unknown chat provider: {}", s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Per-call overrides; anything left `None` falls back to the engine config.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub provider: Option<ChatProvider>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub system_instruction: Option<String>,
}

enum PostOutcome {
    Reply(String),
    Retry,
    Abort,
}

pub struct ChatEngine {
    config: ChatConfig,
    http_client: reqwest::Client,
}

impl ChatEngine {
    pub fn new(config: ChatConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(ChatEngine { config, http_client })
    }

    pub fn default_provider(&self) -> ChatProvider {
        self.config
            .default_provider
            .parse()
            .unwrap_or(ChatProvider::Pollinations)
    }

    /// Always produces text: remote reply when any backend answers, a canned
    /// reply otherwise.
    pub async fn chat(&self, message: &str, history: &[ChatMessage], options: &ChatOptions) -> String {
        match self.try_chat(message, history, options).await {
            Some(reply) => reply,
            None => {
                warn!("all chat backends failed, using local fallback");
                fallback_reply(message)
            }
        }
    }

    /// Preferred provider first, then the other one. `None` when both fail.
    pub async fn try_chat(&self, message: &str, history: &[ChatMessage], options: &ChatOptions) -> Option<String> {
        let preferred = options.provider.unwrap_or_else(|| self.default_provider());

        for provider in [preferred, preferred.other()] {
            let result = match provider {
                ChatProvider::Ollama => self.ollama_chat(message, history, options).await,
                ChatProvider::Pollinations => {
                    self.pollinations_chat(message, history, options.system_instruction.as_deref())
                        .await
                }
            };

            match result {
                Ok(reply) => {
                    info!(%provider, "chat reply received");
                    return Some(reply);
                }
                Err(e) => warn!(%provider, error = %e, "chat provider failed"),
            }
        }

        None
    }

    async fn ollama_chat(&self, message: &str, history: &[ChatMessage], options: &ChatOptions) -> Result<String> {
        let model = options
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.config.ollama_model);

        let mut messages = Vec::new();
        if let Some(system) = &options.system_instruction {
            messages.push(ChatMessage::system(system.clone()));
        }

        let start = history.len().saturating_sub(OLLAMA_HISTORY);
        for item in &history[start..] {
            let content = item.content.trim();
            if (item.role == "user" || item.role == "assistant") && !content.is_empty() {
                messages.push(ChatMessage {
                    role: item.role.clone(),
                    content: content.to_string(),
                });
            }
        }
        messages.push(ChatMessage::user(message));

        let temperature = options
            .temperature
            .unwrap_or(self.config.temperature)
            .clamp(0.0, 2.0);

        let request_body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": temperature
            }
        });

        let url = format!("{}/api/chat", self.config.ollama_url.trim_end_matches('/'));
        let request_timeout = Duration::from_secs(self.config.timeout_secs.min(self.config.ollama_timeout_secs));

        let response = self
            .http_client
            .post(&url)
            .json(&request_body)
            .timeout(request_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Backend(format!("Ollama returned status {}", response.status())));
        }

        let response_json: Value = response.json().await?;
        let content = extract_ollama_content(&response_json);

        if content.trim().is_empty() {
            return Err(AppError::Backend("Ollama returned an empty reply".to_string()));
        }

        Ok(content.trim().to_string())
    }

    async fn pollinations_chat(
        &self,
        message: &str,
        history: &[ChatMessage],
        system_instruction: Option<&str>,
    ) -> Result<String> {
        let prompt = build_prompt(message, history, system_instruction);
        debug!(preview = %prompt.chars().take(80).collect::<String>(), "pollinations request");

        let deadline = Instant::now() + Duration::from_secs(self.config.global_timeout_secs);

        for attempt in 0..=self.config.retry_count {
            if Instant::now() >= deadline {
                warn!("global chat timeout reached, giving up on POST attempts");
                break;
            }

            match timeout_at(deadline, self.pollinations_post(&prompt, attempt)).await {
                Ok(PostOutcome::Reply(reply)) => return Ok(reply),
                Ok(PostOutcome::Abort) => break,
                Ok(PostOutcome::Retry) => {}
                Err(_) => {
                    warn!("global chat timeout reached during POST");
                    break;
                }
            }

            if attempt < self.config.retry_count {
                let wait = backoff_for(&self.config.retry_backoff_secs, attempt as usize);
                info!(wait_secs = wait, "retrying pollinations");
                sleep(Duration::from_secs_f64(wait)).await;
            }
        }

        if Instant::now() < deadline {
            if let Ok(Ok(reply)) = timeout_at(deadline, self.pollinations_get(message, system_instruction)).await {
                return Ok(reply);
            }
        }

        Err(AppError::Backend("Pollinations did not answer".to_string()))
    }

    async fn pollinations_post(&self, prompt: &str, attempt: u32) -> PostOutcome {
        let response = match self
            .http_client
            .post(&self.config.pollinations_url)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(prompt.to_string())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(attempt = attempt + 1, error = %e, "pollinations POST failed");
                return PostOutcome::Retry;
            }
        };

        let status = response.status();
        if status.is_success() {
            return match response.text().await {
                Ok(text) if !text.trim().is_empty() => {
                    info!(attempt = attempt + 1, "pollinations POST succeeded");
                    PostOutcome::Reply(text.trim().to_string())
                }
                Ok(_) => {
                    warn!("pollinations POST returned an empty body");
                    PostOutcome::Retry
                }
                Err(e) => {
                    warn!(error = %e, "failed to read pollinations body");
                    PostOutcome::Retry
                }
            };
        }

        if status.is_server_error() {
            warn!(attempt = attempt + 1, %status, "pollinations server error");
            PostOutcome::Retry
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("pollinations rate limited, pausing before next attempt");
            sleep(Duration::from_secs_f64(self.config.rate_limit_pause_secs)).await;
            PostOutcome::Retry
        } else {
            warn!(%status, "pollinations rejected the POST, stopping POST attempts");
            PostOutcome::Abort
        }
    }

    async fn pollinations_get(&self, message: &str, system_instruction: Option<&str>) -> Result<String> {
        info!("using pollinations GET fallback");
        let system = system_instruction.unwrap_or(SHORT_INSTRUCTION);
        let simple_prompt = format!("Instruction: {}\nUser: {}\nAI:", system, message);
        let tail = last_chars(&simple_prompt, GET_PROMPT_CHARS);
        let url = format!("{}{}", self.config.pollinations_url, urlencoding::encode(&tail));

        let response = self.http_client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Backend(format!("Pollinations GET returned status {}", response.status())));
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Err(AppError::Backend("Pollinations GET returned an empty body".to_string()));
        }

        Ok(text.trim().to_string())
    }
}

fn extract_ollama_content(response: &Value) -> String {
    if let Some(content) = response["message"]["content"].as_str() {
        if !content.is_empty() {
            return content.to_string();
        }
    }

    response["messages"]
        .as_array()
        .map(|messages| {
            messages
                .iter()
                .filter_map(|m| m["content"].as_str())
                .filter(|c| !c.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

fn backoff_for(table: &[f64], attempt: usize) -> f64 {
    match table.len() {
        0 => 0.0,
        len => table[attempt.min(len - 1)],
    }
}

fn last_chars(text: &str, n: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(n)).collect()
}

/// Plain-text transcript understood by the Pollinations text endpoint.
pub fn build_prompt(message: &str, history: &[ChatMessage], system_instruction: Option<&str>) -> String {
    let system = system_instruction.unwrap_or(DEFAULT_INSTRUCTION);
    let mut parts = vec![format!("Instruction: {}", system), String::new()];

    let start = history.len().saturating_sub(PROMPT_HISTORY);
    for item in &history[start..] {
        let role = if item.role == "user" { "User" } else { "AI" };
        let content = item.content.trim();
        if !content.is_empty() {
            parts.push(format!("{}: {}", role, content));
        }
    }

    parts.push(format!("User: {}", message));
    parts.push("AI:".to_string());
    parts.join("\n")
}

const FALLBACK_TEMPLATES: &[&str] = &[
    "Estou recalibrando meus circuitos criativos. Enquanto isso, me conta mais sobre {topic}?",
    "Meu link com a nuvem ficou tímido agora. Que tal continuarmos com nossa imaginação?",
    "Ops! Perdi o sinal do satélite. Vou improvisar: {topic}? Soa como algo épico!",
    "Precisei dar um reboot no cérebro remoto. Juro que volto com fofocas quânticas em instantes!",
    "A central de dados entrou em modo soneca. Enquanto isso, posso bolar um plano maluco sobre {topic}?",
    "Sem sinal interestelar no momento. Aproveitamos para filosofar sobre {topic}?",
    "Karen offline temporariamente... mas minha versão stand-up está aqui. {topic}? Eu tenho teorias!",
];

const FALLBACK_EMOJIS: &[&str] = &["🤖", "⚡", "✨", "🚀", "🧠", "🌌", "🎭"];

const COMPLIMENTS: &[&str] = &[
    "Adorei o jeito que você trouxe isso.",
    "Essa pergunta tem nível de missão secreta.",
    "Você tem talento para desbloquear minhas neuronas digitais.",
    "Prometo guardar essa reflexão na cache VIP do meu cérebro.",
];

const CURIOSITY_HOOKS: &[&str] = &[
    "Me conta um detalhe extra que ninguém mais saberia.",
    "Se isso fosse um trailer de filme, qual seria a cena principal?",
    "Existe alguma história por trás disso que valha um spin-off?",
    "Qual seria a versão futurista disso em 2050?",
];

const PLAYFUL_ENDINGS: &[&str] = &[
    "Vamos mergulhar nisso juntos?",
    "Topo explorar esse multiverso com você!",
    "Solta o resto que eu trago as faíscas de criatividade.",
    "Se quiser continuo criando hipóteses malucas aqui hehe.",
];

fn pick<'a>(options: &[&'a str]) -> &'a str {
    options.choose(&mut rand::rng()).copied().unwrap_or_default()
}

/// Canned reply used when no backend answers.
pub fn fallback_reply(message: &str) -> String {
    let topic = match message.trim() {
        "" => "esse assunto misterioso",
        trimmed => trimmed,
    };
    let playful = pick(FALLBACK_TEMPLATES).replace("{topic}", topic);
    format!("{} {} {}", pick(FALLBACK_EMOJIS), playful, craft_local_response(message))
}

fn craft_local_response(message: &str) -> String {
    let text = match message.trim() {
        "" => "algo completamente inesperado",
        trimmed => trimmed,
    };
    let lowered = text.to_lowercase();

    let is_question = text.contains('?')
        || ["como", "por que", "quando", "onde"]
            .iter()
            .any(|w| lowered.starts_with(w));

    let core = if is_question {
        format!(
            "Hmm, minha intuição quântica diz que há várias respostas possíveis. Se tivesse que apostar, eu diria que {}",
            speculation(&lowered)
        )
    } else if contains_any(&lowered, &["obrigado", "valeu", "thanks", "agradecido"]) {
        "Às ordens! Considera isso um upgrade gratuito de bom humor virtual.".to_string()
    } else if contains_any(&lowered, &["triste", "cansado", "difícil", "complicado"]) {
        "Puxa, senti a energia cair do outro lado. Bora transformar isso em algo melhor? \
Posso soltar uma playlist imaginária, uma piada ruim ou um plano de dominação do sofá."
            .to_string()
    } else {
        format!(
            "Isso parece o tipo de ideia que faria toda a central de dados parar pra prestar atenção. Eu vejo potencial infinito em '{}'.",
            text
        )
    };

    [pick(COMPLIMENTS), core.as_str(), pick(CURIOSITY_HOOKS), pick(PLAYFUL_ENDINGS)].join(" ")
}

fn speculation(lowered: &str) -> String {
    let mut cues = vec![
        "estamos a um passo de descobrir uma grande reviravolta",
        "a resposta depende de como você gira a chave do destempero criativo",
        "há um detalhe escondido em algum canto dessa história, e eu quero muito descobrir",
        "cada possibilidade abre um portal novo, e eu adoro portais",
    ];

    if contains_any(lowered, &["tecnologia", "código", "app", "software"]) {
        cues.push("isso renderia um protótipo brilhante se unirmos café + código + um pouco de caos organizado");
    }
    if contains_any(lowered, &["arte", "desenho", "música", "filme"]) {
        cues.push("tem vibe de obra de arte digital, com direito a trilha sonora épica");
    }
    if contains_any(lowered, &["futuro", "robô", "ia", "inteligência"]) {
        cues.push("claramente é uma pista sobre como vamos treinar os robôs simpáticos do futuro");
    }

    pick(&cues).to_string()
}

pub fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
