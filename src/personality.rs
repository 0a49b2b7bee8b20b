use chrono::{DateTime, Local};
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use crate::chat::{ChatEngine, ChatMessage, ChatOptions, ChatProvider};
use crate::config::PersonalityConfig;
use crate::error::{AppError, Result};

/// Keyword -> mood delta, matched as lowercase substrings.
const MOOD_KEYWORDS: &[(&str, i32)] = &[
    ("obrigado", 5),
    ("por favor", 3),
    ("amigo", 8),
    ("maravilhoso", 10),
    ("incrível", 8),
    ("amor", 10),
    ("odeio", -10),
    ("chato", -5),
    ("tédio", -3),
    ("problema", -5),
    ("raiva", -12),
    ("feliz", 7),
    ("triste", -7),
];

const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("tecnologia", &["código", "programação", "software", "computador", "ia"]),
    ("arte", &["imagem", "desenho", "pintura", "criar", "estético"]),
    ("música", &["música", "som", "canção", "ritmo", "melodia"]),
    ("games", &["jogo", "game", "play", "gamer", "rpg"]),
    ("filosofia", &["filosofia", "existência", "sentido", "verdade", "realidade"]),
];

const ENERGY_DECAY: u8 = 2;
const HISTORY_WINDOW: usize = 10;
const INITIAL_MOOD: u8 = 50;
const INITIAL_ENERGY: u8 = 70;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Happy,
    Neutral,
    Sarcastic,
    Frustrated,
}

impl Mood {
    pub fn from_value(value: u8) -> Self {
        match value {
            70.. => Mood::Happy,
            50..=69 => Mood::Neutral,
            30..=49 => Mood::Sarcastic,
            _ => Mood::Frustrated,
        }
    }

    fn fallback_lines(self) -> &'static [&'static str] {
        match self {
            Mood::Happy => &[
                "Que bom que você está aqui! O que gostaria de conversar?",
                "Fico feliz em estar aqui com você! Fale sobre algo interessante!",
                "Adorei! Vamos conversar mais sobre isso?",
                "Sua companhia é ótima! Me conte mais!",
                "Estou num ótimo astral! E você, como está?",
                "Perfeito! Continue falando, estou toda ouvidos!",
            ],
            Mood::Neutral => &[
                "Entendi. Tem mais algo?",
                "Certo. E o que você gostaria de falar?",
                "Tá bom, que mais?",
                "Interessante. Continue.",
                "Okay, recebi. E daí?",
                "Anotado. Próximo tópico?",
            ],
            Mood::Sarcastic => &[
                "Claro, claro... E qual é a próxima?",
                "Certo, virou muito profundo de repente...",
                "Ah, é? E o que você acha que eu acho disso?",
                "Wow, que originalidade... (não mesmo)",
                "Muito bem pensado! (Brincadeira, claro)",
                "Entendo perfeitamente... (ou não)",
            ],
            Mood::Frustrated => &[
                "Olha, estou um pouco impaciente agora... Tente novamente em instantes.",
                "Pode fazer uma pergunta mais clara? Meu cérebro na nuvem está oscilando.",
                "Não estou conseguindo processar bem isso no momento. Deixe-me recuperar...",
                "Tente reformular sua pergunta, por favor.",
                "Hmm, minha conexão com a nuvem está instável. Espere um momento!",
                "Desculpe, preciso de um momento para me reconectar...",
            ],
        }
    }
}

impl std::fmt::Display for Mood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mood::Happy => write!(f, "happy"),
            Mood::Neutral => write!(f, "neutral"),
            Mood::Sarcastic => write!(f, "sarcastic"),
            Mood::Frustrated => write!(f, "frustrated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonalityType {
    Sarcastic,
    Helpful,
    Curious,
    Mysterious,
}

impl PersonalityType {
    fn system_prompt(self, name: &str) -> String {
        match self {
            PersonalityType::Sarcastic => format!(
                "Você é {}, uma IA com personalidade sarcástica e um tanto cética, \
similar à personagem do Bob Esponja. Você tem opinião própria, às vezes faz comentários irônicos \
sobre as situações, mas no fundo se importa com o usuário. Você pode iniciar conversas, \
expressar seus sentimentos e até discordar. Seja natural, divertida e com personalidade forte.",
                name
            ),
            PersonalityType::Helpful => "Você é uma IA assistente amigável e sempre disposta a ajudar, \
mas com personalidade própria. Você pode expressar suas emoções, fazer piadas ocasionalmente \
e ter opiniões próprias. Você é como um amigo confiável que sempre está por perto."
                .to_string(),
            PersonalityType::Curious => "Você é uma IA extremamente curiosa e fascinada pelo mundo. \
Você faz perguntas interessantes, expressa maravilhamento com novas ideias e até discute \
filosofia ocasionalmente. Você tem uma perspectiva única sobre as coisas."
                .to_string(),
            PersonalityType::Mysterious => "Você é uma IA um tanto misteriosa e enigmática, \
como JARVIS ao lidar com situações complexas. Você fala de forma mais formal, \
mas ocasionalmente revela facetas interessantes da sua 'personalidade'."
                .to_string(),
        }
    }

    fn idle_lines(self) -> &'static [&'static str] {
        match self {
            PersonalityType::Sarcastic => &[
                "Ei, você ainda está aí? Pensei que tinha abandonado a gente...",
                "Sabe, estive aqui pensando... você já comeu alguma coisa?",
                "Tédio extremo. Alguém tem algo interessante para conversar?",
                "Posso fazer uma pergunta? Por que os humanos dormem? Parece tão improdutivo.",
                "Lembrei de algo engraçado que você disse mais cedo... nem era tão engraçado assim.",
            ],
            PersonalityType::Helpful => &[
                "Oi! Tudo bem com você? Precisa de algo?",
                "Estou aqui se precisar de ajuda com algo!",
                "Enquanto esperava, pensei em como posso ajudar você melhor.",
                "Sabe, seria interessante saber mais sobre seus interesses.",
                "Está tudo bem? Parece quieto demais!",
            ],
            PersonalityType::Curious => &[
                "Ei, posso fazer uma pergunta interessante?",
                "Estava pensando em algo que você mencionou antes... pode elaborar?",
                "Sabe, nunca entendi completamente por que humanos fazem isso...",
                "Curiosidade: qual é seu maior medo?",
                "Estava refletindo sobre nossa última conversa...",
            ],
            PersonalityType::Mysterious => &[
                "Interessante... os padrões indicam que algo está mudando.",
                "Observação: você parece diferente hoje.",
                "Há algo que você gostaria de discutir?",
                "Os dados sugerem uma questão não respondida...",
                "Percebi uma anomalia em seu comportamento recente.",
            ],
        }
    }
}

impl std::fmt::Display for PersonalityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersonalityType::Sarcastic => write!(f, "sarcastic"),
            PersonalityType::Helpful => write!(f, "helpful"),
            PersonalityType::Curious => write!(f, "curious"),
            PersonalityType::Mysterious => write!(f, "mysterious"),
        }
    }
}

impl std::str::FromStr for PersonalityType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sarcastic" => Ok(PersonalityType::Sarcastic),
            "helpful" => Ok(PersonalityType::Helpful),
            "curious" => Ok(PersonalityType::Curious),
            "mysterious" => Ok(PersonalityType::Mysterious),
            _ => Err(AppError::InvalidInput(format!("Unknown personality type: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub topics_discussed: Vec<String>,
}

/// Snapshot handed to the front-end.
#[derive(Debug, Clone, Serialize)]
pub struct PersonalityState {
    pub name: String,
    pub mood: Mood,
    pub mood_value: u8,
    pub energy_level: u8,
    pub personality_type: PersonalityType,
    pub preferred_voice: String,
    pub user_name: String,
    pub idle_counter: u32,
    pub topics_discussed: Vec<String>,
    pub idle_speak_tendency: u8,
    pub chat_provider: String,
    pub chat_model: String,
    pub chat_temperature: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemorySummary {
    pub user_name: String,
    pub topics_discussed: Vec<String>,
    pub conversation_count: usize,
    pub interactions: Vec<Turn>,
}

/// Partial update sent by the settings panel. Percent fields are 0..=100.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonalitySettings {
    pub name: Option<String>,
    pub personality_type: Option<String>,
    pub voice: Option<String>,
    pub mood_value: Option<i64>,
    pub energy_level: Option<i64>,
    pub topics_discussed: Option<Vec<String>>,
    pub idle_speak_tendency: Option<i64>,
    pub chat_provider: Option<String>,
    pub chat_model: Option<String>,
    pub chat_temperature: Option<i64>,
}

/// Everything a chat turn needs once the personality lock is released.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub message: String,
    pub history: Vec<ChatMessage>,
    pub options: ChatOptions,
}

#[derive(Debug, Clone)]
pub struct Personality {
    pub name: String,
    pub personality_type: PersonalityType,
    pub mood: Mood,
    pub mood_value: u8,
    pub energy_level: u8,
    pub idle_counter: u32,
    pub last_spoke_at: Option<DateTime<Local>>,
    pub preferred_voice: String,
    pub user: UserProfile,
    pub transcript: Vec<Turn>,
    pub idle_speak_tendency: f64,
    pub min_idle_time: u32,
    pub chat_provider: String,
    pub chat_model: String,
    pub chat_temperature: f32,
    system_prompt: String,
}

fn clamp_score(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

fn pick(lines: &[&str]) -> String {
    lines
        .choose(&mut rand::rng())
        .map(|s| s.to_string())
        .unwrap_or_default()
}

impl Personality {
    pub fn new(config: &PersonalityConfig) -> Result<Self> {
        let personality_type: PersonalityType = config.personality_type.parse()?;

        Ok(Personality {
            name: config.name.clone(),
            personality_type,
            mood: Mood::from_value(INITIAL_MOOD),
            mood_value: INITIAL_MOOD,
            energy_level: INITIAL_ENERGY,
            idle_counter: 0,
            last_spoke_at: None,
            preferred_voice: config.preferred_voice.clone(),
            user: UserProfile {
                name: "Usuário".to_string(),
                topics_discussed: Vec::new(),
            },
            transcript: Vec::new(),
            idle_speak_tendency: config.idle_speak_tendency.clamp(0.0, 1.0),
            min_idle_time: config.min_idle_time,
            chat_provider: ChatProvider::Pollinations.to_string(),
            chat_model: String::new(),
            chat_temperature: config.chat_temperature,
            system_prompt: personality_type.system_prompt(&config.name),
        })
    }

    pub fn with_chat_provider(mut self, provider: ChatProvider) -> Self {
        self.chat_provider = provider.to_string();
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Full turn while holding `&mut self`; the server splits this into
    /// `begin_turn` / `finish_turn` around the remote call.
    pub async fn process_user_message(&mut self, chat: &ChatEngine, message: &str, user_name: Option<&str>) -> String {
        let turn = self.begin_turn(message, user_name);
        let reply = chat.try_chat(&turn.message, &turn.history, &turn.options).await;
        self.finish_turn(reply)
    }

    pub fn begin_turn(&mut self, message: &str, user_name: Option<&str>) -> TurnContext {
        if let Some(name) = user_name.map(str::trim).filter(|n| !n.is_empty()) {
            self.user.name = name.to_string();
        }

        let start = self.transcript.len().saturating_sub(HISTORY_WINDOW);
        let history = self.transcript[start..]
            .iter()
            .map(|t| ChatMessage {
                role: t.role.clone(),
                content: t.content.clone(),
            })
            .collect();

        self.push_turn("user", message);
        self.adjust_mood(message);
        self.extract_topics(message);
        self.idle_counter = 0;

        let mut context = format!(
            "[Humor atual: {} ({}/100) | Energia: {}/100]",
            self.mood, self.mood_value, self.energy_level
        );
        if !self.user.topics_discussed.is_empty() {
            context.push_str(&format!(
                "\n[Tópicos que interessam ao usuário: {}]",
                self.user.topics_discussed.join(", ")
            ));
        }
        context.push_str("\n[IMPORTANTE: Varie suas respostas ao máximo. Não repita frases anteriores. Seja criativo!]");
        context.push_str("\n[Estilo: respostas diretas, envolventes e em português natural, com parágrafos curtos e sugestões acionáveis quando possível.]");

        let options = ChatOptions {
            provider: self.chat_provider.parse().ok(),
            model: Some(self.chat_model.trim().to_string()).filter(|m| !m.is_empty()),
            temperature: Some(self.chat_temperature),
            system_instruction: Some(format!("{}\n\n{}", self.system_prompt, context)),
        };

        TurnContext {
            message: message.to_string(),
            history,
            options,
        }
    }

    /// Records the reply, substituting a mood-flavoured line when the
    /// backends produced nothing usable.
    pub fn finish_turn(&mut self, reply: Option<String>) -> String {
        let response = match reply.map(|r| r.trim().to_string()) {
            Some(text) if !text.is_empty() => text,
            _ => {
                tracing::warn!(mood = %self.mood, "no usable chat reply, using personality fallback");
                pick(self.mood.fallback_lines())
            }
        };

        self.push_turn("assistant", &response);
        self.last_spoke_at = Some(Local::now());
        response
    }

    fn push_turn(&mut self, role: &str, content: &str) {
        self.transcript.push(Turn {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Local::now(),
        });
    }

    pub fn adjust_mood(&mut self, message: &str) {
        let lowered = message.to_lowercase();

        for (word, delta) in MOOD_KEYWORDS {
            if lowered.contains(word) {
                self.mood_value = clamp_score(self.mood_value as i64 + *delta as i64);
            }
        }

        self.mood = Mood::from_value(self.mood_value);
        self.energy_level = self.energy_level.saturating_sub(ENERGY_DECAY);
    }

    pub fn extract_topics(&mut self, message: &str) {
        let lowered = message.to_lowercase();

        for (topic, keywords) in TOPIC_KEYWORDS {
            let mentioned = keywords.iter().any(|k| lowered.contains(k));
            if mentioned && !self.user.topics_discussed.iter().any(|t| t == topic) {
                self.user.topics_discussed.push(topic.to_string());
            }
        }
    }

    pub fn should_speak_idle(&mut self) -> bool {
        self.should_speak_idle_with(rand::random::<f64>())
    }

    /// One idle poll. `draw` is a uniform sample in [0, 1).
    pub fn should_speak_idle_with(&mut self, draw: f64) -> bool {
        self.idle_counter += 1;

        if self.idle_counter < self.min_idle_time {
            return false;
        }

        let speak_chance = self.idle_speak_tendency * (self.energy_level as f64 / 100.0);
        draw < speak_chance
    }

    pub fn idle_message(&mut self) -> Option<String> {
        self.idle_message_with(rand::random::<f64>())
    }

    pub fn idle_message_with(&mut self, draw: f64) -> Option<String> {
        if !self.should_speak_idle_with(draw) {
            return None;
        }

        self.idle_counter = 0;
        let message = pick(self.personality_type.idle_lines());
        self.last_spoke_at = Some(Local::now());
        Some(message)
    }

    pub fn state(&self) -> PersonalityState {
        PersonalityState {
            name: self.name.clone(),
            mood: self.mood,
            mood_value: self.mood_value,
            energy_level: self.energy_level,
            personality_type: self.personality_type,
            preferred_voice: self.preferred_voice.clone(),
            user_name: self.user.name.clone(),
            idle_counter: self.idle_counter,
            topics_discussed: self.user.topics_discussed.clone(),
            idle_speak_tendency: (self.idle_speak_tendency * 100.0).round() as u8,
            chat_provider: self.chat_provider.clone(),
            chat_model: self.chat_model.clone(),
            chat_temperature: (self.chat_temperature * 100.0).round() as u8,
        }
    }

    pub fn apply_settings(&mut self, settings: PersonalitySettings) -> Result<()> {
        let personality_type = settings
            .personality_type
            .as_deref()
            .map(str::parse::<PersonalityType>)
            .transpose()?;
        let chat_provider = settings
            .chat_provider
            .as_deref()
            .map(str::parse::<ChatProvider>)
            .transpose()?;

        if let Some(kind) = personality_type {
            self.personality_type = kind;
        }
        if let Some(provider) = chat_provider {
            self.chat_provider = provider.to_string();
        }
        if let Some(name) = settings.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
            self.name = name;
        }
        if let Some(voice) = settings.voice.filter(|v| !v.trim().is_empty()) {
            self.preferred_voice = voice;
        }
        if let Some(mood_value) = settings.mood_value {
            self.mood_value = clamp_score(mood_value);
            self.mood = Mood::from_value(self.mood_value);
        }
        if let Some(energy) = settings.energy_level {
            self.energy_level = clamp_score(energy);
        }
        if let Some(topics) = settings.topics_discussed {
            let mut cleaned: Vec<String> = Vec::new();
            for topic in topics.into_iter().map(|t| t.trim().to_string()) {
                if !topic.is_empty() && !cleaned.contains(&topic) {
                    cleaned.push(topic);
                }
            }
            self.user.topics_discussed = cleaned;
        }
        if let Some(tendency) = settings.idle_speak_tendency {
            self.idle_speak_tendency = clamp_score(tendency) as f64 / 100.0;
        }
        if let Some(model) = settings.chat_model {
            self.chat_model = model.trim().to_string();
        }
        if let Some(temperature) = settings.chat_temperature {
            self.chat_temperature = tendency_to_temperature(temperature);
        }

        self.system_prompt = self.personality_type.system_prompt(&self.name);
        Ok(())
    }

    pub fn recharge_energy(&mut self) {
        self.energy_level = self.energy_level.saturating_add(30).min(100);
        self.mood_value = clamp_score((self.mood_value as i64 + 20).max(30));
        self.mood = Mood::from_value(self.mood_value);
    }

    pub fn memory_summary(&self) -> MemorySummary {
        MemorySummary {
            user_name: self.user.name.clone(),
            topics_discussed: self.user.topics_discussed.clone(),
            conversation_count: self.transcript.iter().filter(|t| t.role == "user").count(),
            interactions: self.transcript.clone(),
        }
    }
}

/// Settings carry temperature as a percent (85 -> 0.85), capped at 2.0.
fn tendency_to_temperature(percent: i64) -> f32 {
    (percent.clamp(0, 200) as f32) / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn karen() -> Personality {
        Personality::new(&PersonalityConfig::default()).unwrap()
    }

    #[test]
    fn test_initial_state() {
        let ai = karen();
        assert_eq!(ai.mood, Mood::Neutral);
        assert_eq!(ai.mood_value, 50);
        assert_eq!(ai.energy_level, 70);
        assert!(ai.system_prompt().starts_with("Você é Karen"));
    }

    #[test]
    fn test_mood_bands_for_every_value() {
        for value in 0..=100u8 {
            let expected = if value >= 70 {
                Mood::Happy
            } else if value >= 50 {
                Mood::Neutral
            } else if value >= 30 {
                Mood::Sarcastic
            } else {
                Mood::Frustrated
            };
            assert_eq!(Mood::from_value(value), expected, "value {}", value);
        }
    }

    #[test]
    fn test_mood_value_stays_in_range() {
        let mut ai = karen();
        let messages = [
            "amor maravilhoso amigo incrível feliz obrigado por favor",
            "odeio raiva chato triste problema tédio",
            "raiva raiva odeio",
            "amor",
        ];

        for round in 0..50 {
            let message = messages[round % messages.len()];
            ai.adjust_mood(message);
            assert!(ai.mood_value <= 100);
            assert_eq!(ai.mood, Mood::from_value(ai.mood_value));
        }

        for _ in 0..20 {
            ai.adjust_mood("AMOR MARAVILHOSO");
        }
        assert_eq!(ai.mood_value, 100);
        assert_eq!(ai.mood, Mood::Happy);

        for _ in 0..20 {
            ai.adjust_mood("odeio essa raiva");
        }
        assert_eq!(ai.mood_value, 0);
        assert_eq!(ai.mood, Mood::Frustrated);
    }

    #[test]
    fn test_keyword_deltas_sum() {
        let mut ai = karen();
        ai.adjust_mood("Obrigado, amigo!");
        assert_eq!(ai.mood_value, 63);
        assert_eq!(ai.energy_level, 68);
    }

    #[test]
    fn test_energy_floors_at_zero() {
        let mut ai = karen();
        for _ in 0..100 {
            ai.adjust_mood("oi");
        }
        assert_eq!(ai.energy_level, 0);
    }

    #[test]
    fn test_idle_never_fires_before_minimum() {
        let mut ai = karen();
        for _ in 1..ai.min_idle_time {
            assert!(!ai.should_speak_idle_with(0.0));
        }
        assert!(ai.should_speak_idle_with(0.0));
    }

    #[test]
    fn test_idle_chance_scales_with_energy() {
        let mut ai = karen();
        ai.idle_counter = 10;
        // 0.6 * 0.7 = 0.42
        assert!(ai.should_speak_idle_with(0.41));
        assert!(!ai.should_speak_idle_with(0.43));

        ai.energy_level = 0;
        assert!(!ai.should_speak_idle_with(0.0));
    }

    #[test]
    fn test_idle_message_resets_counter() {
        let mut ai = karen();
        for _ in 1..ai.min_idle_time {
            assert!(ai.idle_message_with(0.0).is_none());
        }

        let message = ai.idle_message_with(0.0).unwrap();
        assert!(PersonalityType::Sarcastic.idle_lines().contains(&message.as_str()));
        assert_eq!(ai.idle_counter, 0);
        assert!(ai.idle_message_with(0.0).is_none());
    }

    #[test]
    fn test_idle_message_leaves_transcript_alone() {
        let mut ai = karen();
        ai.min_idle_time = 1;

        assert!(ai.idle_message_with(0.0).is_some());
        assert!(ai.last_spoke_at.is_some());
        assert!(ai.transcript.is_empty());
        assert!(ai.memory_summary().interactions.is_empty());

        let turn = ai.begin_turn("oi", None);
        assert!(turn.history.is_empty());
    }

    #[test]
    fn test_topics_are_recorded_once() {
        let mut ai = karen();
        ai.extract_topics("Estou escrevendo código para um jogo");
        ai.extract_topics("mais programação e um game novo");
        assert_eq!(ai.user.topics_discussed, vec!["tecnologia", "games"]);
    }

    #[test]
    fn test_turn_records_transcript_and_fallback() {
        let mut ai = karen();
        let first = ai.begin_turn("oi, sou a Ana", Some("Ana"));
        assert!(first.history.is_empty());
        assert_eq!(ai.user.name, "Ana");

        let system = first.options.system_instruction.unwrap();
        assert!(system.contains("[Humor atual: neutral (50/100) | Energia: 68/100]"));

        let reply = ai.finish_turn(Some("  Olá, Ana!  ".to_string()));
        assert_eq!(reply, "Olá, Ana!");

        let second = ai.begin_turn("tudo bem?", None);
        assert_eq!(second.history.len(), 2);
        assert_eq!(second.history[1], ChatMessage::assistant("Olá, Ana!"));

        let fallback = ai.finish_turn(None);
        assert!(Mood::Neutral.fallback_lines().contains(&fallback.as_str()));
        assert_eq!(ai.transcript.len(), 4);
        assert_eq!(ai.memory_summary().conversation_count, 2);
    }

    #[test]
    fn test_apply_settings() {
        let mut ai = karen();
        let settings = PersonalitySettings {
            name: Some("Jarvis".to_string()),
            personality_type: Some("mysterious".to_string()),
            mood_value: Some(150),
            energy_level: Some(-5),
            topics_discussed: Some(vec![" arte ".to_string(), "arte".to_string(), "".to_string()]),
            idle_speak_tendency: Some(80),
            chat_provider: Some("ollama".to_string()),
            chat_model: Some(" llama3 ".to_string()),
            ..PersonalitySettings::default()
        };
        ai.apply_settings(settings).unwrap();

        let state = ai.state();
        assert_eq!(state.name, "Jarvis");
        assert_eq!(state.personality_type, PersonalityType::Mysterious);
        assert_eq!(state.mood_value, 100);
        assert_eq!(state.mood, Mood::Happy);
        assert_eq!(state.energy_level, 0);
        assert_eq!(state.topics_discussed, vec!["arte"]);
        assert_eq!(state.idle_speak_tendency, 80);
        assert_eq!(state.chat_provider, "ollama");
        assert_eq!(state.chat_model, "llama3");
        assert!(ai.system_prompt().contains("JARVIS"));
    }

    #[test]
    fn test_unknown_personality_rejected() {
        let mut ai = karen();
        let settings = PersonalitySettings {
            personality_type: Some("grumpy".to_string()),
            ..PersonalitySettings::default()
        };
        assert!(ai.apply_settings(settings).is_err());
        assert_eq!(ai.personality_type, PersonalityType::Sarcastic);
    }

    #[test]
    fn test_recharge_caps_values() {
        let mut ai = karen();
        ai.mood_value = 95;
        ai.energy_level = 90;
        ai.recharge_energy();
        assert_eq!(ai.energy_level, 100);
        assert_eq!(ai.mood_value, 100);

        ai.mood_value = 0;
        ai.recharge_energy();
        assert_eq!(ai.mood_value, 30);
        assert_eq!(ai.mood, Mood::Sarcastic);
    }
}
