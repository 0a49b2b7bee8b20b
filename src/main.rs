use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use aistudio::cli;

#[derive(Parser)]
#[command(name = "aistudio")]
#[command(about = "Personal generative AI studio: images, music, voices and a moody companion")]
#[command(version)]
struct Cli {
    /// Data directory holding config.json and the media folders
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Server {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Send one message to the companion
    Chat {
        message: String,
        #[arg(long)]
        user_name: Option<String>,
    },
    /// Poll the idle-speak rule until it fires
    Idle {
        #[arg(long, default_value = "20")]
        polls: u32,
    },
    /// Generate an image
    Image {
        prompt: String,
        #[arg(long)]
        steps: Option<u32>,
        /// Use the remote premium backend
        #[arg(long)]
        premium: bool,
    },
    /// Expand a short idea into a full image prompt
    Enhance { idea: String },
    /// Generate a music clip
    Music { prompt: String },
    /// Synthesize speech
    Speak {
        text: String,
        #[arg(long)]
        voice: Option<String>,
        /// e.g. "+10%" or "-5%"
        #[arg(long, allow_hyphen_values = true)]
        rate: Option<String>,
        /// e.g. "+2Hz"
        #[arg(long, allow_hyphen_values = true)]
        pitch: Option<String>,
    },
    /// List saved AI speeches
    Speeches {
        #[arg(long)]
        search: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let data_dir = cli.data_dir;

    match cli.command {
        Commands::Server { port } => cli::handle_server(data_dir, port).await,
        Commands::Chat { message, user_name } => cli::handle_chat(data_dir, message, user_name).await,
        Commands::Idle { polls } => cli::handle_idle(data_dir, polls).await,
        Commands::Image { prompt, steps, premium } => cli::handle_image(data_dir, prompt, steps, premium).await,
        Commands::Enhance { idea } => cli::handle_enhance(data_dir, idea).await,
        Commands::Music { prompt } => cli::handle_music(data_dir, prompt).await,
        Commands::Speak { text, voice, rate, pitch } => cli::handle_speak(data_dir, text, voice, rate, pitch).await,
        Commands::Speeches { search } => cli::handle_speeches(data_dir, search).await,
    }
}
