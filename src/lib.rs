pub mod audio;
pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod image;
pub mod personality;
pub mod prompt;
pub mod server;
pub mod speech;
