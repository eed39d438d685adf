pub mod commands;
pub mod config;
pub mod connection;
pub mod handler;
pub mod parser;
pub mod reply;
pub mod server;
pub mod signal;
pub mod wait;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
