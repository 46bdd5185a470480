pub mod commands;
pub mod config;
pub mod data;
pub mod discord;
pub mod handlers;
pub mod logging;
pub mod moderation;
pub mod spam;

// Customize these constants for your bot
pub const BOT_NAME: &str = "aegis_warden";
pub const COMMAND_TARGET: &str = "aegis_warden::command";
pub const SCHEDULER_TARGET: &str = "aegis_warden::scheduler";
pub const ERROR_TARGET: &str = "aegis_warden::error";
pub const EVENT_TARGET: &str = "aegis_warden::handlers";
pub const CONSOLE_TARGET: &str = "aegis_warden";

pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
