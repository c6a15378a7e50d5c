pub mod bot;

pub use bot::{BotDirectory, BotIdentity, InMemoryBotDirectory, ToolProviderConfig};
