pub mod actions;
pub mod ids;
pub mod settings;
pub mod telegram;

pub use ids::{ChatId, Destination, MessageId, MessageRef, PromptHandle, UserId};
