//! Разделяемые каналы: много логических владельцев поверх одной
//! физической подписки.

pub mod channel;
pub mod endpoint;

pub use channel::SharedChannel;
pub use endpoint::{channel_key, SharedEndpoint};
