//! The channel abstraction: everything the daemon knows about chat
//! backends. Adapter crates (Telegram today, Slack behind a config flag)
//! implement [`channel::Channel`]; the rest of the system never touches an
//! SDK type.

pub mod channel;
pub mod dead;
pub mod error;
pub mod format;
pub mod types;

pub use channel::Channel;
pub use error::ChannelError;
pub use types::*;
