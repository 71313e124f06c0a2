//! Telegram channel adapter.
//!
//! Wraps a teloxide `Bot` used as a typed API client. Unlike a classic
//! Dispatcher setup, the long-polling loop is driven by hand (see
//! [`poller`]): the daemon needs to own the `getUpdates` offset, classify
//! the fatal 409 conflict, and apply its dead-chat allowlist to send
//! failures.

pub mod adapter;
pub mod board;
pub mod lock;
pub mod menu;
pub mod poller;
pub mod polls;
pub mod send;
pub mod typing;

pub use adapter::TelegramAdapter;
