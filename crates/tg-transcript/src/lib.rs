//! Transcript plumbing for the four supported tools.
//!
//! Each tool writes an append-only JSONL transcript in its own dialect;
//! this crate fuses those dialects into one normalized event model
//! ([`events::ParsedLine`]), discovers transcript files on disk, extracts
//! resume references from argv, and rewrites argv for restarts.

pub mod claude;
pub mod codex;
pub mod discover;
pub mod events;
pub mod kimi;
pub mod parser;
pub mod pi;
pub mod resume;
pub mod state;
pub mod tool;
pub mod urls;

pub use events::*;
pub use parser::Parser;
pub use tool::Tool;
