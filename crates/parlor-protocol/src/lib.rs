//! parlor Protocol - Line-oriented text protocol
//!
//! This crate provides the text exchanged between the parlor daemon and
//! its clients: the name prompt, announcement templates and chat lines,
//! plus the helpers that turn raw input lines into protocol text.
//!
//! The protocol is plain text over a byte stream. Every server message
//! except the prompts ends in exactly one `'\n'`.

pub mod message;
pub mod parse;

pub use message::{ServerMessage, NAME_PROMPT, NAME_RETRY};
pub use parse::{strip_line_terminator, strip_newlines, MAX_LINE_BYTES};
