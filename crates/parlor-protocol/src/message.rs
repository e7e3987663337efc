//! Protocol message types sent by the daemon.

use std::fmt;

use parlor_core::DisplayName;

use crate::parse::strip_newlines;

/// Prompt sent while waiting for a display name (no trailing newline).
pub const NAME_PROMPT: &str = "> Enter pseudo: ";

/// Sent when the name line could not be read; followed by a new prompt.
pub const NAME_RETRY: &str = "> Error found. Please try again.";

/// Messages sent from the daemon to clients.
///
/// Every variant renders to exactly one `'\n'`-terminated line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// A participant joined. Sent to everyone, the newcomer included.
    Welcome {
        /// Name of the new participant
        name: DisplayName,
    },

    /// A participant disconnected. Sent to everyone still connected.
    Farewell {
        /// Name of the departed participant
        name: DisplayName,
    },

    /// One chat line, relayed to everyone except its author.
    Chat {
        /// Name of the author
        name: DisplayName,
        /// Line body with all line breaks removed
        body: String,
    },

    /// A participant was evicted for being idle too long.
    IdleEviction {
        /// Name of the evicted participant
        name: DisplayName,
    },

    /// The room is at capacity; the connection is refused.
    RoomFull,
}

impl ServerMessage {
    /// Creates a welcome announcement.
    pub fn welcome(name: &DisplayName) -> Self {
        Self::Welcome { name: name.clone() }
    }

    /// Creates a departure announcement.
    pub fn farewell(name: &DisplayName) -> Self {
        Self::Farewell { name: name.clone() }
    }

    /// Creates a chat line, stripping any line breaks from `body`.
    pub fn chat(name: &DisplayName, body: &str) -> Self {
        Self::Chat {
            name: name.clone(),
            body: strip_newlines(body).into_owned(),
        }
    }

    /// Creates an idle eviction notice.
    pub fn idle_eviction(name: &DisplayName) -> Self {
        Self::IdleEviction { name: name.clone() }
    }

    /// Creates a capacity refusal.
    pub fn room_full() -> Self {
        Self::RoomFull
    }

    /// Renders the message to its wire text.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Welcome { name } => writeln!(f, "> Welcome {name} !"),
            Self::Farewell { name } => writeln!(f, "> See you later {name} !"),
            Self::Chat { name, body } => writeln!(f, "{name}: {body}"),
            Self::IdleEviction { name } => {
                writeln!(f, "> {name} was idle too long and was disconnected.")
            }
            Self::RoomFull => writeln!(f, "> Server is full. Please try again later."),
        }
    }
}
