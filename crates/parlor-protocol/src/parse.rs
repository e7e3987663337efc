//! Turning raw input lines into protocol text.

use std::borrow::Cow;

/// Maximum accepted size of a single input line, terminator included (64 KiB).
pub const MAX_LINE_BYTES: usize = 65_536;

/// Removes one trailing `"\n"` or `"\r\n"` from a line read off the wire.
///
/// Anything else, including a lone trailing `'\r'` without `'\n'`, is kept.
pub fn strip_line_terminator(line: &str) -> &str {
    match line.strip_suffix('\n') {
        Some(rest) => rest.strip_suffix('\r').unwrap_or(rest),
        None => line,
    }
}

/// Removes every embedded `'\n'` and `'\r'` so that a chat body renders as
/// a single output line.
///
/// Borrows the input when there is nothing to strip.
pub fn strip_newlines(body: &str) -> Cow<'_, str> {
    if body.contains(['\n', '\r']) {
        Cow::Owned(body.chars().filter(|c| !matches!(c, '\n' | '\r')).collect())
    } else {
        Cow::Borrowed(body)
    }
}
