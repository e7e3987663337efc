//! Display name sanitizing.
//!
//! Requested names arrive as raw client input. Before a name is shown to
//! anyone it is stripped of line breaks, spaces and a small set
//! of punctuation. Nothing else is checked: names are not length-limited
//! and two participants may share the same name.

/// Characters removed from requested display names.
pub const DISALLOWED_NAME_CHARS: [char; 10] = ['\n', ' ', '(', ')', '*', '&', '#', '\'', '=', '_'];

/// Strips every disallowed character from a requested display name.
///
/// Returns an empty string when nothing usable remains; callers treat
/// that as a request to prompt again.
///
/// # Example
///
/// ```
/// use parlor_core::sanitize_name;
///
/// assert_eq!(sanitize_name("al(ic)e*"), "alice");
/// assert_eq!(sanitize_name("__ __"), "");
/// ```
pub fn sanitize_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| !DISALLOWED_NAME_CHARS.contains(c))
        .collect()
}
