//! Filename sanitization for user-supplied video names.
//!
//! The sanitized name becomes the base of the final media and thumbnail
//! files, so it has to be valid on Windows, Linux and macOS while keeping
//! CJK and other Unicode text intact.

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved filenames (case-insensitive)
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Name used when nothing usable is left after sanitizing.
pub const FALLBACK_NAME: &str = "video";

/// Maximum length of a base name, in characters.
pub const MAX_NAME_CHARS: usize = 200;

/// Sanitize a user-supplied name for use as a file base name.
///
/// Control characters and Windows-invalid characters become `_` (runs are
/// collapsed), leading/trailing spaces and dots are trimmed, reserved
/// device names get a `_` prefix and the result is capped at
/// [`MAX_NAME_CHARS`] characters. An empty result becomes [`FALLBACK_NAME`].
///
/// # Examples
///
/// ```
/// use vidra::utils::filename::sanitize_filename;
///
/// assert_eq!(sanitize_filename("hello?world"), "hello_world");
/// assert_eq!(sanitize_filename("观看一只青蛙?"), "观看一只青蛙_");
/// assert_eq!(sanitize_filename(""), "video");
/// assert_eq!(sanitize_filename("CON"), "_CON");
/// ```
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return FALLBACK_NAME.to_string();
    }

    let upper = trimmed.to_uppercase();
    let reserved = WINDOWS_RESERVED_NAMES
        .iter()
        .any(|name| upper == *name || upper.starts_with(&format!("{}.", name)));

    let name = if reserved {
        format!("_{}", trimmed)
    } else {
        trimmed.to_string()
    };

    if name.chars().count() <= MAX_NAME_CHARS {
        return name;
    }

    // Truncation can expose a trailing space or dot again.
    let truncated: String = name.chars().take(MAX_NAME_CHARS).collect();
    let truncated = truncated.trim_end_matches([' ', '.']);
    if truncated.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        truncated.to_string()
    }
}
