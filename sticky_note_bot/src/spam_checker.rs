use std::sync::LazyLock;

use regex::Regex;

/// Matches text that is nothing but emoji and whitespace: pictographs,
/// presentation-form emoji, keycap sequences like `1️⃣`, skin tone
/// modifiers, and the joiners/selectors that glue sequences together.
///
/// Bare digits, `#` and `*` only count as part of a keycap sequence, so
/// "0" or "#20" are not emoji.
static EMOJI_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[0-9#*]\x{FE0F}?\x{20E3}|\p{Emoji_Presentation}|\p{Extended_Pictographic}|[\x{1F3FB}-\x{1F3FF}]|\x{FE0F}|\x{200D}|\s)+$",
    )
    .expect("Regex will always be valid")
});

/// Whether the message text consists solely of emoji (and whitespace).
/// Empty and whitespace-only text is not "only emoji".
pub fn is_only_emoji(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && EMOJI_ONLY.is_match(trimmed)
}
