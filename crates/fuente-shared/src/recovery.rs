use rand::seq::SliceRandom;
use rand::rngs::OsRng;

use crate::constants::{RECOVERY_PHRASE_SEPARATOR, RECOVERY_PHRASE_WORDS};

/// Static wordlist for recovery phrases.
pub const WORDLIST: [&str; 24] = [
    "mountain", "ocean", "forest", "river", "sunset", "meadow",
    "thunder", "crystal", "phoenix", "garden", "breeze", "journey",
    "harmony", "wisdom", "courage", "shelter", "beacon", "serenity",
    "horizon", "cascade", "whisper", "anchor", "compass", "lantern",
];

/// Generate a fresh recovery phrase, e.g. `river-anchor-river-wisdom-breeze-ocean`.
///
/// Words are drawn independently (repeats allowed). Uniqueness across users
/// is the registry's job.
pub fn generate_phrase() -> String {
    let mut rng = OsRng;
    (0..RECOVERY_PHRASE_WORDS)
        .filter_map(|_| WORDLIST.choose(&mut rng).copied())
        .collect::<Vec<_>>()
        .join(RECOVERY_PHRASE_SEPARATOR)
}

/// Canonical form used for lookup: trimmed, lowercase, single separators.
pub fn normalize_phrase(phrase: &str) -> String {
    phrase
        .trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || RECOVERY_PHRASE_SEPARATOR.contains(c))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(RECOVERY_PHRASE_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phrase_shape() {
        let phrase = generate_phrase();
        let words: Vec<&str> = phrase.split(RECOVERY_PHRASE_SEPARATOR).collect();
        assert_eq!(words.len(), RECOVERY_PHRASE_WORDS);
        assert!(words.iter().all(|w| WORDLIST.contains(w)));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize_phrase("  River-ANCHOR  ocean--wisdom "),
            "river-anchor-ocean-wisdom"
        );
        let phrase = generate_phrase();
        assert_eq!(normalize_phrase(&phrase), phrase);
    }
}
