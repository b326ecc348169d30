//! The fixed 2048-word dictionary used by the user-code mnemonic (spec §4.5).
//!
//! Words are generated deterministically as consonant-vowel-consonant-vowel-consonant
//! syllables rather than hand-copied from a wordlist, so the mapping is reproducible
//! from this source alone and needs no external data file.

use std::sync::OnceLock;

const CONSONANTS: &[u8] = b"bcdfghjklmnprstvwz";
const VOWELS: &[u8] = b"aeiou";

pub const WORD_COUNT: usize = 2048;

fn build_words() -> Vec<String> {
    let mut words = Vec::with_capacity(WORD_COUNT);
    'outer: for &c1 in CONSONANTS {
        for &v1 in VOWELS {
            for &c2 in CONSONANTS {
                for &v2 in VOWELS {
                    for &c3 in CONSONANTS {
                        words.push(format!(
                            "{}{}{}{}{}",
                            c1 as char, v1 as char, c2 as char, v2 as char, c3 as char
                        ));
                        if words.len() == WORD_COUNT {
                            break 'outer;
                        }
                    }
                }
            }
        }
    }
    words
}

static WORDS: OnceLock<Vec<String>> = OnceLock::new();

fn words() -> &'static [String] {
    WORDS.get_or_init(build_words)
}

/// Looks up the word for an 11-bit dictionary index. Panics if `index >= WORD_COUNT`,
/// which cannot happen for indices extracted from the bit layout (max `0x7FF`).
pub fn word_at(index: u16) -> &'static str {
    &words()[index as usize]
}

/// Reverse lookup, case-insensitive. Returns `None` for anything outside the dictionary.
pub fn index_of(word: &str) -> Option<u16> {
    let lower = word.to_ascii_lowercase();
    words().iter().position(|w| *w == lower).map(|i| i as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_exactly_2048_distinct_words() {
        let w = words();
        assert_eq!(w.len(), WORD_COUNT);
        let mut sorted = w.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), WORD_COUNT);
    }

    #[test]
    fn round_trips_every_index() {
        for i in 0..WORD_COUNT as u16 {
            let w = word_at(i);
            assert_eq!(index_of(w), Some(i));
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let w = word_at(42).to_uppercase();
        assert_eq!(index_of(&w), Some(42));
    }
}
