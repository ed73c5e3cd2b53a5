//! Content normalization and hashing
//!
//! Two renders of the same page often differ only cosmetically (full-width
//! digits, typographic dashes, whitespace runs). Hashes are computed over a
//! normalized form so they change only when the substance does.

use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Normalizes text for hashing
///
/// Applies NFKC, folds full-width digits, maps visually equivalent
/// punctuation to ASCII and collapses whitespace runs to one space.
pub fn normalize_content(raw: &str) -> String {
    let mut normalized = String::with_capacity(raw.len());
    let mut pending_space = false;

    for ch in raw.nfkc().map(fold_char) {
        if ch.is_whitespace() {
            pending_space = !normalized.is_empty();
            continue;
        }
        if pending_space {
            normalized.push(' ');
            pending_space = false;
        }
        normalized.push(ch);
    }

    normalized
}

fn fold_char(ch: char) -> char {
    match ch {
        '\u{FF10}'..='\u{FF19}' => {
            char::from_u32(ch as u32 - 0xFF10 + '0' as u32).unwrap_or(ch)
        }
        '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2212}'
        | '\u{FF0D}' => '-',
        '\u{301C}' | '\u{FF5E}' => '~',
        '\u{201C}' | '\u{201D}' | '\u{FF02}' => '"',
        '\u{2018}' | '\u{2019}' | '\u{FF07}' => '\'',
        _ => ch,
    }
}

/// SHA-256 hex digest of the normalized content
pub fn content_hash(raw: &str) -> String {
    hash_bytes(normalize_content(raw).as_bytes())
}

/// SHA-256 hex digest of raw bytes
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_width_digits_and_spaces_are_cosmetic() {
        assert_eq!(normalize_content("１２３　foo"), "123 foo");
        assert_eq!(content_hash("１２３　foo"), content_hash("123 foo"));
        assert_eq!(content_hash("  123 \n\t foo "), content_hash("123 foo"));
    }

    #[test]
    fn test_substantive_change_changes_hash() {
        assert_ne!(content_hash("123 foo"), content_hash("123 bar"));
    }

    #[test]
    fn test_punctuation_substitutions() {
        assert_eq!(normalize_content("1\u{2212}2"), "1-2");
        assert_eq!(normalize_content("a\u{301C}b"), "a~b");
        assert_eq!(normalize_content("\u{201C}x\u{201D}"), "\"x\"");
        assert_eq!(normalize_content("it\u{2019}s"), "it's");
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let hash = hash_bytes(b"");
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
