//! crates/checkin_core/src/join_code.rs
//!
//! Human-shareable join codes.

use uuid::Uuid;

pub const JOIN_CODE_LEN: usize = 6;

/// How many fresh codes a store tries before giving up on a unique-constraint collision.
pub const MAX_GENERATION_ATTEMPTS: usize = 5;

// No 0/O or 1/I, so codes survive being read aloud.
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A random six-character code.
pub fn generate() -> String {
    Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(JOIN_CODE_LEN)
        .map(|b| ALPHABET[*b as usize % ALPHABET.len()] as char)
        .collect()
}

/// The form codes are stored and compared in.
pub fn normalize(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_use_the_alphabet() {
        for _ in 0..100 {
            let code = generate();
            assert_eq!(code.len(), JOIN_CODE_LEN);
            assert!(code.bytes().all(|b| ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn normalize_uppercases_and_trims() {
        assert_eq!(normalize(" ab3xyz "), "AB3XYZ");
    }
}
