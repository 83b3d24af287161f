//! Unguessable identifier generation for rooms, players, and tokens.
//!
//! Pure and stateless: callers supply the [`Rng`], which keeps every user of
//! this module deterministic under test.

use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

use crate::protocol::PlayerId;

/// Length of a room code.
pub const ROOM_CODE_LEN: usize = 4;

/// Length of host and reconnect bearer tokens.
pub const TOKEN_LEN: usize = 32;

// Excludes visually ambiguous characters (0, O, I, 1).
const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const TOKEN_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

fn sample(alphabet: &[u8], len: usize, rng: &mut impl Rng) -> String {
    (0..len)
        .map(|_| char::from(*alphabet.choose(rng).unwrap_or(&b'A')))
        .collect()
}

/// Generate a 4-character room code from the ambiguity-free alphabet.
///
/// Uniqueness among live rooms is the registry's job; it retries on
/// collision.
pub fn room_code(rng: &mut impl Rng) -> String {
    sample(ROOM_CODE_ALPHABET, ROOM_CODE_LEN, rng)
}

/// Generate an opaque 32-character bearer token.
pub fn bearer_token(rng: &mut impl Rng) -> String {
    sample(TOKEN_ALPHABET, TOKEN_LEN, rng)
}

/// Mint a fresh player id.
pub fn player_id() -> PlayerId {
    Uuid::new_v4()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn room_code_has_expected_shape() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let code = room_code(&mut rng);
            assert_eq!(code.len(), ROOM_CODE_LEN);
            assert!(code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn room_code_excludes_ambiguous_characters() {
        for banned in ['0', 'O', 'I', '1'] {
            assert!(!ROOM_CODE_ALPHABET.contains(&(banned as u8)));
        }
    }

    #[test]
    fn bearer_token_has_expected_shape() {
        let mut rng = rand::thread_rng();
        let token = bearer_token(&mut rng);
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.bytes().all(|b| TOKEN_ALPHABET.contains(&b)));
    }

    #[test]
    fn tokens_do_not_trivially_collide() {
        let mut rng = rand::thread_rng();
        let tokens: HashSet<String> = (0..512).map(|_| bearer_token(&mut rng)).collect();
        assert_eq!(tokens.len(), 512);
    }

    #[test]
    fn player_ids_are_unique() {
        let ids: HashSet<PlayerId> = (0..512).map(|_| player_id()).collect();
        assert_eq!(ids.len(), 512);
    }
}
