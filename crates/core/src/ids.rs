#![forbid(unsafe_code)]

use rand::Rng;
use time::OffsetDateTime;

/// URL-safe alphabet (64 chars) for nanoid-style identifiers.
const ALPHABET: &[u8; 64] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_-";

const BLOCK_ID_LEN: usize = 21;
const SESSION_SUFFIX_LEN: usize = 8;

/// A 21-character URL-safe random id (126 bits).
pub fn new_block_id() -> String {
    nano_id(BLOCK_ID_LEN)
}

pub fn nano_id(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut out = String::with_capacity(len);
    for _ in 0..len {
        out.push(ALPHABET[rng.gen_range(0..ALPHABET.len())] as char);
    }
    out
}

/// Session ids are `<sanitized-user>_<ns-timestamp>_<rand>` so that files
/// sort roughly by creation time and stay attributable on disk.
pub fn new_session_id(user_id: &str) -> String {
    let ns = OffsetDateTime::now_utc().unix_timestamp_nanos();
    format!("{}_{}_{}", sanitize_user_id(user_id), ns, nano_id(SESSION_SUFFIX_LEN))
}

/// Strip anything that is not `[A-Za-z0-9_]` so the user part cannot break
/// file names or the `_`-separated session id format.
pub fn sanitize_user_id(user_id: &str) -> String {
    let cleaned: String = user_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if cleaned.is_empty() {
        "user".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_ids_are_unique_and_url_safe() {
        let a = new_block_id();
        let b = new_block_id();
        assert_eq!(a.len(), 21);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }

    #[test]
    fn session_ids_carry_the_sanitized_user() {
        let id = new_session_id("alice@example.com");
        assert!(id.starts_with("aliceexamplecom_"));
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[1].parse::<i128>().is_ok(), "timestamp part: {}", parts[1]);
        assert_eq!(parts[2].len(), 8);
    }

    #[test]
    fn empty_user_falls_back() {
        assert_eq!(sanitize_user_id("@@@"), "user");
        assert_eq!(sanitize_user_id("bob_7"), "bob_7");
    }
}
