//! Node key and enroll secret primitives.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;

/// Default node key length in random bytes before encoding.
pub const DEFAULT_NODE_KEY_SIZE: usize = 24;

/// Generate a node key from `size` bytes of OS randomness, base64 encoded.
pub fn generate_node_key(size: usize) -> String {
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// Compare two secrets without leaking where they differ.
///
/// Both sides are hashed first; `blake3::Hash` equality is constant-time.
pub fn secrets_match(expected: &str, presented: &str) -> bool {
    blake3::hash(expected.as_bytes()) == blake3::hash(presented.as_bytes())
}
