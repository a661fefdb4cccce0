/// Length (hex chars) of digests used for change detection and row ids.
pub const SHORT_HASH_LEN: usize = 16;

/// Short content digest; equal text always yields an equal hash.
pub fn content_hash(text: &str) -> String {
    let h = blake3::hash(text.as_bytes());
    h.to_hex().as_str()[..SHORT_HASH_LEN].to_string()
}

/// Deterministic id from an ordered list of parts.
pub fn short_id(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for p in parts {
        hasher.update(p.as_bytes());
        // separator so ("ab","c") != ("a","bc")
        hasher.update(&[0x1f]);
    }
    hasher.finalize().to_hex().as_str()[..SHORT_HASH_LEN].to_string()
}
