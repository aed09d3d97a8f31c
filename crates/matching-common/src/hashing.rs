use sha2::{Digest, Sha256};

/// SHA-256 of `content` as lowercase hex. Used to key cached analyses and embeddings.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable short identifier for a problem statement, derived from its title.
pub fn short_id(title: &str) -> String {
    content_hash(title)[..8].to_string()
}
