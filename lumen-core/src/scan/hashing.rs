use std::path::Path;

use sha2::{Digest, Sha256};

/// Identity key of an album or media row: lowercase hex SHA-256 of the
/// path's string form.
pub fn path_hash(path: &Path) -> String {
    digest(path.to_string_lossy().as_bytes())
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_hash_is_stable_hex_sha256() {
        let hash = path_hash(Path::new("/photos/a.jpg"));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(hash, path_hash(Path::new("/photos/a.jpg")));
        assert_ne!(hash, path_hash(Path::new("/photos/b.jpg")));
    }

    #[test]
    fn digest_of_empty_input() {
        assert_eq!(
            digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
