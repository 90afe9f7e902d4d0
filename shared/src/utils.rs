use sha2::{Digest, Sha256};

/// Creates a truncated, salted hash of an identifier for safe logging.
///
/// Sender ids come from the identity provider and are personal data; logs
/// carry this prefix instead so lines of one sender can still be correlated.
pub fn log_safe_id(id: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(id.as_bytes());
    hex::encode(&hasher.finalize()[..4])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_safe_id_is_salted_and_short() {
        let a = log_safe_id("u1", "salt");
        assert_eq!(a.len(), 8);
        assert_eq!(a, log_safe_id("u1", "salt"));
        assert_ne!(a, log_safe_id("u1", "other"));
        assert_ne!(a, log_safe_id("u2", "salt"));
        assert!(!a.contains("u1"));
    }
}
