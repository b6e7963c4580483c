use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand_core::OsRng;
use tracing::warn;

/// Hash a plaintext password with Argon2id and a fresh random salt.
/// Returns the PHC string (algorithm, params, salt and hash in one field).
pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

/// Check `plain` against a stored hash. An account without a hash (activation
/// not finished) never matches, and the hash function is not run for it.
pub fn compare_password(plain: &str, stored: Option<&str>) -> bool {
    let Some(stored) = stored else {
        return false;
    };

    let parsed = match PasswordHash::new(stored) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Stored password hash is unparsable: {}", e);
            return false;
        }
    };

    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_compare_matches() {
        let hash = hash_password("Secret123").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(compare_password("Secret123", Some(&hash)));
        assert!(!compare_password("Secret124", Some(&hash)));
        assert!(!compare_password("", Some(&hash)));
    }

    #[test]
    fn null_hash_never_matches() {
        for candidate in ["", "Secret123", "$argon2id$", "null"] {
            assert!(!compare_password(candidate, None));
        }
    }

    #[test]
    fn garbage_hash_never_matches() {
        assert!(!compare_password("Secret123", Some("not-a-phc-string")));
    }

    #[test]
    fn salts_differ_per_hash() {
        let a = hash_password("same").unwrap();
        let b = hash_password("same").unwrap();
        assert_ne!(a, b);
    }
}
