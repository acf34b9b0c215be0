use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::Rng;

/// Number of digits in a wallet OTP
pub const OTP_DIGITS: usize = 6;

/// Generate a zero-padded numeric one-time code
pub fn generate_otp() -> String {
    let code: u32 = rand::thread_rng().gen_range(0..10u32.pow(OTP_DIGITS as u32));
    format!("{code:0width$}", width = OTP_DIGITS)
}

/// Hash a token secret for storage
pub fn hash_secret(secret: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash secret: {e}"))?;
    Ok(hash.to_string())
}

/// Check a secret against a stored hash; malformed hashes never verify
pub fn verify_secret(secret: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default().verify_password(secret.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otp_is_six_digits() {
        for _ in 0..100 {
            let otp = generate_otp();
            assert_eq!(otp.len(), OTP_DIGITS);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_secret("123456").unwrap();
        assert_ne!(hash, "123456");
        assert!(verify_secret("123456", &hash));
        assert!(!verify_secret("654321", &hash));
    }

    #[test]
    fn test_malformed_hash_does_not_verify() {
        assert!(!verify_secret("123456", "not-a-phc-string"));
    }
}
