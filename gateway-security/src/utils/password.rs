use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use std::sync::Arc;

const ITERATIONS: u32 = 2;
const LANES: u32 = 1;

/// Argon2id hasher whose single knob is a logarithmic work factor: each step
/// of `cost` doubles the memory used.
///
/// Hashing and verification are CPU bound and run on the blocking pool.
#[derive(Clone)]
pub struct PasswordHasher {
    params: Params,
    dummy_hash: Arc<str>,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Result<Self, anyhow::Error> {
        if !(4..=20).contains(&cost) {
            anyhow::bail!("password cost must be between 4 and 20, got {}", cost);
        }

        let memory_kib = 1u32 << (cost + 2);
        let params = Params::new(memory_kib, ITERATIONS, LANES, None)
            .map_err(|e| anyhow::anyhow!("Invalid Argon2 parameters: {}", e))?;

        let dummy_hash = hash_with(&params, "dummy-password-for-unknown-identities")?;

        Ok(Self {
            params,
            dummy_hash: Arc::from(dummy_hash),
        })
    }

    pub async fn hash(&self, password: &str) -> Result<String, anyhow::Error> {
        let params = self.params.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hash_with(&params, &password))
            .await
            .map_err(|e| anyhow::anyhow!("Password hashing task failed: {}", e))?
    }

    /// Constant-time check of `password` against a stored PHC string. A
    /// malformed stored hash counts as a mismatch.
    pub async fn verify(&self, password: &str, password_hash: &str) -> Result<bool, anyhow::Error> {
        let password = password.to_string();
        let password_hash = password_hash.to_string();
        tokio::task::spawn_blocking(move || verify_with(&password, &password_hash))
            .await
            .map_err(|e| anyhow::anyhow!("Password verification task failed: {}", e))
    }

    /// Burn one verification for an identity that does not exist, so the
    /// response takes as long as a real wrong-password attempt.
    pub async fn verify_dummy(&self, password: &str) -> Result<(), anyhow::Error> {
        let dummy = self.dummy_hash.to_string();
        self.verify(password, &dummy).await.map(|_| ())
    }
}

fn hash_with(params: &Params, password: &str) -> Result<String, anyhow::Error> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.clone());
    let salt = SaltString::generate(&mut OsRng);

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
}

fn verify_with(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        // Parameters are read back from the PHC string itself.
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash is malformed");
            false
        }
    }
}

/// Rules `password` fails; empty when it is acceptable.
pub fn check_strength(password: &str, min_length: usize) -> Vec<String> {
    let mut errors = Vec::new();

    if password.chars().count() < min_length {
        errors.push(format!(
            "Password must be at least {} characters.",
            min_length
        ));
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        errors.push("Password must contain an uppercase letter.".to_string());
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        errors.push("Password must contain a lowercase letter.".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push("Password must contain a number.".to_string());
    }
    if password.chars().all(|c| c.is_alphanumeric()) {
        errors.push("Password must contain a special character.".to_string());
    }

    errors
}
