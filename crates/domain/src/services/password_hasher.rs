use crate::entities::PasswordHash;
use crate::errors::DomainError;

/// Work factor used when nothing else is configured.
pub const DEFAULT_COST_FACTOR: u32 = 10;

/// Salted, adaptive password hashing.
///
/// Both operations are CPU-bound and slow on purpose; async callers should
/// run them on the blocking pool.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plaintext: &str) -> Result<PasswordHash, DomainError>;

    /// `Ok(false)` for a wrong password, `Err` only when the stored hash is
    /// unusable.
    fn verify(&self, candidate: &str, hash: &PasswordHash) -> Result<bool, DomainError>;
}

#[derive(Debug, Clone)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(DEFAULT_COST_FACTOR)
    }
}

impl PasswordHasher for BcryptHasher {
    fn hash(&self, plaintext: &str) -> Result<PasswordHash, DomainError> {
        bcrypt::hash(plaintext, self.cost)
            .map(PasswordHash::from_hasher)
            .map_err(|e| DomainError::HashingFailure(e.to_string()))
    }

    fn verify(&self, candidate: &str, hash: &PasswordHash) -> Result<bool, DomainError> {
        bcrypt::verify(candidate, hash.as_str())
            .map_err(|e| DomainError::HashingFailure(e.to_string()))
    }
}
