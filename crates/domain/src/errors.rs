use crate::validation::ValidationErrors;
use thiserror::Error;

const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong, please try again.";

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Validation error: {0}")]
    ValidationError(ValidationErrors),

    #[error("Duplicate key: {field} '{value}' is already taken")]
    DuplicateKey { field: String, value: String },

    #[error("Password hashing failed: {0}")]
    HashingFailure(String),

    #[error("Repository error: {0}")]
    RepositoryError(String),

    #[error("User not found with id: {0}")]
    UserNotFound(i32),

    #[error("Invalid credentials")]
    InvalidCredentials,
}

impl DomainError {
    /// Message safe to show to the person who triggered the operation.
    ///
    /// Validation and duplicate-key failures name the offending field so the
    /// input can be corrected. Hashing and persistence failures stay generic
    /// and never leak internal detail.
    pub fn user_message(&self) -> String {
        match self {
            DomainError::ValidationError(errors) => errors.to_string(),
            DomainError::DuplicateKey { field, .. } => {
                format!("That {} is already in use.", field)
            }
            DomainError::UserNotFound(_) => "User not found.".to_string(),
            DomainError::InvalidCredentials => "Incorrect credentials.".to_string(),
            DomainError::HashingFailure(_) | DomainError::RepositoryError(_) => {
                GENERIC_FAILURE_MESSAGE.to_string()
            }
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, DomainError::ValidationError(_))
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, DomainError::DuplicateKey { .. })
    }
}

impl From<ValidationErrors> for DomainError {
    fn from(errors: ValidationErrors) -> Self {
        DomainError::ValidationError(errors)
    }
}
