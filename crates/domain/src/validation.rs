//! Field constraints for user records.
//!
//! Every check runs before the store is touched and reports all violations at
//! once rather than stopping at the first.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

/// Minimum password length in `char`s (Unicode scalar values).
pub const MIN_PASSWORD_LENGTH: usize = 5;

/// Minimal "looks like an email" shape: `<text>@<text>.<text>`, unanchored.
static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r".+@.+\..+").expect("email pattern is a valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    violations: Vec<FieldViolation>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, violation: FieldViolation) {
        self.violations.push(violation);
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<Vec<FieldViolation>> for ValidationErrors {
    fn from(violations: Vec<FieldViolation>) -> Self {
        Self { violations }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", parts.join("; "))
    }
}

pub fn normalize_username(username: &str) -> String {
    username.trim().to_string()
}

/// Expects the already-trimmed username.
pub fn check_username(username: &str, errors: &mut ValidationErrors) {
    if username.is_empty() {
        errors.push(FieldViolation::new("username", "Username is required"));
    }
}

pub fn check_email(email: &str, errors: &mut ValidationErrors) {
    if email.is_empty() {
        errors.push(FieldViolation::new("email", "Email is required"));
    } else if !EMAIL_PATTERN.is_match(email) {
        errors.push(FieldViolation::new("email", "Must match an email address!"));
    }
}

/// Length is counted in characters of the plaintext, never of the hash.
pub fn check_password(password: &str, errors: &mut ValidationErrors) {
    if password.is_empty() {
        errors.push(FieldViolation::new("password", "Password is required"));
    } else if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.push(FieldViolation::new(
            "password",
            format!(
                "Password must be at least {} characters long",
                MIN_PASSWORD_LENGTH
            ),
        ));
    }
}
