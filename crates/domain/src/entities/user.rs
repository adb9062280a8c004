use crate::errors::DomainError;
use crate::services::PasswordHasher;
use crate::validation::{self, ValidationErrors};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i32);

/// Weak reference to a Thought; the thought's lifecycle belongs elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThoughtId(pub i32);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output of a password hasher. Only hashers and the store construct these,
/// so a `User` cannot end up holding plaintext.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// Wrap a hash produced by a [`PasswordHasher`] implementation.
    pub fn from_hasher(hash: String) -> Self {
        Self(hash)
    }

    /// Rehydrate a hash previously read back from the store.
    pub fn from_stored(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordHash(..)")
    }
}

/// Core User entity - one registered account
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Option<UserId>, // None for new users before persistence
    pub username: String,
    pub email: String,
    pub password_hash: PasswordHash,
    pub thoughts: Vec<ThoughtId>,
    pub friends: Vec<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: String, email: String, password_hash: PasswordHash) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            username,
            email,
            password_hash,
            thoughts: Vec::new(),
            friends: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn friend_count(&self) -> usize {
        self.friends.len()
    }

    pub fn has_friend(&self, friend: UserId) -> bool {
        self.friends.contains(&friend)
    }

    /// Adds the reference unless it is already present. Returns whether the
    /// list changed.
    pub fn add_friend(&mut self, friend: UserId) -> bool {
        if self.has_friend(friend) {
            return false;
        }
        self.friends.push(friend);
        true
    }

    pub fn remove_friend(&mut self, friend: UserId) -> bool {
        let before = self.friends.len();
        self.friends.retain(|f| *f != friend);
        before != self.friends.len()
    }

    pub fn add_thought(&mut self, thought: ThoughtId) -> bool {
        if self.thoughts.contains(&thought) {
            return false;
        }
        self.thoughts.push(thought);
        true
    }

    pub fn remove_thought(&mut self, thought: ThoughtId) -> bool {
        let before = self.thoughts.len();
        self.thoughts.retain(|t| *t != thought);
        before != self.thoughts.len()
    }

    /// Compare a login attempt against the stored hash. The comparison itself
    /// is delegated to the hasher, which is timing-safe.
    pub fn verify_password(
        &self,
        hasher: &dyn PasswordHasher,
        candidate: &str,
    ) -> Result<bool, DomainError> {
        hasher.verify(candidate, &self.password_hash)
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile::from(self)
    }
}

/// Registration input. Holds plaintext only until the service hashes it.
#[derive(Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl NewUser {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    /// Trims the username and checks all three fields.
    pub fn normalized(mut self) -> Result<Self, ValidationErrors> {
        self.username = validation::normalize_username(&self.username);

        let mut errors = ValidationErrors::new();
        validation::check_username(&self.username, &mut errors);
        validation::check_email(&self.email, &mut errors);
        validation::check_password(&self.password, &mut errors);
        errors.into_result()?;

        Ok(self)
    }
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Profile update. `password: Some(_)` means the password is being changed
/// and is the only thing that triggers a re-hash.
#[derive(Clone, Default, Deserialize)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl UserChanges {
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn changes_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none() && self.password.is_none()
    }

    /// Trims a supplied username and checks only the fields being changed.
    pub fn normalized(mut self) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if let Some(username) = self.username.take() {
            let username = validation::normalize_username(&username);
            validation::check_username(&username, &mut errors);
            self.username = Some(username);
        }
        if let Some(email) = &self.email {
            validation::check_email(email, &mut errors);
        }
        if let Some(password) = &self.password {
            validation::check_password(password, &mut errors);
        }
        errors.into_result()?;

        Ok(self)
    }
}

impl fmt::Debug for UserChanges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserChanges")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Public JSON view of a user, including the derived friend count.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Option<UserId>,
    pub username: String,
    pub email: String,
    pub thoughts: Vec<ThoughtId>,
    pub friends: Vec<UserId>,
    pub friend_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            thoughts: user.thoughts.clone(),
            friends: user.friends.clone(),
            friend_count: user.friend_count(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}
