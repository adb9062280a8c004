use crate::entities::{NewUser, PasswordHash, ThoughtId, User, UserChanges, UserId};
use crate::errors::DomainError;
use crate::repositories::{RelationChange, UserPatch, UserRepository};
use crate::services::PasswordHasher;
use crate::validation::{FieldViolation, ValidationErrors};
use std::sync::Arc;
use tracing::{debug, info};

/// User Service - Contains business logic
/// This is the APPLICATION LAYER in clean architecture
///
/// Every profile write goes through the same gate: normalise and validate,
/// reject known duplicates, hash a new or changed password, then persist
/// only the fields that changed. The repository never sees plaintext.
pub struct UserService {
    user_repository: Arc<dyn UserRepository>,
    password_hasher: Arc<dyn PasswordHasher>,
}

impl UserService {
    pub fn new(
        user_repository: Arc<dyn UserRepository>,
        password_hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        Self {
            user_repository,
            password_hasher,
        }
    }

    /// Register a new account. The password is always hashed.
    pub async fn create_user(&self, input: NewUser) -> Result<User, DomainError> {
        let input = input.normalized()?;

        self.ensure_username_free(&input.username, None).await?;
        self.ensure_email_free(&input.email, None).await?;

        let password_hash = self.hash_password(input.password).await?;
        let user = User::new(input.username, input.email, password_hash);

        let saved = self.user_repository.insert(&user).await?;
        info!(user_id = ?saved.id, username = %saved.username, "user created");
        Ok(saved)
    }

    /// Apply a profile update. Only the supplied fields are written; an
    /// untouched password keeps its stored hash byte for byte.
    pub async fn update_user(&self, id: UserId, changes: UserChanges) -> Result<User, DomainError> {
        let changes = changes.normalized()?;
        let user = self.get_user(id).await?;

        if changes.is_empty() {
            return Ok(user);
        }

        if let Some(username) = &changes.username {
            if *username != user.username {
                self.ensure_username_free(username, Some(id)).await?;
            }
        }
        if let Some(email) = &changes.email {
            if *email != user.email {
                self.ensure_email_free(email, Some(id)).await?;
            }
        }

        let password_hash = match changes.password {
            Some(password) => Some(self.hash_password(password).await?),
            None => None,
        };
        let patch = UserPatch {
            username: changes.username,
            email: changes.email,
            password_hash,
        };

        let saved = self.user_repository.update(id, &patch).await?;
        debug!(
            user_id = %id,
            password_changed = patch.password_hash.is_some(),
            "user updated"
        );
        Ok(saved)
    }

    pub async fn get_user(&self, id: UserId) -> Result<User, DomainError> {
        match self.user_repository.find_by_id(id).await? {
            Some(user) => Ok(user),
            None => Err(DomainError::UserNotFound(id.0)),
        }
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, DomainError> {
        self.user_repository.find_by_username(username.trim()).await
    }

    pub async fn get_all_users(&self) -> Result<Vec<User>, DomainError> {
        self.user_repository.find_all().await
    }

    /// Removes only this record. References held by other users are left
    /// alone and filtered out when resolved.
    pub async fn delete_user(&self, id: UserId) -> Result<(), DomainError> {
        self.get_user(id).await?;
        self.user_repository.delete(id).await?;
        info!(user_id = %id, "user deleted");
        Ok(())
    }

    pub async fn verify_password(&self, id: UserId, candidate: &str) -> Result<bool, DomainError> {
        let user = self.get_user(id).await?;
        self.check_password(&user, candidate).await
    }

    /// Login by email. Unknown email and wrong password are indistinguishable
    /// to the caller.
    pub async fn authenticate(&self, email: &str, candidate: &str) -> Result<User, DomainError> {
        let Some(user) = self.user_repository.find_by_email(email).await? else {
            debug!("login attempt for unknown email");
            return Err(DomainError::InvalidCredentials);
        };

        if self.check_password(&user, candidate).await? {
            Ok(user)
        } else {
            debug!(user_id = ?user.id, "login attempt with wrong password");
            Err(DomainError::InvalidCredentials)
        }
    }

    pub async fn add_friend(&self, id: UserId, friend: UserId) -> Result<User, DomainError> {
        if id == friend {
            return Err(ValidationErrors::from(vec![FieldViolation::new(
                "friends",
                "A user cannot befriend themselves",
            )])
            .into());
        }

        // Existence of `id` itself is checked by the store
        self.get_user(friend).await?;
        self.user_repository
            .apply_relation(id, RelationChange::AddFriend(friend))
            .await
    }

    pub async fn remove_friend(&self, id: UserId, friend: UserId) -> Result<User, DomainError> {
        self.user_repository
            .apply_relation(id, RelationChange::RemoveFriend(friend))
            .await
    }

    pub async fn add_thought(&self, id: UserId, thought: ThoughtId) -> Result<User, DomainError> {
        self.user_repository
            .apply_relation(id, RelationChange::AddThought(thought))
            .await
    }

    pub async fn remove_thought(&self, id: UserId, thought: ThoughtId) -> Result<User, DomainError> {
        self.user_repository
            .apply_relation(id, RelationChange::RemoveThought(thought))
            .await
    }

    /// Friends that still exist, in list order. Dangling references are
    /// skipped, not removed.
    pub async fn resolve_friends(&self, id: UserId) -> Result<Vec<User>, DomainError> {
        let user = self.get_user(id).await?;
        let friends = self.user_repository.find_many(&user.friends).await?;

        if friends.len() != user.friends.len() {
            debug!(
                user_id = %id,
                dangling = user.friends.len() - friends.len(),
                "skipping dangling friend references"
            );
        }
        Ok(friends)
    }

    async fn ensure_username_free(
        &self,
        username: &str,
        owner: Option<UserId>,
    ) -> Result<(), DomainError> {
        if let Some(existing) = self.user_repository.find_by_username(username).await? {
            if existing.id != owner {
                return Err(DomainError::DuplicateKey {
                    field: "username".to_string(),
                    value: username.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn ensure_email_free(&self, email: &str, owner: Option<UserId>) -> Result<(), DomainError> {
        if let Some(existing) = self.user_repository.find_by_email(email).await? {
            if existing.id != owner {
                return Err(DomainError::DuplicateKey {
                    field: "email".to_string(),
                    value: email.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn hash_password(&self, plaintext: String) -> Result<PasswordHash, DomainError> {
        let hasher = self.password_hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&plaintext))
            .await
            .map_err(|e| DomainError::HashingFailure(e.to_string()))?
    }

    async fn check_password(&self, user: &User, candidate: &str) -> Result<bool, DomainError> {
        let hasher = self.password_hasher.clone();
        let user = user.clone();
        let candidate = candidate.to_string();
        tokio::task::spawn_blocking(move || user.verify_password(hasher.as_ref(), &candidate))
            .await
            .map_err(|e| DomainError::HashingFailure(e.to_string()))?
    }
}
