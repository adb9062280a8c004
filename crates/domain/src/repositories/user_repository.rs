use crate::entities::{PasswordHash, ThoughtId, User, UserId};
use crate::errors::DomainError;
use async_trait::async_trait;

/// Field-level update of a user row. `None` leaves the stored column
/// untouched, so a write that does not change the password cannot put an
/// older hash back.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<PasswordHash>,
}

/// Single edit to one of the ordered reference lists. Adding a reference
/// that is already present and removing one that is absent are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationChange {
    AddFriend(UserId),
    RemoveFriend(UserId),
    AddThought(ThoughtId),
    RemoveThought(ThoughtId),
}

/// Repository trait - defines what we need from persistence layer
/// This is a PORT in hexagonal architecture
///
/// Every write is atomic per record and touches only what it names: `update`
/// the columns set in the patch, `apply_relation` one list entry. Unique-index
/// violations on `username`/`email` come back as [`DomainError::DuplicateKey`].
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, DomainError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, DomainError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DomainError>;
    /// Ids with no matching record are skipped; order follows `ids`.
    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, DomainError>;
    async fn find_all(&self) -> Result<Vec<User>, DomainError>;
    async fn insert(&self, user: &User) -> Result<User, DomainError>;
    async fn update(&self, id: UserId, patch: &UserPatch) -> Result<User, DomainError>;
    async fn apply_relation(
        &self,
        id: UserId,
        change: RelationChange,
    ) -> Result<User, DomainError>;
    async fn delete(&self, id: UserId) -> Result<(), DomainError>;
}
