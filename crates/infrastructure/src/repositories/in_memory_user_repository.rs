use async_trait::async_trait;
use chrono::Utc;
use domain::{DomainError, RelationChange, User, UserId, UserPatch, UserRepository};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Store {
    next_id: i32,
    users: BTreeMap<i32, User>,
}

impl Store {
    /// Uniqueness check against every record except `owner`.
    fn check_unique(&self, user: &User, owner: Option<i32>) -> Result<(), DomainError> {
        for (id, existing) in &self.users {
            if Some(*id) == owner {
                continue;
            }
            if existing.username == user.username {
                return Err(DomainError::DuplicateKey {
                    field: "username".to_string(),
                    value: user.username.clone(),
                });
            }
            if existing.email == user.email {
                return Err(DomainError::DuplicateKey {
                    field: "email".to_string(),
                    value: user.email.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Process-local store with the same contract as the SQLite repository.
/// The uniqueness check and the write happen under one write lock.
#[derive(Default)]
pub struct InMemoryUserRepository {
    store: RwLock<Store>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, DomainError> {
        Ok(self.store.read().await.users.get(&id.0).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, DomainError> {
        let store = self.store.read().await;
        Ok(store.users.values().find(|u| u.username == username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DomainError> {
        let store = self.store.read().await;
        Ok(store.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, DomainError> {
        let store = self.store.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| store.users.get(&id.0).cloned())
            .collect())
    }

    async fn find_all(&self) -> Result<Vec<User>, DomainError> {
        Ok(self.store.read().await.users.values().cloned().collect())
    }

    async fn insert(&self, user: &User) -> Result<User, DomainError> {
        let mut store = self.store.write().await;
        store.check_unique(user, None)?;

        store.next_id += 1;
        let id = store.next_id;

        let mut saved = user.clone();
        saved.id = Some(UserId(id));
        store.users.insert(id, saved.clone());
        Ok(saved)
    }

    async fn update(&self, id: UserId, patch: &UserPatch) -> Result<User, DomainError> {
        let mut store = self.store.write().await;
        let mut user = store
            .users
            .get(&id.0)
            .cloned()
            .ok_or(DomainError::UserNotFound(id.0))?;

        if let Some(username) = &patch.username {
            user.username = username.clone();
        }
        if let Some(email) = &patch.email {
            user.email = email.clone();
        }
        if let Some(password_hash) = &patch.password_hash {
            user.password_hash = password_hash.clone();
        }
        store.check_unique(&user, Some(id.0))?;

        user.updated_at = Utc::now();
        store.users.insert(id.0, user.clone());
        Ok(user)
    }

    async fn apply_relation(
        &self,
        id: UserId,
        change: RelationChange,
    ) -> Result<User, DomainError> {
        let mut store = self.store.write().await;
        let user = store
            .users
            .get_mut(&id.0)
            .ok_or(DomainError::UserNotFound(id.0))?;

        let changed = match change {
            RelationChange::AddFriend(friend) => user.add_friend(friend),
            RelationChange::RemoveFriend(friend) => user.remove_friend(friend),
            RelationChange::AddThought(thought) => user.add_thought(thought),
            RelationChange::RemoveThought(thought) => user.remove_thought(thought),
        };
        if changed {
            user.updated_at = Utc::now();
        }
        Ok(user.clone())
    }

    async fn delete(&self, id: UserId) -> Result<(), DomainError> {
        self.store.write().await.users.remove(&id.0);
        Ok(())
    }
}
