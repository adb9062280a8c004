use async_trait::async_trait;
use domain::{
    BcryptHasher, DomainError, NewUser, PasswordHash, PasswordHasher, RelationChange, ThoughtId,
    User, UserChanges, UserId, UserPatch, UserRepository, UserService,
};
use infrastructure::{Database, InMemoryUserRepository, SqliteUserRepository};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{oneshot, Mutex};

// Lowest cost bcrypt accepts; keeps the suite fast.
const TEST_COST: u32 = 4;

struct Fixture {
    name: &'static str,
    service: Arc<UserService>,
    repository: Arc<dyn UserRepository>,
    _dir: Option<TempDir>,
}

fn sqlite_repository() -> (Arc<dyn UserRepository>, TempDir) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("users.db");
    let database = Database::new(path.to_str().unwrap(), 4).unwrap();
    let repository: Arc<dyn UserRepository> =
        Arc::new(SqliteUserRepository::new(database.get_pool().clone()));
    (repository, dir)
}

fn fixture_with(
    name: &'static str,
    repository: Arc<dyn UserRepository>,
    dir: Option<TempDir>,
    hasher: Arc<dyn PasswordHasher>,
) -> Fixture {
    Fixture {
        name,
        service: Arc::new(UserService::new(repository.clone(), hasher)),
        repository,
        _dir: dir,
    }
}

/// Every scenario runs against both stores.
fn fixtures() -> Vec<Fixture> {
    let hasher: Arc<dyn PasswordHasher> = Arc::new(BcryptHasher::new(TEST_COST));
    let (sqlite, dir) = sqlite_repository();
    vec![
        fixture_with(
            "in-memory",
            Arc::new(InMemoryUserRepository::new()),
            None,
            hasher.clone(),
        ),
        fixture_with("sqlite", sqlite, Some(dir), hasher),
    ]
}

fn ada() -> NewUser {
    NewUser::new("ada", "ada@example.com", "analytical")
}

fn grace() -> NewUser {
    NewUser::new("grace", "grace@example.com", "compiler")
}

#[tokio::test]
async fn created_password_is_hashed_and_verifies() {
    for f in fixtures() {
        let user = f.service.create_user(ada()).await.unwrap();
        let id = user.id.unwrap();

        let stored = f.repository.find_by_id(id).await.unwrap().unwrap();
        assert_ne!(stored.password_hash.as_str(), "analytical", "{}", f.name);
        assert!(stored.password_hash.as_str().starts_with("$2"), "{}", f.name);

        assert!(f.service.verify_password(id, "analytical").await.unwrap());
        assert!(!f.service.verify_password(id, "Analytical").await.unwrap());
    }
}

#[tokio::test]
async fn username_is_trimmed_on_create() {
    for f in fixtures() {
        let user = f
            .service
            .create_user(NewUser::new("  ada  ", "ada@example.com", "analytical"))
            .await
            .unwrap();
        assert_eq!(user.username, "ada", "{}", f.name);
        assert!(f.service.find_user_by_username("ada").await.unwrap().is_some());
    }
}

#[tokio::test]
async fn update_without_password_keeps_hash() {
    for f in fixtures() {
        let user = f.service.create_user(ada()).await.unwrap();
        let id = user.id.unwrap();
        let original_hash = user.password_hash.clone();

        let updated = f
            .service
            .update_user(id, UserChanges::default().email("countess@example.com"))
            .await
            .unwrap();
        assert_eq!(updated.email, "countess@example.com");
        assert_eq!(updated.password_hash, original_hash, "{}", f.name);

        let befriended = {
            let other = f.service.create_user(grace()).await.unwrap();
            f.service.add_friend(id, other.id.unwrap()).await.unwrap()
        };
        assert_eq!(befriended.password_hash, original_hash, "{}", f.name);

        let stored = f.repository.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash.as_str(), original_hash.as_str());
        assert!(f.service.verify_password(id, "analytical").await.unwrap());
    }
}

#[tokio::test]
async fn changing_password_rehashes() {
    for f in fixtures() {
        let user = f.service.create_user(ada()).await.unwrap();
        let id = user.id.unwrap();

        let updated = f
            .service
            .update_user(id, UserChanges::default().password("difference engine"))
            .await
            .unwrap();
        assert_ne!(updated.password_hash, user.password_hash, "{}", f.name);

        assert!(!f.service.verify_password(id, "analytical").await.unwrap());
        assert!(f.service.verify_password(id, "difference engine").await.unwrap());
    }
}

#[tokio::test]
async fn duplicate_username_or_email_is_rejected() {
    for f in fixtures() {
        let first = f.service.create_user(ada()).await.unwrap();

        let err = f
            .service
            .create_user(NewUser::new("ada", "other@example.com", "analytical"))
            .await
            .unwrap_err();
        assert!(
            matches!(&err, DomainError::DuplicateKey { field, .. } if field == "username"),
            "{}: {:?}",
            f.name,
            err
        );

        let err = f
            .service
            .create_user(NewUser::new("lovelace", "ada@example.com", "analytical"))
            .await
            .unwrap_err();
        assert!(
            matches!(&err, DomainError::DuplicateKey { field, .. } if field == "email"),
            "{}: {:?}",
            f.name,
            err
        );

        let stored = f.repository.find_by_id(first.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored, first, "{}", f.name);
        assert_eq!(f.service.get_all_users().await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn username_match_is_case_sensitive() {
    for f in fixtures() {
        f.service.create_user(ada()).await.unwrap();
        let other = f
            .service
            .create_user(NewUser::new("Ada", "ada2@example.com", "analytical"))
            .await;
        assert!(other.is_ok(), "{}", f.name);
    }
}

#[tokio::test]
async fn update_into_taken_email_is_rejected() {
    for f in fixtures() {
        f.service.create_user(ada()).await.unwrap();
        let other = f.service.create_user(grace()).await.unwrap();

        let err = f
            .service
            .update_user(other.id.unwrap(), UserChanges::default().email("ada@example.com"))
            .await
            .unwrap_err();
        assert!(err.is_duplicate_key(), "{}: {:?}", f.name, err);

        // Re-submitting your own values is not a conflict
        let same = f
            .service
            .update_user(
                other.id.unwrap(),
                UserChanges::default().username("grace").email("grace@example.com"),
            )
            .await;
        assert!(same.is_ok(), "{}", f.name);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_duplicate_creates_admit_one() {
    for f in fixtures() {
        let (a, b) = tokio::join!(
            f.service.create_user(ada()),
            f.service
                .create_user(NewUser::new("ada", "ada.other@example.com", "analytical")),
        );

        let outcomes = [a.is_ok(), b.is_ok()];
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1, "{}", f.name);
        let err = a.err().or(b.err()).unwrap();
        assert!(err.is_duplicate_key(), "{}: {:?}", f.name, err);
    }
}

#[tokio::test]
async fn store_rejects_duplicates_without_service_precheck() {
    for f in fixtures() {
        let first = f.service.create_user(ada()).await.unwrap();

        let mut clash = first.clone();
        clash.id = None;
        clash.username = "someone-else".to_string();

        let err = f.repository.insert(&clash).await.unwrap_err();
        assert!(
            matches!(&err, DomainError::DuplicateKey { field, .. } if field == "email"),
            "{}: {:?}",
            f.name,
            err
        );
    }
}

#[tokio::test]
async fn store_rejects_duplicates_on_update_without_service_precheck() {
    for f in fixtures() {
        f.service.create_user(ada()).await.unwrap();
        let other = f.service.create_user(grace()).await.unwrap().id.unwrap();

        let rename = UserPatch {
            username: Some("ada".to_string()),
            ..UserPatch::default()
        };
        let err = f.repository.update(other, &rename).await.unwrap_err();
        assert!(
            matches!(&err, DomainError::DuplicateKey { field, value } if field == "username" && value == "ada"),
            "{}: {:?}",
            f.name,
            err
        );

        let readdress = UserPatch {
            email: Some("ada@example.com".to_string()),
            ..UserPatch::default()
        };
        let err = f.repository.update(other, &readdress).await.unwrap_err();
        assert!(
            matches!(&err, DomainError::DuplicateKey { field, value } if field == "email" && value == "ada@example.com"),
            "{}: {:?}",
            f.name,
            err
        );

        let stored = f.repository.find_by_id(other).await.unwrap().unwrap();
        assert_eq!(stored.username, "grace", "{}", f.name);
        assert_eq!(stored.email, "grace@example.com", "{}", f.name);
    }
}

#[tokio::test]
async fn update_into_taken_username_is_rejected_after_trimming() {
    for f in fixtures() {
        f.service.create_user(ada()).await.unwrap();
        let other = f.service.create_user(grace()).await.unwrap().id.unwrap();

        let err = f
            .service
            .update_user(other, UserChanges::default().username("  ada "))
            .await
            .unwrap_err();
        assert!(
            matches!(&err, DomainError::DuplicateKey { field, value } if field == "username" && value == "ada"),
            "{}: {:?}",
            f.name,
            err
        );

        let renamed = f
            .service
            .update_user(other, UserChanges::default().username("  hopper  "))
            .await
            .unwrap();
        assert_eq!(renamed.username, "hopper", "{}", f.name);
        assert!(f.service.find_user_by_username("hopper").await.unwrap().is_some());
        assert!(f.service.find_user_by_username("grace").await.unwrap().is_none());
    }
}

#[tokio::test]
async fn invalid_input_never_reaches_the_store() {
    for f in fixtures() {
        let err = f
            .service
            .create_user(NewUser::new("ada", "not-an-email", "analytical"))
            .await
            .unwrap_err();
        assert!(err.is_validation(), "{}", f.name);

        let err = f
            .service
            .create_user(NewUser::new("ada", "ada@example.com", "abcd"))
            .await
            .unwrap_err();
        assert!(err.is_validation(), "{}", f.name);

        let err = f
            .service
            .create_user(NewUser::new("   ", "ada@example.com", "analytical"))
            .await
            .unwrap_err();
        assert!(err.is_validation(), "{}", f.name);

        assert!(f.service.get_all_users().await.unwrap().is_empty());

        // boundary values are accepted
        let ok = f
            .service
            .create_user(NewUser::new("ada", "a@b.c", "abcde"))
            .await;
        assert!(ok.is_ok(), "{}", f.name);
    }
}

#[tokio::test]
async fn short_password_on_update_is_rejected() {
    for f in fixtures() {
        let user = f.service.create_user(ada()).await.unwrap();
        let err = f
            .service
            .update_user(user.id.unwrap(), UserChanges::default().password("abc"))
            .await
            .unwrap_err();
        assert!(err.is_validation(), "{}", f.name);
        assert!(f
            .service
            .verify_password(user.id.unwrap(), "analytical")
            .await
            .unwrap());
    }
}

struct BrokenHasher;

impl PasswordHasher for BrokenHasher {
    fn hash(&self, _plaintext: &str) -> Result<PasswordHash, DomainError> {
        Err(DomainError::HashingFailure("primitive unavailable".to_string()))
    }

    fn verify(&self, _candidate: &str, _hash: &PasswordHash) -> Result<bool, DomainError> {
        Err(DomainError::HashingFailure("primitive unavailable".to_string()))
    }
}

#[tokio::test]
async fn hashing_failure_aborts_the_write() {
    let (sqlite, dir) = sqlite_repository();
    let fixtures = vec![
        fixture_with(
            "in-memory",
            Arc::new(InMemoryUserRepository::new()),
            None,
            Arc::new(BrokenHasher),
        ),
        fixture_with("sqlite", sqlite, Some(dir), Arc::new(BrokenHasher)),
    ];

    for f in fixtures {
        let err = f.service.create_user(ada()).await.unwrap_err();
        assert!(matches!(err, DomainError::HashingFailure(_)), "{}", f.name);
        assert!(f.repository.find_by_username("ada").await.unwrap().is_none());
        assert_eq!(err.user_message(), "Something went wrong, please try again.");
    }
}

#[tokio::test]
async fn authenticate_by_email() {
    for f in fixtures() {
        let user = f.service.create_user(ada()).await.unwrap();

        let found = f
            .service
            .authenticate("ada@example.com", "analytical")
            .await
            .unwrap();
        assert_eq!(found.id, user.id, "{}", f.name);

        let wrong = f.service.authenticate("ada@example.com", "wrong-password").await;
        assert!(matches!(wrong, Err(DomainError::InvalidCredentials)));

        let unknown = f.service.authenticate("nobody@example.com", "analytical").await;
        assert!(matches!(unknown, Err(DomainError::InvalidCredentials)));
    }
}

#[tokio::test]
async fn friend_count_follows_friend_list() {
    for f in fixtures() {
        let a = f.service.create_user(ada()).await.unwrap();
        assert_eq!(a.friend_count(), 0, "{}", f.name);

        let g = f.service.create_user(grace()).await.unwrap();
        let k = f
            .service
            .create_user(NewUser::new("katherine", "kj@nasa.gov", "trajectory"))
            .await
            .unwrap();
        let (a_id, g_id, k_id) = (a.id.unwrap(), g.id.unwrap(), k.id.unwrap());

        f.service.add_friend(a_id, k_id).await.unwrap();
        let a = f.service.add_friend(a_id, g_id).await.unwrap();
        assert_eq!(a.friend_count(), 2);
        assert_eq!(a.friends, vec![k_id, g_id], "{}", f.name);

        // adding twice is a no-op
        let a = f.service.add_friend(a_id, g_id).await.unwrap();
        assert_eq!(a.friend_count(), 2);

        // cycles are fine
        let g = f.service.add_friend(g_id, a_id).await.unwrap();
        assert_eq!(g.friends, vec![a_id]);

        let a = f.service.remove_friend(a_id, k_id).await.unwrap();
        assert_eq!(a.friend_count(), 1);

        let reloaded = f.service.get_user(a_id).await.unwrap();
        assert_eq!(reloaded.friends, vec![g_id], "{}", f.name);
        assert_eq!(reloaded.profile().friend_count, 1);
    }
}

#[tokio::test]
async fn befriending_yourself_or_a_ghost_fails() {
    for f in fixtures() {
        let a = f.service.create_user(ada()).await.unwrap();
        let id = a.id.unwrap();

        let err = f.service.add_friend(id, id).await.unwrap_err();
        assert!(err.is_validation(), "{}", f.name);

        let err = f.service.add_friend(id, UserId(9_999)).await.unwrap_err();
        assert!(matches!(err, DomainError::UserNotFound(9_999)), "{}", f.name);
    }
}

#[tokio::test]
async fn thoughts_are_ordered_weak_references() {
    for f in fixtures() {
        let a = f.service.create_user(ada()).await.unwrap();
        let id = a.id.unwrap();

        f.service.add_thought(id, ThoughtId(30)).await.unwrap();
        f.service.add_thought(id, ThoughtId(10)).await.unwrap();
        f.service.add_thought(id, ThoughtId(20)).await.unwrap();
        f.service.remove_thought(id, ThoughtId(10)).await.unwrap();

        let reloaded = f.service.get_user(id).await.unwrap();
        assert_eq!(
            reloaded.thoughts,
            vec![ThoughtId(30), ThoughtId(20)],
            "{}",
            f.name
        );
    }
}

#[tokio::test]
async fn dangling_friend_references_are_skipped_on_resolve() {
    for f in fixtures() {
        let a = f.service.create_user(ada()).await.unwrap();
        let g = f.service.create_user(grace()).await.unwrap();
        let (a_id, g_id) = (a.id.unwrap(), g.id.unwrap());

        f.service.add_friend(a_id, g_id).await.unwrap();
        f.service.delete_user(g_id).await.unwrap();

        let a = f.service.get_user(a_id).await.unwrap();
        assert_eq!(a.friend_count(), 1, "{}", f.name);
        assert!(f.service.resolve_friends(a_id).await.unwrap().is_empty());

        let err = f.service.get_user(g_id).await.unwrap_err();
        assert!(matches!(err, DomainError::UserNotFound(_)));
    }
}

#[tokio::test]
async fn resolve_friends_keeps_list_order() {
    for f in fixtures() {
        let a = f.service.create_user(ada()).await.unwrap();
        let g = f.service.create_user(grace()).await.unwrap();
        let k = f
            .service
            .create_user(NewUser::new("katherine", "kj@nasa.gov", "trajectory"))
            .await
            .unwrap();
        let a_id = a.id.unwrap();

        f.service.add_friend(a_id, k.id.unwrap()).await.unwrap();
        f.service.add_friend(a_id, g.id.unwrap()).await.unwrap();

        let names: Vec<String> = f
            .service
            .resolve_friends(a_id)
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["katherine", "grace"], "{}", f.name);
    }
}

/// Holds the next `find_by_id` until released, so two service calls can be
/// interleaved at a fixed point.
struct PausingRepository {
    inner: Arc<dyn UserRepository>,
    gate: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
}

impl PausingRepository {
    fn new(inner: Arc<dyn UserRepository>) -> Self {
        Self {
            inner,
            gate: Mutex::new(None),
        }
    }

    /// Returns (entered, release) for the next lookup by id.
    async fn pause_next_lookup(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.gate.lock().await = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }
}

#[async_trait]
impl UserRepository for PausingRepository {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, DomainError> {
        let gate = self.gate.lock().await.take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.await;
        }
        self.inner.find_by_id(id).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, DomainError> {
        self.inner.find_by_username(username).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, DomainError> {
        self.inner.find_by_email(email).await
    }

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, DomainError> {
        self.inner.find_many(ids).await
    }

    async fn find_all(&self) -> Result<Vec<User>, DomainError> {
        self.inner.find_all().await
    }

    async fn insert(&self, user: &User) -> Result<User, DomainError> {
        self.inner.insert(user).await
    }

    async fn update(&self, id: UserId, patch: &UserPatch) -> Result<User, DomainError> {
        self.inner.update(id, patch).await
    }

    async fn apply_relation(
        &self,
        id: UserId,
        change: RelationChange,
    ) -> Result<User, DomainError> {
        self.inner.apply_relation(id, change).await
    }

    async fn delete(&self, id: UserId) -> Result<(), DomainError> {
        self.inner.delete(id).await
    }
}

fn pausing_fixtures() -> Vec<(Fixture, Arc<PausingRepository>)> {
    let hasher: Arc<dyn PasswordHasher> = Arc::new(BcryptHasher::new(TEST_COST));
    let (sqlite, dir) = sqlite_repository();
    let stores: Vec<(&'static str, Arc<dyn UserRepository>, Option<TempDir>)> = vec![
        ("in-memory", Arc::new(InMemoryUserRepository::new()), None),
        ("sqlite", sqlite, Some(dir)),
    ];

    stores
        .into_iter()
        .map(|(name, inner, dir)| {
            let pausing = Arc::new(PausingRepository::new(inner));
            let fixture = fixture_with(name, pausing.clone(), dir, hasher.clone());
            (fixture, pausing)
        })
        .collect()
}

async fn assert_password_and_friend(f: &Fixture, id: UserId, friend: UserId) {
    assert!(
        f.service.verify_password(id, "difference-engine").await.unwrap(),
        "{}: new password lost",
        f.name
    );
    assert!(
        !f.service.verify_password(id, "analytical").await.unwrap(),
        "{}: old password restored",
        f.name
    );
    let stored = f.service.get_user(id).await.unwrap();
    assert_eq!(stored.friends, vec![friend], "{}", f.name);
}

#[tokio::test]
async fn friend_add_does_not_undo_a_concurrent_password_change() {
    for (f, pausing) in pausing_fixtures() {
        let ada_id = f.service.create_user(ada()).await.unwrap().id.unwrap();
        let grace_id = f.service.create_user(grace()).await.unwrap().id.unwrap();

        let (entered, release) = pausing.pause_next_lookup().await;
        let service = f.service.clone();
        let befriend = tokio::spawn(async move { service.add_friend(ada_id, grace_id).await });
        entered.await.unwrap();

        f.service
            .update_user(ada_id, UserChanges::default().password("difference-engine"))
            .await
            .unwrap();
        release.send(()).unwrap();
        befriend.await.unwrap().unwrap();

        assert_password_and_friend(&f, ada_id, grace_id).await;
    }
}

#[tokio::test]
async fn password_change_does_not_drop_a_concurrent_friend_add() {
    for (f, pausing) in pausing_fixtures() {
        let ada_id = f.service.create_user(ada()).await.unwrap().id.unwrap();
        let grace_id = f.service.create_user(grace()).await.unwrap().id.unwrap();

        let (entered, release) = pausing.pause_next_lookup().await;
        let service = f.service.clone();
        let change = tokio::spawn(async move {
            service
                .update_user(ada_id, UserChanges::default().password("difference-engine"))
                .await
        });
        entered.await.unwrap();

        f.service.add_friend(ada_id, grace_id).await.unwrap();
        release.send(()).unwrap();
        change.await.unwrap().unwrap();

        assert_password_and_friend(&f, ada_id, grace_id).await;
    }
}
