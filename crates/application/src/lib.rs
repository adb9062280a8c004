use config::Config;
use domain::*;
use infrastructure::*;
use std::sync::Arc;
use tracing::info;

/// User directory application - wires persistence, hashing and the domain service
pub struct UserApp {
    pub user_service: UserService,
}

impl UserApp {
    pub fn new(config: &Config) -> Result<Self, DomainError> {
        // Infrastructure layer - database setup
        let database = Database::new(&config.database_path, config.database_pool_size)?;
        let pool = database.get_pool().clone();

        let user_repository: Arc<dyn UserRepository> = Arc::new(SqliteUserRepository::new(pool));
        let password_hasher: Arc<dyn PasswordHasher> =
            Arc::new(BcryptHasher::new(config.bcrypt_cost));

        info!(cost = config.bcrypt_cost, "password hashing configured");
        Ok(Self::with_parts(user_repository, password_hasher))
    }

    /// Volatile app for tooling and tests; nothing is written to disk.
    pub fn in_memory(bcrypt_cost: u32) -> Self {
        Self::with_parts(
            Arc::new(InMemoryUserRepository::new()),
            Arc::new(BcryptHasher::new(bcrypt_cost)),
        )
    }

    pub fn with_parts(
        user_repository: Arc<dyn UserRepository>,
        password_hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        Self {
            user_service: UserService::new(user_repository, password_hasher),
        }
    }

    /// Registration flow: create the account and hand back its public view.
    pub async fn register(&self, input: NewUser) -> Result<UserProfile, DomainError> {
        let user = self.user_service.create_user(input).await?;
        Ok(user.profile())
    }

    /// Login flow: check credentials and hand back the public view.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, DomainError> {
        let user = self.user_service.authenticate(email, password).await?;
        Ok(user.profile())
    }

    /// Friends that still exist, as public views.
    pub async fn friends_of(&self, id: UserId) -> Result<Vec<UserProfile>, DomainError> {
        let friends = self.user_service.resolve_friends(id).await?;
        Ok(friends.iter().map(UserProfile::from).collect())
    }
}
