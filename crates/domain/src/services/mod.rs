pub mod password_hasher;
pub mod user_service;

pub use password_hasher::{BcryptHasher, PasswordHasher, DEFAULT_COST_FACTOR};
pub use user_service::UserService;
